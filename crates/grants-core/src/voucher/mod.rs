//! Signed-voucher envelope: the compact `header.payload.signature` form.
//! Every field is covered by the signature; no implicit coercion.

mod signer;

pub use signer::{Ed25519Signer, VoucherSigner};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{GrantKind, Voucher};

const ALG: &str = "EdDSA";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoucherError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signature rejected")]
    SignatureRejected,
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header<'a> {
    alg: &'a str,
    kid: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    altcurrency: String,
    #[serde(rename = "grantId")]
    grant_id: Uuid,
    probi: String,
    #[serde(rename = "promotionId")]
    promotion_id: Uuid,
    #[serde(rename = "maturityTime")]
    maturity_time: i64,
    #[serde(rename = "expiryTime")]
    expiry_time: i64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(rename = "providerId", skip_serializing_if = "Option::is_none")]
    provider_id: Option<Uuid>,
}

/// Produce `count` freshly-minted, freshly-signed vouchers for `promotion_id`.
#[allow(clippy::too_many_arguments)]
pub fn create(
    signer: &dyn VoucherSigner,
    promotion_id: Uuid,
    count: usize,
    currency: &str,
    amount: Decimal,
    maturity: DateTime<Utc>,
    expiry: DateTime<Utc>,
    kind: Option<GrantKind>,
    provider_id: Option<Uuid>,
) -> Result<Vec<String>, VoucherError> {
    (0..count)
        .map(|_| {
            let voucher_id = Uuid::new_v4();
            encode(
                signer,
                voucher_id,
                promotion_id,
                currency,
                amount,
                maturity,
                expiry,
                kind,
                provider_id,
            )
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn encode(
    signer: &dyn VoucherSigner,
    voucher_id: Uuid,
    promotion_id: Uuid,
    currency: &str,
    amount: Decimal,
    maturity: DateTime<Utc>,
    expiry: DateTime<Utc>,
    kind: Option<GrantKind>,
    provider_id: Option<Uuid>,
) -> Result<String, VoucherError> {
    let header = Header {
        alg: ALG,
        kid: signer.key_id(),
    };
    let payload = Payload {
        altcurrency: currency.to_string(),
        grant_id: voucher_id,
        probi: amount.to_string(),
        promotion_id,
        maturity_time: maturity.timestamp(),
        expiry_time: expiry.timestamp(),
        kind: kind.map(|k| k.as_str().to_string()),
        provider_id,
    };

    let header_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).map_err(|e| {
            VoucherError::Malformed(format!("header serialize: {e}"))
        })?);
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).map_err(|e| {
            VoucherError::Malformed(format!("payload serialize: {e}"))
        })?);

    let signing_input = format!("{header_b64}.{payload_b64}");
    let signature = signer.sign(signing_input.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{signing_input}.{sig_b64}"))
}

/// Decode and verify a compact envelope against `verifying_key`. Rejects any
/// `alg` other than the configured EdDSA, including the literal `"none"`,
/// before the payload is even parsed.
pub fn decode(envelope: &str, verifying_key: &VerifyingKey) -> Result<Voucher, VoucherError> {
    let mut parts = envelope.split('.');
    let header_b64 = parts.next().ok_or_else(|| VoucherError::Malformed("missing header".into()))?;
    let payload_b64 = parts
        .next()
        .ok_or_else(|| VoucherError::Malformed("missing payload".into()))?;
    let sig_b64 = parts
        .next()
        .ok_or_else(|| VoucherError::Malformed("missing signature".into()))?;
    if parts.next().is_some() {
        return Err(VoucherError::Malformed("too many segments".into()));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| VoucherError::Malformed(format!("header base64: {e}")))?;
    let header: Header = serde_json::from_slice(&header_bytes)
        .map_err(|e| VoucherError::Malformed(format!("header json: {e}")))?;
    if header.alg != ALG {
        return Err(VoucherError::UnsupportedAlgorithm(header.alg.to_string()));
    }

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|e| VoucherError::Malformed(format!("signature base64: {e}")))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| VoucherError::Malformed("signature not 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_array);

    let signing_input = format!("{header_b64}.{payload_b64}");
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| VoucherError::SignatureRejected)?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| VoucherError::Malformed(format!("payload base64: {e}")))?;
    let payload: Payload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| VoucherError::Malformed(format!("payload json: {e}")))?;

    let amount = payload
        .probi
        .parse::<Decimal>()
        .map_err(|_| VoucherError::InvalidField("probi"))?;
    let maturity_time = Utc
        .timestamp_opt(payload.maturity_time, 0)
        .single()
        .ok_or(VoucherError::InvalidField("maturityTime"))?;
    let expiry_time = Utc
        .timestamp_opt(payload.expiry_time, 0)
        .single()
        .ok_or(VoucherError::InvalidField("expiryTime"))?;
    let kind = payload
        .kind
        .as_deref()
        .map(|k| GrantKind::from_str(k).ok_or(VoucherError::InvalidField("type")))
        .transpose()?;

    Ok(Voucher {
        voucher_id: payload.grant_id,
        promotion_id: payload.promotion_id,
        nominal_currency: payload.altcurrency,
        amount,
        maturity_time,
        expiry_time,
        kind,
        provider_id: payload.provider_id,
        redeemed: false,
    })
}
