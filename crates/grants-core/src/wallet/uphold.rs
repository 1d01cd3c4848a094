use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer as _, Verifier, VerifyingKey};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::Wallet;
use crate::voucher::Ed25519Signer;

use super::{Balance, ConfirmOutcome, CustodialWallet, CustodialWalletFactory, TxInfo, WalletError};

/// The detached-signature transaction envelope the caller submits: a
/// `payload.signature` pair, both base64 standard-encoded, where `payload`
/// is the JSON body below and `signature` is a raw 64-byte Ed25519 signature
/// over the payload bytes produced with the wallet's registered key.
#[derive(Debug, Serialize, Deserialize)]
struct TxPayload {
    id: String,
    currency: String,
    #[serde(rename = "amount")]
    amount_minor: Decimal,
    destination: String,
}

fn parse_envelope(opaque_blob: &[u8]) -> Result<(TxPayload, Vec<u8>, Vec<u8>), WalletError> {
    let text = std::str::from_utf8(opaque_blob).map_err(|_| WalletError::Malformed)?;
    let (payload_b64, sig_b64) = text.split_once('.').ok_or(WalletError::Malformed)?;
    let payload_bytes = STANDARD
        .decode(payload_b64)
        .map_err(|_| WalletError::Malformed)?;
    let sig_bytes = STANDARD
        .decode(sig_b64)
        .map_err(|_| WalletError::Malformed)?;
    let payload: TxPayload =
        serde_json::from_slice(&payload_bytes).map_err(|_| WalletError::Malformed)?;
    Ok((payload, payload_bytes, sig_bytes))
}

/// Verifies the detached signature over an opaque blob against a wallet's
/// registered public key, independent of any network call.
pub fn verify_detached(opaque_blob: &[u8], public_key_hex: &str) -> Result<TxInfo, WalletError> {
    let (payload, payload_bytes, sig_bytes) = parse_envelope(opaque_blob)?;
    let key_bytes = hex::decode(public_key_hex).map_err(|_| WalletError::Malformed)?;
    let key_array: [u8; 32] = key_bytes.try_into().map_err(|_| WalletError::Malformed)?;
    let verifying_key = VerifyingKey::from_bytes(&key_array).map_err(|_| WalletError::Malformed)?;
    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|_| WalletError::Malformed)?;
    let signature = Signature::from_bytes(&sig_array);
    verifying_key
        .verify(&payload_bytes, &signature)
        .map_err(|_| WalletError::InvalidSignature)?;
    Ok(TxInfo {
        id: payload.id,
        currency: payload.currency,
        amount_minor: payload.amount_minor,
        destination: payload.destination,
    })
}

fn build_envelope(signer: &Ed25519Signer, payload: &TxPayload) -> Vec<u8> {
    let payload_bytes = serde_json::to_vec(payload).expect("TxPayload always serializes");
    let payload_b64 = STANDARD.encode(&payload_bytes);
    let signature = signer.sign(&payload_bytes);
    let sig_b64 = STANDARD.encode(signature);
    format!("{payload_b64}.{sig_b64}").into_bytes()
}

/// `reqwest`-based client for the custodian named in the wire format
/// (`"provider": "uphold"`). One instance addresses exactly one card: either
/// a user's linked wallet (verification-only, built from request fields) or
/// the service's own hot wallet (signing-capable, built once at startup from
/// `grant_wallet_*` configuration and never mutated after).
pub struct UpholdClient {
    http: Client,
    base_url: String,
    card_id: String,
    access_token: String,
    registered_public_key_hex: Option<String>,
    signer: Option<Ed25519Signer>,
}

impl UpholdClient {
    /// Verification-only client for a user-linked card.
    pub fn for_user_wallet(
        base_url: impl Into<String>,
        card_id: impl Into<String>,
        access_token: impl Into<String>,
        registered_public_key_hex: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            card_id: card_id.into(),
            access_token: access_token.into(),
            registered_public_key_hex: Some(registered_public_key_hex.into()),
            signer: None,
        }
    }

    /// Signing-capable client for the service's own hot wallet.
    pub fn for_hot_wallet(
        base_url: impl Into<String>,
        card_id: impl Into<String>,
        access_token: impl Into<String>,
        signer: Ed25519Signer,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            card_id: card_id.into(),
            access_token: access_token.into(),
            registered_public_key_hex: None,
            signer: Some(signer),
        }
    }

    fn classify_status(status: StatusCode, body: &str) -> WalletError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WalletError::InvalidSignature,
            StatusCode::UNPROCESSABLE_ENTITY => WalletError::InsufficientBalance,
            s if s.is_server_error() => WalletError::Transient(body.to_string()),
            _ => WalletError::Fatal(body.to_string()),
        }
    }
}

#[async_trait]
impl CustodialWallet for UpholdClient {
    async fn balance(&self, refresh: bool) -> Result<Balance, WalletError> {
        let url = format!(
            "{}/v0/me/cards/{}?refresh={}",
            self.base_url, self.card_id, refresh
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| WalletError::Transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }
        #[derive(Deserialize)]
        struct CardBalance {
            available: Decimal,
            balance: Decimal,
        }
        let card: CardBalance = resp
            .json()
            .await
            .map_err(|e| WalletError::Transient(e.to_string()))?;
        Ok(Balance {
            total: card.balance,
            spendable: card.available,
            confirmed: card.balance,
            unconfirmed: card.balance - card.available,
        })
    }

    async fn verify_transaction(&self, opaque_blob: &[u8]) -> Result<TxInfo, WalletError> {
        let key = self
            .registered_public_key_hex
            .as_deref()
            .ok_or_else(|| WalletError::Fatal("client has no registered public key".into()))?;
        verify_detached(opaque_blob, key)
    }

    async fn submit_transaction(
        &self,
        opaque_blob: &[u8],
        confirm: bool,
    ) -> Result<TxInfo, WalletError> {
        let (payload, ..) = parse_envelope(opaque_blob)?;
        let url = format!(
            "{}/v0/me/cards/{}/transactions?commit={}",
            self.base_url, self.card_id, confirm
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .body(opaque_blob.to_vec())
            .send()
            .await
            .map_err(|e| WalletError::Transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }
        Ok(TxInfo {
            id: payload.id,
            currency: payload.currency,
            amount_minor: payload.amount_minor,
            destination: payload.destination,
        })
    }

    async fn confirm_transaction(&self, id: &str) -> Result<ConfirmOutcome, WalletError> {
        let url = format!(
            "{}/v0/me/cards/{}/transactions/{}/commit",
            self.base_url, self.card_id, id
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| WalletError::Transient(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(ConfirmOutcome::Confirmed)
        } else if status.is_server_error() {
            Ok(ConfirmOutcome::Transient)
        } else {
            Ok(ConfirmOutcome::Fatal)
        }
    }

    async fn transfer(
        &self,
        currency: &str,
        amount_minor: Decimal,
        destination: &str,
    ) -> Result<TxInfo, WalletError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| WalletError::Fatal("client cannot sign transfers".into()))?;

        let payload = TxPayload {
            id: uuid::Uuid::new_v4().to_string(),
            currency: currency.to_string(),
            amount_minor,
            destination: destination.to_string(),
        };
        let envelope = build_envelope(signer, &payload);

        let url = format!(
            "{}/v0/me/cards/{}/transactions?commit=true",
            self.base_url, self.card_id
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .body(envelope)
            .send()
            .await
            .map_err(|e| WalletError::Transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }
        #[derive(Deserialize)]
        struct TransferResponse {
            id: String,
        }
        let parsed: TransferResponse = resp
            .json()
            .await
            .map_err(|e| WalletError::Transient(e.to_string()))?;
        Ok(TxInfo {
            id: parsed.id,
            currency: currency.to_string(),
            amount_minor,
            destination: destination.to_string(),
        })
    }
}

/// Builds a verification-only [`UpholdClient`] per user wallet, sharing one
/// HTTP-level access token across all of them.
pub struct UpholdFactory {
    base_url: String,
    access_token: String,
}

impl UpholdFactory {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
        }
    }
}

impl CustodialWalletFactory for UpholdFactory {
    fn for_wallet(&self, wallet: &Wallet) -> Arc<dyn CustodialWallet> {
        Arc::new(UpholdClient::for_user_wallet(
            self.base_url.clone(),
            wallet.provider_id.clone(),
            self.access_token.clone(),
            wallet.public_key_hex.clone(),
        ))
    }
}
