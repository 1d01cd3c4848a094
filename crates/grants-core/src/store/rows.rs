use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

use super::{grant_kind_from_promotion, promotion_kind_from_str};
use crate::model::{Claim, Promotion, Voucher, Wallet, WalletProvider};

#[derive(FromRow)]
pub(super) struct PromotionRow {
    pub promotion_id: Uuid,
    pub kind: String,
    pub approximate_value: Decimal,
    pub platform: String,
    pub active: bool,
    pub remaining_vouchers: i64,
    pub created_at: DateTime<Utc>,
    pub matures_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<PromotionRow> for Promotion {
    fn from(row: PromotionRow) -> Self {
        Promotion {
            promotion_id: row.promotion_id,
            kind: promotion_kind_from_str(&row.kind),
            approximate_value: row.approximate_value,
            platform: row.platform,
            active: row.active,
            remaining_vouchers: row.remaining_vouchers,
            created_at: row.created_at,
            matures_at: row.matures_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(FromRow)]
#[allow(dead_code)]
pub(super) struct WalletRow {
    pub wallet_id: Uuid,
    pub provider: String,
    pub provider_id: String,
    pub public_key_hex: String,
    pub altcurrency: String,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            wallet_id: row.wallet_id,
            provider: WalletProvider::Uphold,
            provider_id: row.provider_id,
            public_key_hex: row.public_key_hex,
            altcurrency: row.altcurrency,
        }
    }
}

#[derive(FromRow)]
pub(super) struct ClaimRow {
    pub claim_id: Uuid,
    pub promotion_id: Uuid,
    pub wallet_id: Uuid,
    pub approximate_value: Decimal,
    pub legacy_claimed: bool,
    pub redeemed: bool,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ClaimRow> for Claim {
    fn from(row: ClaimRow) -> Self {
        Claim {
            claim_id: row.claim_id,
            promotion_id: row.promotion_id,
            wallet_id: row.wallet_id,
            approximate_value: row.approximate_value,
            legacy_claimed: row.legacy_claimed,
            redeemed: row.redeemed,
            redeemed_at: row.redeemed_at,
            created_at: row.created_at,
        }
    }
}

/// Projection used by `list_active_claims`: a claim joined to its parent
/// promotion, reshaped into the voucher transport form.
#[derive(FromRow)]
pub(super) struct VoucherRow {
    pub voucher_id: Uuid,
    pub promotion_id: Uuid,
    pub kind: String,
    pub platform: String,
    pub amount: Decimal,
    pub maturity_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub redeemed: bool,
}

impl From<VoucherRow> for Voucher {
    fn from(row: VoucherRow) -> Self {
        Voucher {
            voucher_id: row.voucher_id,
            promotion_id: row.promotion_id,
            nominal_currency: String::new(),
            amount: row.amount,
            maturity_time: row.maturity_time,
            expiry_time: row.expiry_time,
            kind: grant_kind_from_promotion(&row.kind, &row.platform),
            provider_id: None,
            redeemed: row.redeemed,
        }
    }
}
