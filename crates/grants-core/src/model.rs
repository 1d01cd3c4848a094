use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind tag carried by a promotion/voucher. `Android` only ever appears on
/// the read path — see [`crate::store::Store::list_active_claims`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantKind {
    Ads,
    Ugp,
    Android,
}

impl GrantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::Ads => "ads",
            GrantKind::Ugp => "ugp",
            GrantKind::Android => "android",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ads" => Some(GrantKind::Ads),
            "ugp" => Some(GrantKind::Ugp),
            "android" => Some(GrantKind::Android),
            _ => None,
        }
    }
}

/// The transport form. No voucher row exists in the store; this is
/// reconstructed on demand from a claim + its parent promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub voucher_id: Uuid,
    pub promotion_id: Uuid,
    pub nominal_currency: String,
    pub amount: Decimal,
    pub maturity_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub kind: Option<GrantKind>,
    pub provider_id: Option<Uuid>,
    /// Whether the backing claim row has already transitioned to redeemed.
    /// Only meaningful for vouchers projected from the store; a freshly
    /// decoded envelope is never itself redeemed.
    pub redeemed: bool,
}

impl Voucher {
    pub fn is_mature(&self, now: DateTime<Utc>) -> bool {
        now >= self.maturity_time
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_time
    }

    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_mature(now) && !self.is_expired(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionKind {
    Ads,
    Ugp,
}

impl PromotionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionKind::Ads => "ads",
            PromotionKind::Ugp => "ugp",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub promotion_id: Uuid,
    pub kind: PromotionKind,
    pub approximate_value: Decimal,
    pub platform: String,
    pub active: bool,
    pub remaining_vouchers: i64,
    pub created_at: DateTime<Utc>,
    pub matures_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Promotion {
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.remaining_vouchers > 0 && !self.has_expired(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletProvider {
    Uphold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: Uuid,
    pub provider: WalletProvider,
    pub provider_id: String,
    /// hex-encoded Ed25519 public key used to verify user-submitted transactions.
    pub public_key_hex: String,
    pub altcurrency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: Uuid,
    pub promotion_id: Uuid,
    pub wallet_id: Uuid,
    pub approximate_value: Decimal,
    pub legacy_claimed: bool,
    pub redeemed: bool,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Claim {
    /// Eligible iff legacy_claimed, not yet redeemed, and the
    /// parent promotion has not expired.
    pub fn is_eligible(&self, promotion_expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.legacy_claimed && !self.redeemed && promotion_expires_at > now
    }
}
