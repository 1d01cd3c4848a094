//! Metrics: counters for claimed/redeemed, gauges for hot-wallet
//! balance and claim counts. Thin wrappers over the `metrics` facade so
//! call sites elsewhere in the crate don't repeat label/name literals.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

pub const CLAIMS_TOTAL: &str = "grants_claims_total";
pub const REDEMPTIONS_TOTAL: &str = "grants_redemptions_total";
pub const HOT_WALLET_SPENDABLE: &str = "grants_hot_wallet_spendable";
pub const ACTIVE_CLAIMS: &str = "grants_active_claims";

pub fn publish_hot_wallet_spendable(spendable: Decimal) {
    metrics::gauge!(HOT_WALLET_SPENDABLE).set(spendable.to_f64().unwrap_or(0.0));
}

pub fn publish_active_claims(count: i64) {
    metrics::gauge!(ACTIVE_CLAIMS).set(count as f64);
}
