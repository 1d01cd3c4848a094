//! Redeem engine: verify the caller's transaction, select a covering
//! subset of claims, transfer funds, and confirm settlement. The hardest
//! single component in the system.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::model::{Voucher, Wallet};
use crate::safemode::{FailureBreaker, RedemptionGate};
use crate::store::{KindFilter, Store, StoreError};
use crate::wallet::{
    confirm_with_retry, CustodialWallet, CustodialWalletFactory, HotWalletHandle, WalletError,
};

const CONFIRM_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum RedeemError {
    #[error("redemption disabled (safe mode)")]
    SafeMode,
    #[error("nothing to redeem")]
    NothingToRedeem,
    #[error("invalid transaction: {0}")]
    Malformed(String),
    #[error("signature rejected")]
    SignatureRejected,
    #[error("transaction bounds violated: {0}")]
    TransactionBounds(&'static str),
    #[error("insufficient user balance")]
    InsufficientUserBalance,
    #[error("hot wallet has insufficient funds")]
    HotWalletInsufficient,
    #[error("claim is not yet mature or has expired")]
    NotMatureOrExpired,
    #[error("claim already redeemed or modified concurrently")]
    AlreadyRedeemed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct RedeemOutcome {
    pub id: Option<String>,
    pub destination: String,
    pub probi: Decimal,
    pub altcurrency: String,
    pub grant_total: Decimal,
}

pub struct RedeemEngineConfig {
    pub nominal_currency: String,
    pub settlement_destination: String,
    pub lower_tx_limit: Decimal,
    pub upper_tx_limit: Decimal,
}

pub struct RedeemEngine {
    store: Store,
    hot_wallet: HotWalletHandle,
    wallet_factory: Arc<dyn CustodialWalletFactory>,
    gate: RedemptionGate,
    breaker: FailureBreaker,
    config: RedeemEngineConfig,
}

impl RedeemEngine {
    pub fn new(
        store: Store,
        hot_wallet: HotWalletHandle,
        wallet_factory: Arc<dyn CustodialWalletFactory>,
        gate: RedemptionGate,
        breaker: FailureBreaker,
        config: RedeemEngineConfig,
    ) -> Self {
        Self {
            store,
            hot_wallet,
            wallet_factory,
            gate,
            breaker,
            config,
        }
    }

    /// Redeems a single user-submitted transaction against the claims
    /// available to `wallet`.
    pub async fn redeem(
        &self,
        wallet: &Wallet,
        transaction_blob: &[u8],
    ) -> Result<RedeemOutcome, RedeemError> {
        self.run(wallet, Some(transaction_blob), None).await
    }

    /// Drains every eligible claim for `wallet` to an anonymous destination
    /// claimable of kind "ads" into a linked address, no user transaction.
    pub async fn drain(
        &self,
        wallet: &Wallet,
        anonymous_destination: &str,
    ) -> Result<RedeemOutcome, RedeemError> {
        self.run(wallet, None, Some(anonymous_destination)).await
    }

    async fn run(
        &self,
        wallet: &Wallet,
        transaction_blob: Option<&[u8]>,
        anonymous_destination: Option<&str>,
    ) -> Result<RedeemOutcome, RedeemError> {
        if self.gate.is_tripped() {
            return Err(RedeemError::SafeMode);
        }

        let result = self
            .run_unguarded(wallet, transaction_blob, anonymous_destination)
            .await;

        if let Err(err) = &result {
            if matches!(
                err,
                RedeemError::Store(_) | RedeemError::AlreadyRedeemed
            ) {
                if let Err(e) = self.breaker.record_failure().await {
                    error!(error = %e, "failed to record breaker failure");
                }
            }
        }
        result
    }

    async fn run_unguarded(
        &self,
        wallet: &Wallet,
        transaction_blob: Option<&[u8]>,
        anonymous_destination: Option<&str>,
    ) -> Result<RedeemOutcome, RedeemError> {
        let is_drain = transaction_blob.is_none();
        let kind_filter = if is_drain {
            KindFilter::Ads
        } else {
            KindFilter::Any
        };

        let (unredeemed, already_redeemed): (Vec<Voucher>, Vec<Voucher>) = self
            .store
            .list_active_claims(wallet.wallet_id, kind_filter, &self.config.nominal_currency)
            .await?
            .into_iter()
            .partition(|v| !v.redeemed);

        if unredeemed.is_empty() {
            // Nothing left unredeemed, but if the wallet already holds a
            // spent claim, route it through the CAS so a replay gets a
            // deterministic `AlreadyRedeemed` rather than a bare "nothing
            // to redeem" that masks the claim's real terminal state.
            let Some(voucher) = already_redeemed.into_iter().next() else {
                return Err(RedeemError::NothingToRedeem);
            };
            return match self
                .store
                .redeem_claim(voucher.voucher_id, voucher.promotion_id, wallet.wallet_id)
                .await
            {
                Err(StoreError::NotMatching) => Err(RedeemError::AlreadyRedeemed),
                Err(other) => Err(RedeemError::Store(other)),
                Ok(()) => Err(RedeemError::AlreadyRedeemed),
            };
        }

        // Resolve the user wallet against the custodial wallet client and refresh its balance.
        let user_client = self.wallet_factory.for_wallet(wallet);
        let user_balance = user_client
            .balance(true)
            .await
            .map_err(|e| self.map_balance_err(e))?;

        // Verify the caller's transaction, unless this is a drain.
        let tx = match transaction_blob {
            Some(blob) => {
                let tx = user_client
                    .verify_transaction(blob)
                    .await
                    .map_err(|e| self.map_verify_err(e))?;
                if tx.currency != self.config.nominal_currency {
                    return Err(RedeemError::TransactionBounds("currency"));
                }
                if tx.amount_minor < self.config.lower_tx_limit
                    || tx.amount_minor > self.config.upper_tx_limit
                {
                    return Err(RedeemError::TransactionBounds("amount"));
                }
                if tx.destination != self.config.settlement_destination {
                    return Err(RedeemError::TransactionBounds("destination"));
                }
                Some(tx)
            }
            None => None,
        };

        // Selection, expiry-ascending, minimal covering prefix.
        let target_amount = tx.as_ref().map(|t| t.amount_minor);
        let (selected, sum_amount) = select_covering(&unredeemed, target_amount)?;

        if let Some(target) = target_amount {
            if target > user_balance.spendable + sum_amount {
                return Err(RedeemError::InsufficientUserBalance);
            }
        }

        // Hot-wallet balance check. Insufficient funds against claims
        // already verified as claimable indicates accounting drift.
        let hot_client = self.hot_wallet.client();
        let hot_balance = hot_client
            .balance(true)
            .await
            .map_err(|e| self.map_balance_err(e))?;
        if sum_amount > hot_balance.spendable {
            self.gate.trip("hot wallet reports insufficient funds for claimable vouchers");
            return Err(RedeemError::HotWalletInsufficient);
        }

        // Redundant signature check via submit(confirm=false).
        let submit_id = if let Some(blob) = transaction_blob {
            match user_client.submit_transaction(blob, false).await {
                Ok(info) => Some(info.id),
                Err(WalletError::InvalidSignature) => return Err(RedeemError::SignatureRejected),
                Err(WalletError::InsufficientBalance) => {
                    return Err(RedeemError::InsufficientUserBalance)
                }
                Err(_) => None,
            }
        } else {
            None
        };

        // Per-voucher maturity/expiry check, then atomic redeem.
        let now = Utc::now();
        for voucher in &selected {
            if !voucher.is_redeemable_at(now) {
                return Err(RedeemError::NotMatureOrExpired);
            }
            self.store
                .redeem_claim(voucher.voucher_id, voucher.promotion_id, wallet.wallet_id)
                .await
                .map_err(|e| match e {
                    StoreError::NotMatching => RedeemError::AlreadyRedeemed,
                    other => RedeemError::Store(other),
                })?;
            metrics::counter!(
                "grants_redemptions_total",
                "promotion_id" => voucher.promotion_id.to_string()
            )
            .increment(1);
        }

        // Fund & settle. Claims are already committed redeemed; a
        // failure here can only be handled by tripping safe-mode.
        let destination = anonymous_destination
            .map(str::to_string)
            .or_else(|| tx.as_ref().map(|t| t.destination.clone()))
            .ok_or_else(|| RedeemError::Malformed("no destination resolved".into()))?;

        let transfer_result = hot_client
            .transfer(&self.config.nominal_currency, sum_amount, &destination)
            .await;
        let transfer = match transfer_result {
            Ok(info) => info,
            Err(e) => {
                self.gate.trip("hot wallet transfer failed after claims committed redeemed");
                warn!(error = %e, "hot wallet transfer failed post-consume; reconciliation required");
                return Err(RedeemError::HotWalletInsufficient);
            }
        };

        // Confirm settlement, up to 5 attempts, no backoff. Only for
        // transaction-bound redeems — drain has no caller transaction.
        if let Some(submit_id) = &submit_id {
            if confirm_with_retry(&*user_client, submit_id, CONFIRM_MAX_ATTEMPTS)
                .await
                .is_err()
            {
                self.gate.trip("settlement confirmation failed after retry budget");
                warn!(submit_id = %submit_id, "settlement confirmation exhausted retries");
                return Err(RedeemError::HotWalletInsufficient);
            }
        }

        info!(
            wallet_id = %wallet.wallet_id,
            grant_total = %sum_amount,
            is_drain,
            "redemption settled"
        );

        Ok(RedeemOutcome {
            id: submit_id.or(Some(transfer.id)),
            destination,
            probi: tx.map(|t| t.amount_minor).unwrap_or(sum_amount),
            altcurrency: self.config.nominal_currency.clone(),
            grant_total: sum_amount,
        })
    }

    fn map_balance_err(&self, err: WalletError) -> RedeemError {
        match err {
            WalletError::InvalidSignature => RedeemError::SignatureRejected,
            other => RedeemError::Malformed(other.to_string()),
        }
    }

    fn map_verify_err(&self, err: WalletError) -> RedeemError {
        match err {
            WalletError::InvalidSignature => RedeemError::SignatureRejected,
            WalletError::Malformed => RedeemError::Malformed("unparseable transaction".into()),
            other => RedeemError::Malformed(other.to_string()),
        }
    }
}

/// Traverses `unredeemed` (already expiry-ascending) accumulating amount
/// until either the target is met or the list is exhausted (drain). The
/// resulting prefix is minimal: removing its last element drops the sum
/// below target.
fn select_covering(
    unredeemed: &[Voucher],
    target_amount: Option<Decimal>,
) -> Result<(Vec<Voucher>, Decimal), RedeemError> {
    let mut selected = Vec::new();
    let mut sum = Decimal::ZERO;
    for voucher in unredeemed {
        if voucher.nominal_currency.is_empty() {
            return Err(RedeemError::TransactionBounds("currency"));
        }
        selected.push(voucher.clone());
        sum += voucher.amount;
        if let Some(target) = target_amount {
            if sum >= target {
                break;
            }
        }
    }
    Ok((selected, sum))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn voucher(amount: Decimal, expiry_offset_days: i64) -> Voucher {
        let now = Utc::now();
        Voucher {
            voucher_id: Uuid::new_v4(),
            promotion_id: Uuid::new_v4(),
            nominal_currency: "BAT".to_string(),
            amount,
            maturity_time: now - Duration::days(1),
            expiry_time: now + Duration::days(expiry_offset_days),
            kind: None,
            provider_id: None,
            redeemed: false,
        }
    }

    #[test]
    fn selection_stops_as_soon_as_target_is_covered() {
        let vouchers = vec![voucher(Decimal::new(10_00, 2), 10), voucher(Decimal::new(10_00, 2), 20), voucher(Decimal::new(10_00, 2), 30)];
        let (selected, sum) = select_covering(&vouchers, Some(Decimal::new(15_00, 2))).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(sum, Decimal::new(20_00, 2));
    }

    #[test]
    fn drain_selects_every_voucher() {
        let vouchers = vec![voucher(Decimal::new(10_00, 2), 10), voucher(Decimal::new(10_00, 2), 20)];
        let (selected, sum) = select_covering(&vouchers, None).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(sum, Decimal::new(20_00, 2));
    }

    #[test]
    fn selection_is_minimal() {
        let vouchers = vec![voucher(Decimal::new(10_00, 2), 10), voucher(Decimal::new(10_00, 2), 20)];
        let (selected, sum) = select_covering(&vouchers, Some(Decimal::new(10_00, 2))).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(sum, Decimal::new(10_00, 2));
    }
}
