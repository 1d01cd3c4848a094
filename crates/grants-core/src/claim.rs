//! Claim engine: enforce "one claim per wallet per promotion; one
//! wallet per voucher".

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::model::{Claim, Wallet};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("promotion not found")]
    PromotionNotFound,
    #[error("promotion no longer available")]
    NoLongerAvailable,
    #[error("already claimed")]
    AlreadyClaimed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn classify(err: StoreError) -> ClaimError {
    match err {
        StoreError::NoActivePromotion => ClaimError::NoLongerAvailable,
        StoreError::Duplicate => ClaimError::AlreadyClaimed,
        StoreError::NotFound => ClaimError::PromotionNotFound,
        other => ClaimError::Store(other),
    }
}

pub struct ClaimEngine {
    store: Store,
}

impl ClaimEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Looks up the promotion, upserts the wallet, then attempts the
    /// transactional claim. Any uniqueness or remaining-count violation is
    /// reported as a 4xx-class, non-retriable error.
    pub async fn claim(&self, wallet: &Wallet, promotion_id: Uuid) -> Result<Claim, ClaimError> {
        let _promotion = self
            .store
            .get_promotion(promotion_id)
            .await
            .map_err(classify)?;

        self.store.upsert_wallet(wallet).await?;

        let claim = self
            .store
            .claim_promotion(promotion_id, wallet.wallet_id)
            .await
            .map_err(classify)?;

        metrics::counter!("grants_claims_total").increment(1);
        info!(
            promotion_id = %promotion_id,
            wallet_id = %wallet.wallet_id,
            "claim recorded"
        );
        Ok(claim)
    }

    /// Legacy entrypoint: binds a wallet to a pre-minted voucher-id.
    pub async fn bind_legacy_voucher(
        &self,
        voucher_id: Uuid,
        promotion_id: Uuid,
        wallet: &Wallet,
        approximate_value: Decimal,
    ) -> Result<Claim, ClaimError> {
        self.store.upsert_wallet(wallet).await?;
        let claim = self
            .store
            .bind_legacy_voucher(voucher_id, promotion_id, wallet.wallet_id, approximate_value)
            .await
            .map_err(classify)?;
        metrics::counter!("grants_claims_total").increment(1);
        Ok(claim)
    }
}
