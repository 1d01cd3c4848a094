//! Custodial wallet client: a thin adapter over the external custodian
//! that backs balance checks, transaction verification/submission, and the
//! hot-wallet transfer.

mod uphold;
#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use uphold::{UpholdClient, UpholdFactory};

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::model::Wallet;

/// Wire errors collapse into exactly three buckets: fatal for the
/// caller, recoverable at the policy layer, or retryable at the job layer.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("fatal provider error: {0}")]
    Fatal(String),
    #[error("malformed transaction blob")]
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    Transient,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub total: Decimal,
    pub spendable: Decimal,
    pub confirmed: Decimal,
    pub unconfirmed: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub id: String,
    pub currency: String,
    pub amount_minor: Decimal,
    pub destination: String,
}

#[async_trait]
pub trait CustodialWallet: Send + Sync {
    /// `refresh = true` fetches a live value; mandatory outside `local`
    /// environments. Otherwise the last-known cached value is acceptable.
    async fn balance(&self, refresh: bool) -> Result<Balance, WalletError>;

    /// Parses and verifies a detached signature over `opaque_blob` without
    /// mutating remote state. Rejects any transaction field the adapter does
    /// not understand.
    async fn verify_transaction(&self, opaque_blob: &[u8]) -> Result<TxInfo, WalletError>;

    /// Sends the transaction to the custodian. `confirm = false` reserves
    /// funds without settling, acting as a second signature check that
    /// covers fields the local verifier does not model.
    async fn submit_transaction(
        &self,
        opaque_blob: &[u8],
        confirm: bool,
    ) -> Result<TxInfo, WalletError>;

    /// Finalises a previously-submitted transaction.
    async fn confirm_transaction(&self, id: &str) -> Result<ConfirmOutcome, WalletError>;

    /// Signed transfer from the service's hot wallet.
    async fn transfer(
        &self,
        currency: &str,
        amount_minor: Decimal,
        destination: &str,
    ) -> Result<TxInfo, WalletError>;
}

/// Builds a [`CustodialWallet`] scoped to a particular user wallet, given
/// that wallet's own provider-id and registered public key.
pub trait CustodialWalletFactory: Send + Sync {
    fn for_wallet(&self, wallet: &Wallet) -> Arc<dyn CustodialWallet>;
}

/// The process-wide singleton backing the service's own custodial card.
/// Read-only after startup: carries the credentials used to sign transfers
/// out of the funding wallet, and nothing else touches them.
#[derive(Clone)]
pub struct HotWalletHandle {
    client: Arc<dyn CustodialWallet>,
}

impl HotWalletHandle {
    pub fn new(client: Arc<dyn CustodialWallet>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> Arc<dyn CustodialWallet> {
        self.client.clone()
    }
}

/// Retries [`CustodialWallet::confirm_transaction`] up to `max_attempts`
/// times with no backoff.
pub async fn confirm_with_retry(
    wallet: &dyn CustodialWallet,
    id: &str,
    max_attempts: u32,
) -> Result<(), WalletError> {
    let mut last_err = None;
    for _ in 0..max_attempts {
        match wallet.confirm_transaction(id).await {
            Ok(ConfirmOutcome::Confirmed) => return Ok(()),
            Ok(ConfirmOutcome::Transient) => continue,
            Ok(ConfirmOutcome::Fatal) => return Err(WalletError::Fatal(id.to_string())),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| WalletError::Transient(id.to_string())))
}

pub fn parse_wallet_id(s: &str) -> Result<Uuid, WalletError> {
    Uuid::parse_str(s).map_err(|_| WalletError::Malformed)
}
