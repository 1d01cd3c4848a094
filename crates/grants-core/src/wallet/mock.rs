//! In-memory stand-in for [`super::CustodialWallet`], used by acceptance
//! tests against the engines without a live network call — mirrors the
//! in-process stub executor pattern used to test payment-rail integrations
//! elsewhere in this corpus.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::model::Wallet;

use super::{
    uphold::verify_detached, Balance, ConfirmOutcome, CustodialWallet, CustodialWalletFactory,
    TxInfo, WalletError,
};

pub struct MockCustodialWallet {
    pub registered_public_key_hex: String,
    pub spendable: Mutex<Decimal>,
    pub confirm_outcomes: Mutex<Vec<ConfirmOutcome>>,
    pub transfers: Mutex<Vec<(String, Decimal, String)>>,
}

impl MockCustodialWallet {
    pub fn new(registered_public_key_hex: impl Into<String>, spendable: Decimal) -> Self {
        Self {
            registered_public_key_hex: registered_public_key_hex.into(),
            spendable: Mutex::new(spendable),
            confirm_outcomes: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_confirm_outcomes(mut self, outcomes: Vec<ConfirmOutcome>) -> Self {
        self.confirm_outcomes = Mutex::new(outcomes);
        self
    }
}

#[async_trait]
impl CustodialWallet for MockCustodialWallet {
    async fn balance(&self, _refresh: bool) -> Result<Balance, WalletError> {
        let spendable = *self.spendable.lock().unwrap();
        Ok(Balance {
            total: spendable,
            spendable,
            confirmed: spendable,
            unconfirmed: Decimal::ZERO,
        })
    }

    async fn verify_transaction(&self, opaque_blob: &[u8]) -> Result<TxInfo, WalletError> {
        verify_detached(opaque_blob, &self.registered_public_key_hex)
    }

    async fn submit_transaction(
        &self,
        opaque_blob: &[u8],
        _confirm: bool,
    ) -> Result<TxInfo, WalletError> {
        verify_detached(opaque_blob, &self.registered_public_key_hex)
    }

    async fn confirm_transaction(&self, _id: &str) -> Result<ConfirmOutcome, WalletError> {
        let mut outcomes = self.confirm_outcomes.lock().unwrap();
        if outcomes.is_empty() {
            Ok(ConfirmOutcome::Confirmed)
        } else {
            Ok(outcomes.remove(0))
        }
    }

    async fn transfer(
        &self,
        currency: &str,
        amount_minor: Decimal,
        destination: &str,
    ) -> Result<TxInfo, WalletError> {
        let mut spendable = self.spendable.lock().unwrap();
        if amount_minor > *spendable {
            return Err(WalletError::InsufficientBalance);
        }
        *spendable -= amount_minor;
        self.transfers
            .lock()
            .unwrap()
            .push((currency.to_string(), amount_minor, destination.to_string()));
        Ok(TxInfo {
            id: uuid::Uuid::new_v4().to_string(),
            currency: currency.to_string(),
            amount_minor,
            destination: destination.to_string(),
        })
    }
}

/// Hands back the same mock instance for every wallet, for tests that don't
/// need per-wallet balances.
pub struct MockCustodialWalletFactory {
    pub shared: Arc<MockCustodialWallet>,
}

impl CustodialWalletFactory for MockCustodialWalletFactory {
    fn for_wallet(&self, _wallet: &Wallet) -> Arc<dyn CustodialWallet> {
        self.shared.clone()
    }
}
