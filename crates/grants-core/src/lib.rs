//! Core grant-voucher lifecycle: issue, claim, and redeem single-use signed
//! vouchers that fund wallets.

pub mod claim;
pub mod config;
pub mod jobs;
pub mod metrics;
pub mod model;
pub mod redeem;
pub mod safemode;
pub mod store;
pub mod voucher;
pub mod wallet;

pub use claim::{ClaimEngine, ClaimError};
pub use config::Config;
pub use redeem::{RedeemEngine, RedeemEngineConfig, RedeemError, RedeemOutcome};
pub use safemode::{Breaker, FailureBreaker, MemoryBreaker, RedemptionGate};
pub use store::{KindFilter, Store, StoreError};
pub use voucher::{Ed25519Signer, VoucherError, VoucherSigner};
pub use wallet::{CustodialWallet, CustodialWalletFactory, HotWalletHandle, WalletError};
