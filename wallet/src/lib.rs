// Coin Wallet Library

// Enforce panic-free code in production
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
// Test-specific allows
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod coin;
pub mod config;
pub mod error;
pub mod ledger;
pub mod tracker;
pub mod wallet;

pub use coin::{CoinInfo, CoinState, CoinView};
pub use config::WalletConfig;
pub use error::WalletError;
pub use ledger::{BlockObservation, CoinLedger, CollectionSummary, LedgerSnapshot};
pub use tracker::{ConfirmationTracker, TrackedCoin};
pub use wallet::Wallet;
