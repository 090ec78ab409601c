// Coin Miner Library

// Enforce panic-free code in production
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), warn(clippy::panic))]
// Test-specific allows
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod error;
pub mod mining;

pub use config::MinerConfig;
pub use error::MinerError;
pub use mining::coinbase::CoinbaseBuilder;
pub use mining::coordinator::{Miner, MinerStats, MiningOutcome};
pub use mining::oracle::{ChannelOracle, InputSumOracle, InputSumRequest, OracleError};
pub use mining::pow::{ProofOfWorkSearch, SearchOutcome};
pub use mining::reward::{RewardError, RewardSchedule};
pub use mining::template::{BlockTemplate, TxPool};
