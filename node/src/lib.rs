// Coin Node Library

// Enforce panic-free code in production
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), warn(clippy::panic))]
// Test-specific allows
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod chain;
pub mod config;
pub mod logging;
pub mod mempool;
pub mod node;

pub use crate::chain::{ChainError, ChainState, UtxoSet};
pub use crate::config::{NodeConfig, NodeConfigValidationError};
pub use crate::mempool::{MempoolError, TransactionPool, TransactionPoolConfig};
pub use crate::node::{Node, NodeError, NodeHandle};
