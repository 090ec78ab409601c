// Coin Core Library

// Enforce panic-free code in production
#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), warn(clippy::panic))]
// Test-specific allows
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod hash;
pub mod identity;
pub mod types;
pub mod util;

pub use error::CoreError;
pub use hash::{hash256, hash_to_hex, Hash256};
pub use identity::{Identity, IdentityError, KeyPairIdentity};
pub use types::block::{Block, BlockHeader};
pub use types::transaction::{OutPoint, Transaction, TransactionInput, TransactionOutput};
pub use types::undo::UndoBlock;
