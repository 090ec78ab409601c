pub mod block;
pub mod transaction;
pub mod undo;

// Re-export main types
pub use block::{Block, BlockHeader};
pub use transaction::{OutPoint, Transaction, TransactionInput, TransactionOutput};
pub use undo::UndoBlock;
