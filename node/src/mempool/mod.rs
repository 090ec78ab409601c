mod error;
mod pool;

pub use error::{MempoolError, MempoolResult};
pub use pool::{TransactionPool, TransactionPoolConfig};
