//! Transaction pool error types

use thiserror::Error;

pub type MempoolResult<T> = Result<T, MempoolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Duplicate transaction")]
    DuplicateTransaction,

    #[error("Mempool full: current size {current}, max size {max}")]
    MempoolFull { current: usize, max: usize },

    #[error("Double spend detected: {0}")]
    DoubleSpend(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
}
