use std::time::Duration;
use thiserror::Error;

use crate::mining::oracle::OracleError;

/// Failures of a single mining attempt. All are recoverable: the caller may
/// simply try again on its next tick.
#[derive(Debug, Error)]
pub enum MinerError {
    #[error("A mining attempt is already in progress")]
    AlreadyMining,

    #[error("Input-sum oracle did not answer within {0:?}")]
    OracleTimeout(Duration),

    #[error("Input-sum oracle is unavailable")]
    OracleUnavailable,

    #[error("Input-sum oracle returned {returned} sums for {expected} transactions")]
    OracleMismatch { expected: usize, returned: usize },

    #[error("Invalid fee in transaction {txid}: {reason}")]
    InvalidFee { txid: String, reason: String },

    #[error("Node is no longer accepting mined blocks")]
    NodeUnavailable,

    #[error("Nonce space exhausted after {nonce_limit} attempts")]
    SearchExhausted { nonce_limit: u64 },

    #[error("Proof-of-work task failed: {0}")]
    SearchTask(String),
}

impl From<OracleError> for MinerError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Closed => MinerError::OracleUnavailable,
        }
    }
}
