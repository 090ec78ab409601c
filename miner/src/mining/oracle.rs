use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use coin_core::Transaction;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Input-sum request channel closed")]
    Closed,
}

/// Answers "how much value do the inputs of these transactions reference".
///
/// Implementations must return one sum per transaction, in order.
#[async_trait]
pub trait InputSumOracle: Send + Sync {
    async fn input_sums(&self, transactions: &[Transaction]) -> Result<Vec<u64>, OracleError>;
}

/// A request for input sums, answered by whoever owns the UTXO view
#[derive(Debug)]
pub struct InputSumRequest {
    pub transactions: Vec<Transaction>,
    pub respond_to: oneshot::Sender<Vec<u64>>,
}

/// Oracle that forwards each query to the node over a channel and waits for
/// the reply on a oneshot. Deadlines are applied by the caller.
#[derive(Debug, Clone)]
pub struct ChannelOracle {
    requests: mpsc::Sender<InputSumRequest>,
}

impl ChannelOracle {
    pub fn new(requests: mpsc::Sender<InputSumRequest>) -> Self {
        Self { requests }
    }

    /// Create an oracle together with the receiving end the node serves
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<InputSumRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl InputSumOracle for ChannelOracle {
    async fn input_sums(&self, transactions: &[Transaction]) -> Result<Vec<u64>, OracleError> {
        let (respond_to, response) = oneshot::channel();
        let request = InputSumRequest {
            transactions: transactions.to_vec(),
            respond_to,
        };

        self.requests.send(request).await.map_err(|_| OracleError::Closed)?;
        response.await.map_err(|_| OracleError::Closed)
    }
}
