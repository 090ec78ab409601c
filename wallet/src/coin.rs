use serde::{Deserialize, Serialize};

use coin_core::{OutPoint, Transaction, TransactionOutput};

/// The wallet's handle on one spendable unit of value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinInfo {
    /// Transaction hash and output index that identify the coin
    pub outpoint: OutPoint,
    pub output: TransactionOutput,
}

impl CoinInfo {
    pub fn new(outpoint: OutPoint, output: TransactionOutput) -> Self {
        Self { outpoint, output }
    }

    pub fn amount(&self) -> u64 {
        self.output.amount
    }

    /// Coins created by `tx` that are locked to `locking_script`
    pub fn owned_outputs(tx: &Transaction, locking_script: &str) -> Vec<CoinInfo> {
        tx.outpoints()
            .filter(|(_, output)| output.locking_script == locking_script)
            .map(|(outpoint, output)| CoinInfo::new(outpoint, output.clone()))
            .collect()
    }
}

/// Which ledger collection a coin currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinState {
    Confirmed,
    PendingSpendUnseen,
    PendingSpend,
    PendingReceive,
}

/// A coin together with its ledger state, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinView {
    pub coin: CoinInfo,
    pub state: CoinState,
    /// Confirmations accumulated so far; `None` outside the pending states
    pub confirmations: Option<u64>,
}
