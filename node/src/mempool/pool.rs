use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use coin_core::{hash_to_hex, Hash256, OutPoint, Transaction};
use miner::TxPool;

use super::error::{MempoolError, MempoolResult};

/// Configuration for the transaction memory pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPoolConfig {
    /// Maximum number of transactions in the pool
    pub max_size: usize,
    /// Aggregate priority the pool must reach before a block is worth mining
    pub priority_threshold: u64,
    /// Maximum number of pool transactions placed in one block
    pub max_block_transactions: usize,
}

impl Default for TransactionPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5000,
            priority_threshold: 0,
            max_block_transactions: 500,
        }
    }
}

#[derive(Debug)]
struct MempoolEntry {
    transaction: Transaction,
    /// Fee paid by the transaction
    priority: u64,
    /// Arrival order, breaks priority ties
    sequence: u64,
}

/// Thread-safe pool of transactions waiting to be mined
pub struct TransactionPool {
    transactions: DashMap<Hash256, MempoolEntry>,
    next_sequence: AtomicU64,
    config: TransactionPoolConfig,
}

impl TransactionPool {
    pub fn new(config: TransactionPoolConfig) -> Self {
        Self {
            transactions: DashMap::new(),
            next_sequence: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &TransactionPoolConfig {
        &self.config
    }

    /// Add a transaction with the given priority
    pub fn add_transaction(&self, transaction: Transaction, priority: u64) -> MempoolResult<Hash256> {
        if transaction.is_coinbase() || transaction.inputs.iter().any(|input| input.is_coinbase()) {
            return Err(MempoolError::InvalidTransaction(
                "coinbase transactions are only valid inside blocks".to_string(),
            ));
        }
        if transaction.inputs.is_empty() || transaction.outputs.is_empty() {
            return Err(MempoolError::InvalidTransaction(
                "transaction needs at least one input and one output".to_string(),
            ));
        }

        let tx_hash = transaction.hash();
        if self.transactions.contains_key(&tx_hash) {
            return Err(MempoolError::DuplicateTransaction);
        }

        if let Some(conflict) = self.find_double_spend(&transaction) {
            return Err(MempoolError::DoubleSpend(conflict.to_string()));
        }

        let current = self.transactions.len();
        if current >= self.config.max_size {
            return Err(MempoolError::MempoolFull {
                current,
                max: self.config.max_size,
            });
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.transactions.insert(
            tx_hash,
            MempoolEntry {
                transaction,
                priority,
                sequence,
            },
        );

        debug!(tx = %hash_to_hex(&tx_hash), priority, "Added transaction to pool");
        Ok(tx_hash)
    }

    pub fn remove_transaction(&self, tx_hash: &Hash256) -> Option<Transaction> {
        self.transactions.remove(tx_hash).map(|(_, entry)| entry.transaction)
    }

    pub fn get_transaction(&self, tx_hash: &Hash256) -> Option<Transaction> {
        self.transactions.get(tx_hash).map(|entry| entry.transaction.clone())
    }

    pub fn contains(&self, tx_hash: &Hash256) -> bool {
        self.transactions.contains_key(tx_hash)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Check whether any pooled transaction already spends an input of `transaction`
    pub fn check_double_spend(&self, transaction: &Transaction) -> bool {
        self.find_double_spend(transaction).is_some()
    }

    fn find_double_spend(&self, transaction: &Transaction) -> Option<OutPoint> {
        let new_inputs: HashSet<OutPoint> = transaction.inputs.iter().map(|input| input.outpoint()).collect();

        self.transactions.iter().find_map(|entry| {
            entry
                .transaction
                .inputs
                .iter()
                .map(|input| input.outpoint())
                .find(|outpoint| new_inputs.contains(outpoint))
        })
    }

    /// Sum of the priorities of every pooled transaction, saturating
    pub fn aggregate_priority(&self) -> u64 {
        self.transactions
            .iter()
            .fold(0u64, |acc, entry| acc.saturating_add(entry.priority))
    }

    /// All transactions by descending priority, ties by arrival
    pub fn get_sorted_transactions(&self) -> Vec<Transaction> {
        let mut entries: Vec<_> = self
            .transactions
            .iter()
            .map(|entry| (entry.priority, entry.sequence, entry.transaction.clone()))
            .collect();

        entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        entries.into_iter().map(|(_, _, tx)| tx).collect()
    }

    /// Drop the transactions of an adopted block, and any pooled transaction
    /// that conflicts with them. Returns how many were removed.
    pub fn remove_included(&self, transactions: &[Transaction]) -> usize {
        let before = self.transactions.len();
        let spent: HashSet<OutPoint> = transactions
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(|input| input.outpoint()))
            .collect();

        for tx in transactions {
            self.transactions.remove(&tx.hash());
        }
        self.transactions.retain(|_, entry| {
            !entry
                .transaction
                .inputs
                .iter()
                .any(|input| spent.contains(&input.outpoint()))
        });

        before.saturating_sub(self.transactions.len())
    }

    pub fn clear_all(&self) {
        self.transactions.clear();
    }
}

#[async_trait]
impl TxPool for TransactionPool {
    async fn priority_met(&self) -> bool {
        self.aggregate_priority() >= self.config.priority_threshold
    }

    async fn select_pool(&self) -> Vec<Transaction> {
        let mut selected = self.get_sorted_transactions();
        selected.truncate(self.config.max_block_transactions);
        selected
    }

    async fn mark_spent(&self, transactions: &[Transaction]) {
        let removed = self.remove_included(transactions);
        debug!(removed, "Marked mined transactions spent");
    }
}
