use async_trait::async_trait;

use coin_core::{Block, Hash256, Transaction};

/// The pending-transaction pool as seen by the miner
#[async_trait]
pub trait TxPool: Send + Sync {
    /// Whether the pending transactions are worth mining a block for
    async fn priority_met(&self) -> bool;

    /// The transactions to include in the next block, highest priority first.
    /// Size limits and ordering are the pool's business.
    async fn select_pool(&self) -> Vec<Transaction>;

    /// Forget transactions that made it into a mined block
    async fn mark_spent(&self, transactions: &[Transaction]);
}

/// A candidate block: coinbase plus the selected pool, on top of a known tip
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    prev_block_hash: Hash256,
    chain_length: u64,
    difficulty_target: Hash256,
    coinbase: Transaction,
    transactions: Vec<Transaction>,
}

impl BlockTemplate {
    pub fn new(
        prev_block_hash: Hash256,
        chain_length: u64,
        difficulty_target: Hash256,
        coinbase: Transaction,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            prev_block_hash,
            chain_length,
            difficulty_target,
            coinbase,
            transactions,
        }
    }

    /// Assemble `[coinbase] + pool` into a block with nonce zero
    pub fn create_block(&self) -> Block {
        let mut transactions = Vec::with_capacity(self.transactions.len() + 1);
        transactions.push(self.coinbase.clone());
        transactions.extend(self.transactions.iter().cloned());

        Block::new(self.prev_block_hash, transactions, self.difficulty_target)
    }

    pub fn coinbase(&self) -> &Transaction {
        &self.coinbase
    }

    /// The pool transactions, without the coinbase
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn chain_length(&self) -> u64 {
        self.chain_length
    }
}
