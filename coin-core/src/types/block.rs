use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CoreError;
use crate::hash::{hash256, meets_difficulty, Hash256};
use crate::types::transaction::Transaction;
use crate::util::merkle::merkle_root;

/// BlockHeader structure representing the header of a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,

    /// Hash of the previous block header
    pub prev_block_hash: Hash256,

    /// Merkle root of the transactions in this block
    pub merkle_root: Hash256,

    /// Timestamp of the block (seconds since Unix epoch)
    pub timestamp: u64,

    /// The header hash must be strictly below this value
    pub difficulty_target: Hash256,

    /// Nonce used for proof of work
    pub nonce: u32,
}

impl BlockHeader {
    /// Calculate the hash of this block header
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize_for_hash())
    }

    /// Serialize this header for hashing
    fn serialize_for_hash(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(4 + 32 + 32 + 8 + 32 + 4);

        buffer.extend_from_slice(&self.version.to_le_bytes());
        buffer.extend_from_slice(&self.prev_block_hash);
        buffer.extend_from_slice(&self.merkle_root);
        buffer.extend_from_slice(&self.timestamp.to_le_bytes());
        buffer.extend_from_slice(&self.difficulty_target);
        buffer.extend_from_slice(&self.nonce.to_le_bytes());

        buffer
    }

    /// Check if the block header hash meets its own difficulty target
    pub fn meets_target(&self) -> bool {
        meets_difficulty(&self.hash(), &self.difficulty_target)
    }
}

/// A block: header plus ordered transactions, the first being the coinbase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block on top of `prev_block_hash` with nonce zero
    pub fn new(prev_block_hash: Hash256, transactions: Vec<Transaction>, difficulty_target: Hash256) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        let leaves: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
        let header = BlockHeader {
            version: 1,
            prev_block_hash,
            merkle_root: merkle_root(&leaves),
            timestamp,
            difficulty_target,
            nonce: 0,
        };

        Self { header, transactions }
    }

    /// Calculate the block hash (the header hash)
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn meets_target(&self) -> bool {
        self.header.meets_target()
    }

    /// The leading coinbase transaction
    pub fn coinbase(&self) -> Result<&Transaction, CoreError> {
        self.transactions
            .first()
            .filter(|tx| tx.is_coinbase())
            .ok_or(CoreError::MissingCoinbase)
    }

    /// Transactions other than the coinbase
    pub fn spends(&self) -> &[Transaction] {
        match self.transactions.first() {
            Some(first) if first.is_coinbase() => &self.transactions[1..],
            _ => &self.transactions,
        }
    }

    /// Recompute the merkle root against the carried transactions
    pub fn has_valid_merkle_root(&self) -> bool {
        let leaves: Vec<Hash256> = self.transactions.iter().map(Transaction::hash).collect();
        merkle_root(&leaves) == self.header.merkle_root
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block {} (prev {}, {} txs, nonce {})",
            hex::encode(self.hash()),
            hex::encode(self.header.prev_block_hash),
            self.transactions.len(),
            self.header.nonce
        )
    }
}
