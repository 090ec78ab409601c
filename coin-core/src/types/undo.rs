use serde::{Deserialize, Serialize};

use crate::hash::Hash256;
use crate::types::block::Block;
use crate::types::transaction::OutPoint;

/// Record of a block's reversal, handed to consumers during a reorganization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoBlock {
    /// Hash of the block being undone
    pub block_hash: Hash256,
    /// Hashes of every transaction the block carried
    pub transaction_hashes: Vec<Hash256>,
    /// Outputs the block consumed, restored by the undo
    pub spent_outpoints: Vec<OutPoint>,
}

impl UndoBlock {
    pub fn from_block(block: &Block) -> Self {
        let transaction_hashes = block.transactions.iter().map(|tx| tx.hash()).collect();
        let spent_outpoints = block
            .spends()
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(|input| input.outpoint()))
            .collect();

        Self {
            block_hash: block.hash(),
            transaction_hashes,
            spent_outpoints,
        }
    }

    pub fn undoes_transaction(&self, txid: &Hash256) -> bool {
        self.transaction_hashes.contains(txid)
    }
}
