use std::collections::{HashMap, HashSet};
use tracing::debug;

use coin_core::hash::ZERO_HASH;
use coin_core::{hash_to_hex, Block, Hash256, OutPoint, Transaction, UndoBlock};
use miner::RewardSchedule;

use super::error::ChainError;
use super::utxo::{UnspentOutput, UtxoSet};

/// A connected block and the outputs it consumed
#[derive(Debug)]
struct StoredBlock {
    block: Block,
    hash: Hash256,
    spent: Vec<(OutPoint, UnspentOutput)>,
}

/// The node's single chain of adopted blocks with its UTXO set
#[derive(Debug)]
pub struct ChainState {
    blocks: Vec<StoredBlock>,
    utxos: UtxoSet,
    difficulty_target: Hash256,
    rewards: RewardSchedule,
}

impl ChainState {
    pub fn new(difficulty_target: Hash256, rewards: RewardSchedule) -> Self {
        Self {
            blocks: Vec::new(),
            utxos: UtxoSet::new(),
            difficulty_target,
            rewards,
        }
    }

    /// Number of adopted blocks
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Hash the next block must reference
    pub fn tip_hash(&self) -> Hash256 {
        self.blocks.last().map(|stored| stored.hash).unwrap_or(ZERO_HASH)
    }

    pub fn block_at(&self, height: u64) -> Option<&Block> {
        let index = usize::try_from(height).ok()?;
        self.blocks.get(index).map(|stored| &stored.block)
    }

    pub fn difficulty_target(&self) -> Hash256 {
        self.difficulty_target
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    /// Check `block` against the tip and append it. Returns the new height.
    pub fn connect_block(&mut self, block: Block) -> Result<u64, ChainError> {
        let height = self.height();
        self.check_header(&block)?;

        let coinbase = block.coinbase()?;
        if coinbase.coinbase_height() != Some(height) {
            return Err(ChainError::InvalidCoinbase(format!(
                "coinbase commits to height {:?}, block is at {}",
                coinbase.coinbase_height(),
                height
            )));
        }

        let fees = self.check_spends(block.spends())?;
        let allowed = self
            .rewards
            .reward(height)
            .checked_add(fees)
            .ok_or_else(|| ChainError::Overflow("block reward".to_string()))?;
        let claimed = coinbase.sum_outputs()?;
        if claimed > allowed {
            return Err(ChainError::ExcessiveReward { claimed, allowed });
        }

        let block_txids: HashSet<Hash256> = block.transactions.iter().map(Transaction::hash).collect();
        let mut spent = Vec::new();
        for tx in &block.transactions {
            spent.extend(
                self.utxos
                    .process_transaction(tx, height)
                    .into_iter()
                    .filter(|(outpoint, _)| !block_txids.contains(&outpoint.txid)),
            );
        }

        let hash = block.hash();
        debug!(height, hash = %hash_to_hex(&hash), spent = spent.len(), "Connected block");
        self.blocks.push(StoredBlock { block, hash, spent });

        Ok(self.height())
    }

    /// Remove the tip block, restoring the outputs it consumed
    pub fn disconnect_tip(&mut self) -> Option<(Block, UndoBlock)> {
        let stored = self.blocks.pop()?;

        for tx in &stored.block.transactions {
            for (outpoint, _) in tx.outpoints() {
                self.utxos.remove(&outpoint);
            }
        }
        for (outpoint, output) in &stored.spent {
            self.utxos.add(*outpoint, output.clone());
        }

        debug!(height = self.height(), hash = %hash_to_hex(&stored.hash), "Disconnected block");
        let undo = UndoBlock::from_block(&stored.block);
        Some((stored.block, undo))
    }

    /// Replace the top `depth` blocks with `blocks`. On failure the chain is
    /// left as it was. Returns the undo records (tip first) of the replaced
    /// blocks.
    pub fn reorganize(&mut self, depth: usize, blocks: &[Block]) -> Result<Vec<(Block, UndoBlock)>, ChainError> {
        if depth as u64 > self.height() {
            return Err(ChainError::TooDeep {
                requested: depth,
                height: self.height(),
            });
        }

        let mut disconnected = Vec::with_capacity(depth);
        for _ in 0..depth {
            if let Some(entry) = self.disconnect_tip() {
                disconnected.push(entry);
            }
        }

        for (connected, block) in blocks.iter().enumerate() {
            if let Err(err) = self.connect_block(block.clone()) {
                for _ in 0..connected {
                    self.disconnect_tip();
                }
                for (old, _) in disconnected.iter().rev() {
                    if let Err(restore) = self.connect_block(old.clone()) {
                        tracing::error!(error = %restore, "Failed to restore block after aborted reorganization");
                    }
                }
                return Err(err);
            }
        }

        Ok(disconnected)
    }

    fn check_header(&self, block: &Block) -> Result<(), ChainError> {
        let tip = self.tip_hash();
        if block.header.prev_block_hash != tip {
            return Err(ChainError::UnknownParent {
                expected: hash_to_hex(&tip),
                found: hash_to_hex(&block.header.prev_block_hash),
            });
        }
        if block.header.difficulty_target != self.difficulty_target {
            return Err(ChainError::WrongDifficultyTarget {
                expected: hash_to_hex(&self.difficulty_target),
                found: hash_to_hex(&block.header.difficulty_target),
            });
        }
        if !block.meets_target() {
            return Err(ChainError::InsufficientWork);
        }
        if !block.has_valid_merkle_root() {
            return Err(ChainError::InvalidMerkleRoot);
        }
        Ok(())
    }

    /// Check that every spend references available outputs and pays no more
    /// than it consumes. Returns the total fees.
    fn check_spends(&self, spends: &[Transaction]) -> Result<u64, ChainError> {
        let mut created: HashMap<OutPoint, u64> = HashMap::new();
        let mut consumed: HashSet<OutPoint> = HashSet::new();
        let mut fees = 0u64;

        for tx in spends {
            if tx.inputs.iter().any(|input| input.is_coinbase()) {
                return Err(ChainError::InvalidCoinbase("coinbase input outside the first transaction".to_string()));
            }

            let mut inputs = 0u64;
            for input in &tx.inputs {
                let outpoint = input.outpoint();
                if !consumed.insert(outpoint) {
                    return Err(ChainError::DoubleSpend(outpoint));
                }
                let amount = match created.get(&outpoint) {
                    Some(amount) => *amount,
                    None => self
                        .utxos
                        .get(&outpoint)
                        .map(|unspent| unspent.output.amount)
                        .ok_or(ChainError::MissingInput(outpoint))?,
                };
                inputs = inputs
                    .checked_add(amount)
                    .ok_or_else(|| ChainError::Overflow(format!("input sum at {}", outpoint)))?;
            }

            let outputs = tx.sum_outputs()?;
            let fee = inputs.checked_sub(outputs).ok_or_else(|| ChainError::InsufficientInputs {
                txid: hash_to_hex(&tx.hash()),
                inputs,
                outputs,
            })?;
            fees = fees
                .checked_add(fee)
                .ok_or_else(|| ChainError::Overflow("block fees".to_string()))?;

            for (outpoint, output) in tx.outpoints() {
                created.insert(outpoint, output.amount);
            }
        }

        Ok(fees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin_core::{TransactionInput, TransactionOutput};

    const EASY_TARGET: Hash256 = [0xff; 32];

    fn chain() -> ChainState {
        ChainState::new(EASY_TARGET, RewardSchedule::new(50, 10, 2).unwrap())
    }

    fn mine(chain: &ChainState, transactions: Vec<Transaction>) -> Block {
        let mut block = Block::new(chain.tip_hash(), transactions, EASY_TARGET);
        while !block.meets_target() {
            block.header.nonce += 1;
        }
        block
    }

    fn pay(source: &Transaction, vout: u32, outputs: Vec<TransactionOutput>) -> Transaction {
        Transaction::new(1, vec![TransactionInput::new(source.hash(), vout, vec![1])], outputs, 0)
    }

    #[test]
    fn test_connect_and_disconnect() {
        let mut chain = chain();
        let reward = Transaction::coinbase(0, 50, "alice");
        let first = mine(&chain, vec![reward.clone()]);
        assert_eq!(chain.connect_block(first.clone()).unwrap(), 1);
        assert_eq!(chain.tip_hash(), first.hash());

        let payment = pay(&reward, 0, vec![TransactionOutput::new(45, "bob")]);
        // Collects the fee of 5 on top of the subsidy
        let second = mine(&chain, vec![Transaction::coinbase(1, 55, "alice"), payment.clone()]);
        chain.connect_block(second.clone()).unwrap();

        assert_eq!(chain.utxos().balance_of("alice"), 55);
        assert_eq!(chain.utxos().balance_of("bob"), 45);

        let (block, undo) = chain.disconnect_tip().unwrap();
        assert_eq!(block, second);
        assert!(undo.undoes_transaction(&payment.hash()));
        assert_eq!(undo.spent_outpoints, vec![OutPoint::new(reward.hash(), 0)]);

        assert_eq!(chain.height(), 1);
        assert_eq!(chain.utxos().balance_of("alice"), 50);
        assert_eq!(chain.utxos().balance_of("bob"), 0);
        assert_eq!(chain.block_at(0), Some(&first));
    }

    #[test]
    fn test_rejects_bad_blocks() {
        let mut chain = chain();

        let orphan = Block::new([1u8; 32], vec![Transaction::coinbase(0, 50, "alice")], EASY_TARGET);
        assert!(matches!(chain.connect_block(orphan), Err(ChainError::UnknownParent { .. })));

        let greedy = mine(&chain, vec![Transaction::coinbase(0, 51, "alice")]);
        assert!(matches!(
            chain.connect_block(greedy),
            Err(ChainError::ExcessiveReward { claimed: 51, allowed: 50 })
        ));

        let wrong_height = mine(&chain, vec![Transaction::coinbase(3, 50, "alice")]);
        assert!(matches!(chain.connect_block(wrong_height), Err(ChainError::InvalidCoinbase(_))));

        let mut tampered = mine(&chain, vec![Transaction::coinbase(0, 50, "alice")]);
        tampered.transactions.push(Transaction::coinbase(0, 1, "mallory"));
        assert!(chain.connect_block(tampered).is_err());

        assert_eq!(chain.height(), 0);
        assert!(chain.utxos().is_empty());
    }

    #[test]
    fn test_rejects_double_spend_within_block() {
        let mut chain = chain();
        let reward = Transaction::coinbase(0, 50, "alice");
        chain.connect_block(mine(&chain, vec![reward.clone()])).unwrap();

        let first = pay(&reward, 0, vec![TransactionOutput::new(50, "bob")]);
        let second = pay(&reward, 0, vec![TransactionOutput::new(50, "carol")]);
        let block = mine(&chain, vec![Transaction::coinbase(1, 50, "alice"), first, second]);

        assert!(matches!(chain.connect_block(block), Err(ChainError::DoubleSpend(_))));
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_spend_of_output_created_in_same_block() {
        let mut chain = chain();
        let reward = Transaction::coinbase(0, 50, "alice");
        chain.connect_block(mine(&chain, vec![reward.clone()])).unwrap();

        let hop = pay(&reward, 0, vec![TransactionOutput::new(50, "bob")]);
        let onward = pay(&hop, 0, vec![TransactionOutput::new(50, "carol")]);
        let block = mine(&chain, vec![Transaction::coinbase(1, 50, "alice"), hop, onward]);
        chain.connect_block(block).unwrap();
        assert_eq!(chain.utxos().balance_of("carol"), 50);

        chain.disconnect_tip().unwrap();
        assert_eq!(chain.utxos().balance_of("alice"), 50);
        assert_eq!(chain.utxos().balance_of("carol"), 0);
        assert_eq!(chain.utxos().len(), 1);
    }

    #[test]
    fn test_failed_reorganization_restores_chain() {
        let mut chain = chain();
        let first = mine(&chain, vec![Transaction::coinbase(0, 50, "alice")]);
        chain.connect_block(first).unwrap();
        let second = mine(&chain, vec![Transaction::coinbase(1, 50, "alice")]);
        chain.connect_block(second.clone()).unwrap();

        let invalid = Block::new([7u8; 32], vec![Transaction::coinbase(1, 50, "bob")], EASY_TARGET);
        assert!(chain.reorganize(1, &[invalid]).is_err());
        assert_eq!(chain.tip_hash(), second.hash());
        assert_eq!(chain.utxos().balance_of("alice"), 100);

        assert!(matches!(chain.reorganize(3, &[]), Err(ChainError::TooDeep { .. })));

        chain.disconnect_tip().unwrap();
        let replacement = mine(&chain, vec![Transaction::coinbase(1, 50, "bob")]);
        chain.connect_block(second).unwrap();

        let undone = chain.reorganize(1, &[replacement.clone()]).unwrap();
        assert_eq!(undone.len(), 1);
        assert_eq!(chain.tip_hash(), replacement.hash());
        assert_eq!(chain.utxos().balance_of("bob"), 50);
        assert_eq!(chain.utxos().balance_of("alice"), 50);
    }
}
