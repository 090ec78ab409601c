use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use coin_core::hash::ZERO_HASH;
use coin_core::{hash_to_hex, Block, Hash256};

use super::coinbase::CoinbaseBuilder;
use super::oracle::InputSumOracle;
use super::pow::{ProofOfWorkSearch, SearchOutcome};
use super::reward::RewardError;
use super::template::{BlockTemplate, TxPool};
use crate::config::MinerConfig;
use crate::error::MinerError;

/// Capacity of the channel mined blocks are handed to the node on
const BLOCK_CHANNEL_CAPACITY: usize = 16;

/// Result of one mining attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    /// A block was found and handed to the node
    Mined(Block),
    /// The pool's priority threshold was not met; nothing was done
    NotWorthMining,
    /// Another block arrived first and the search was abandoned
    Cancelled,
}

/// Cumulative counters over the miner's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MinerStats {
    pub attempts: u64,
    pub blocks_mined: u64,
    pub cancelled: u64,
    pub hashes: u64,
}

#[derive(Debug)]
enum MiningState {
    Idle,
    Mining { cancel: CancellationToken },
}

#[derive(Debug, Clone, Copy)]
struct ChainTip {
    prev_block_hash: Hash256,
    chain_length: u64,
}

/// Resets the miner to idle however an attempt ends, including when the
/// attempt's future is dropped mid-search.
struct AttemptGuard<'a> {
    state: &'a Mutex<MiningState>,
    cancel: CancellationToken,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.cancel.cancel();
        *self.state.lock() = MiningState::Idle;
    }
}

pub struct Miner {
    config: MinerConfig,
    coinbase: CoinbaseBuilder,
    pool: Arc<dyn TxPool>,
    oracle: Arc<dyn InputSumOracle>,
    block_sender: mpsc::Sender<Block>,
    state: Mutex<MiningState>,
    tip: RwLock<ChainTip>,
    difficulty_target: RwLock<Hash256>,
    stats: Mutex<MinerStats>,
    /// Updated by the running search, so stats show progress mid-attempt
    hashes: Arc<AtomicU64>,
}

impl Miner {
    /// Create a miner paying its rewards to `locking_script`. Found blocks
    /// are delivered on the returned receiver.
    pub fn new(
        config: MinerConfig,
        locking_script: impl Into<String>,
        pool: Arc<dyn TxPool>,
        oracle: Arc<dyn InputSumOracle>,
    ) -> Result<(Self, mpsc::Receiver<Block>), RewardError> {
        let (block_sender, block_receiver) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let coinbase = CoinbaseBuilder::new(config.reward_schedule()?, locking_script);
        let difficulty_target = config.difficulty_target;

        let miner = Self {
            config,
            coinbase,
            pool,
            oracle,
            block_sender,
            state: Mutex::new(MiningState::Idle),
            tip: RwLock::new(ChainTip {
                prev_block_hash: ZERO_HASH,
                chain_length: 0,
            }),
            difficulty_target: RwLock::new(difficulty_target),
            stats: Mutex::new(MinerStats::default()),
            hashes: Arc::new(AtomicU64::new(0)),
        };

        Ok((miner, block_receiver))
    }

    /// Run one mining attempt on top of the current chain tip.
    ///
    /// Only one attempt may run at a time; a concurrent call fails with
    /// [`MinerError::AlreadyMining`]. The pool is only marked spent when a
    /// block is found and accepted by the node's channel.
    pub async fn attempt_block(&self) -> Result<MiningOutcome, MinerError> {
        let guard = self.begin_attempt()?;
        self.stats.lock().attempts += 1;

        if !self.pool.priority_met().await {
            debug!("Transaction pool priority not met, skipping block");
            return Ok(MiningOutcome::NotWorthMining);
        }

        let pool = self.pool.select_pool().await;
        let tip = *self.tip.read();
        let difficulty_target = *self.difficulty_target.read();

        let coinbase = match self
            .coinbase
            .generate(self.oracle.as_ref(), &pool, tip.chain_length, self.config.oracle_timeout)
            .await
        {
            Ok(coinbase) => coinbase,
            Err(err) => {
                warn!(height = tip.chain_length, error = %err, "Failed to build coinbase");
                return Err(err);
            }
        };

        let template = BlockTemplate::new(
            tip.prev_block_hash,
            tip.chain_length,
            difficulty_target,
            coinbase,
            pool,
        );
        let search = ProofOfWorkSearch::new(template.create_block(), self.config.nonce_limit)
            .with_hash_counter(self.hashes.clone());

        info!(
            height = template.chain_length(),
            transactions = template.transactions().len(),
            reward = template.coinbase().outputs[0].amount,
            "Starting proof-of-work search"
        );

        let cancel = guard.cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || search.run(&cancel))
            .await
            .map_err(|e| MinerError::SearchTask(e.to_string()))?;

        match outcome {
            SearchOutcome::Found { block, attempts } => {
                self.block_sender
                    .send(block.clone())
                    .await
                    .map_err(|_| MinerError::NodeUnavailable)?;
                self.pool.mark_spent(template.transactions()).await;
                self.advance_tip(tip, block.hash());

                self.stats.lock().blocks_mined += 1;
                info!(
                    height = tip.chain_length,
                    hash = %hash_to_hex(&block.hash()),
                    attempts,
                    "Mined block"
                );
                Ok(MiningOutcome::Mined(block))
            }
            SearchOutcome::Cancelled { attempts } => {
                self.stats.lock().cancelled += 1;
                info!(height = tip.chain_length, attempts, "Mining cancelled, another block was found");
                Ok(MiningOutcome::Cancelled)
            }
            SearchOutcome::Exhausted { attempts } => {
                warn!(
                    height = tip.chain_length,
                    attempts,
                    nonce_limit = self.config.nonce_limit,
                    "Nonce space exhausted without finding a block"
                );
                Err(MinerError::SearchExhausted {
                    nonce_limit: self.config.nonce_limit,
                })
            }
        }
    }

    fn begin_attempt(&self) -> Result<AttemptGuard<'_>, MinerError> {
        let mut state = self.state.lock();
        if matches!(*state, MiningState::Mining { .. }) {
            return Err(MinerError::AlreadyMining);
        }

        let cancel = CancellationToken::new();
        *state = MiningState::Mining { cancel: cancel.clone() };

        Ok(AttemptGuard {
            state: &self.state,
            cancel,
        })
    }

    /// Abandon the in-progress search, if any. Returns whether one was running.
    pub fn cancel_current(&self) -> bool {
        match &*self.state.lock() {
            MiningState::Mining { cancel } => {
                cancel.cancel();
                true
            }
            MiningState::Idle => false,
        }
    }

    pub fn is_mining(&self) -> bool {
        matches!(*self.state.lock(), MiningState::Mining { .. })
    }

    /// Build the next attempt on `prev_block_hash` at height `chain_length`
    pub fn set_chain_tip(&self, prev_block_hash: Hash256, chain_length: u64) {
        *self.tip.write() = ChainTip {
            prev_block_hash,
            chain_length,
        };
    }

    /// Build on our own block unless the node moved the tip meanwhile
    fn advance_tip(&self, mined_on: ChainTip, block_hash: Hash256) {
        let mut tip = self.tip.write();
        if tip.prev_block_hash == mined_on.prev_block_hash && tip.chain_length == mined_on.chain_length {
            *tip = ChainTip {
                prev_block_hash: block_hash,
                chain_length: mined_on.chain_length + 1,
            };
        }
    }

    /// The tip the next attempt builds on: previous hash and chain length
    pub fn chain_tip(&self) -> (Hash256, u64) {
        let tip = self.tip.read();
        (tip.prev_block_hash, tip.chain_length)
    }

    pub fn set_difficulty_target(&self, target: Hash256) {
        *self.difficulty_target.write() = target;
    }

    pub fn difficulty_target(&self) -> Hash256 {
        *self.difficulty_target.read()
    }

    pub fn stats(&self) -> MinerStats {
        MinerStats {
            hashes: self.hashes.load(Ordering::SeqCst),
            ..*self.stats.lock()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use coin_core::{Transaction, TransactionInput, TransactionOutput};

    use crate::mining::oracle::OracleError;

    #[derive(Default)]
    struct MockPool {
        priority: bool,
        transactions: Vec<Transaction>,
        spent: Mutex<Vec<Transaction>>,
    }

    #[async_trait]
    impl TxPool for MockPool {
        async fn priority_met(&self) -> bool {
            self.priority
        }

        async fn select_pool(&self) -> Vec<Transaction> {
            self.transactions.clone()
        }

        async fn mark_spent(&self, transactions: &[Transaction]) {
            self.spent.lock().extend_from_slice(transactions);
        }
    }

    /// Reports every input as worth the outputs plus a fee of 2
    struct FeeOracle;

    #[async_trait]
    impl InputSumOracle for FeeOracle {
        async fn input_sums(&self, transactions: &[Transaction]) -> Result<Vec<u64>, OracleError> {
            Ok(transactions.iter().map(|tx| tx.sum_outputs().unwrap() + 2).collect())
        }
    }

    struct SilentOracle;

    #[async_trait]
    impl InputSumOracle for SilentOracle {
        async fn input_sums(&self, _transactions: &[Transaction]) -> Result<Vec<u64>, OracleError> {
            std::future::pending().await
        }
    }

    fn spend(amount: u64) -> Transaction {
        Transaction::new(
            1,
            vec![TransactionInput::new([5u8; 32], 0, vec![1])],
            vec![TransactionOutput::new(amount, "bob")],
            0,
        )
    }

    fn config(difficulty_target: Hash256, nonce_limit: u64) -> MinerConfig {
        MinerConfig {
            nonce_limit,
            initial_subsidy: 50,
            subsidy_halving_rate: 10,
            max_halvings: 2,
            oracle_timeout: Duration::from_millis(100),
            difficulty_target,
        }
    }

    fn ready_pool() -> Arc<MockPool> {
        Arc::new(MockPool {
            priority: true,
            transactions: vec![spend(10), spend(20)],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_not_worth_mining_has_no_side_effects() {
        let pool = Arc::new(MockPool {
            transactions: vec![spend(10)],
            ..Default::default()
        });
        let (miner, mut blocks) =
            Miner::new(config([0xff; 32], 10), "miner", pool.clone(), Arc::new(FeeOracle)).unwrap();

        let outcome = miner.attempt_block().await.unwrap();

        assert_eq!(outcome, MiningOutcome::NotWorthMining);
        assert!(blocks.try_recv().is_err());
        assert!(pool.spent.lock().is_empty());
        assert!(!miner.is_mining());
    }

    #[tokio::test]
    async fn test_mined_block_is_published_and_pool_marked() {
        let pool = ready_pool();
        let (miner, mut blocks) =
            Miner::new(config([0xff; 32], 10), "miner", pool.clone(), Arc::new(FeeOracle)).unwrap();
        miner.set_chain_tip([9u8; 32], 12);

        let block = match miner.attempt_block().await.unwrap() {
            MiningOutcome::Mined(block) => block,
            other => panic!("expected a mined block, got {:?}", other),
        };

        assert!(block.meets_target());
        assert_eq!(block.header.prev_block_hash, [9u8; 32]);
        assert_eq!(blocks.recv().await.unwrap(), block);

        let coinbase = block.coinbase().unwrap();
        assert_eq!(coinbase.outputs[0].amount, 25 + 2 + 2);
        assert_eq!(coinbase.outputs[0].locking_script, "miner");
        assert_eq!(block.spends(), pool.transactions.as_slice());
        assert_eq!(*pool.spent.lock(), pool.transactions);
        // The next attempt builds on the block just found
        assert_eq!(miner.chain_tip(), (block.hash(), 13));

        let stats = miner.stats();
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.blocks_mined, 1);
        assert_eq!(stats.hashes, 1);
        assert!(!miner.is_mining());
    }

    #[tokio::test]
    async fn test_exhaustion_is_an_error() {
        let pool = ready_pool();
        let (miner, mut blocks) = Miner::new(config(ZERO_HASH, 64), "miner", pool.clone(), Arc::new(FeeOracle)).unwrap();

        let result = miner.attempt_block().await;

        assert!(matches!(result, Err(MinerError::SearchExhausted { nonce_limit: 64 })));
        assert!(blocks.try_recv().is_err());
        assert!(pool.spent.lock().is_empty());
        assert_eq!(miner.stats().hashes, 64);
        assert!(!miner.is_mining());
    }

    #[tokio::test]
    async fn test_cancel_current_preempts_search() {
        let pool = ready_pool();
        let (miner, mut blocks) =
            Miner::new(config(ZERO_HASH, u64::MAX), "miner", pool.clone(), Arc::new(FeeOracle)).unwrap();
        let miner = Arc::new(miner);

        assert!(!miner.cancel_current());

        let attempt = tokio::spawn({
            let miner = miner.clone();
            async move { miner.attempt_block().await }
        });

        while !miner.is_mining() {
            tokio::task::yield_now().await;
        }
        assert!(miner.cancel_current());

        let outcome = attempt.await.unwrap().unwrap();
        assert_eq!(outcome, MiningOutcome::Cancelled);
        assert!(blocks.try_recv().is_err());
        assert!(pool.spent.lock().is_empty());
        assert_eq!(miner.stats().cancelled, 1);
        assert!(!miner.is_mining());
    }

    #[tokio::test]
    async fn test_concurrent_attempt_rejected_and_timeout_resets_state() {
        let (miner, _blocks) =
            Miner::new(config([0xff; 32], 10), "miner", ready_pool(), Arc::new(SilentOracle)).unwrap();
        let miner = Arc::new(miner);

        let attempt = tokio::spawn({
            let miner = miner.clone();
            async move { miner.attempt_block().await }
        });

        while !miner.is_mining() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(miner.attempt_block().await, Err(MinerError::AlreadyMining)));

        let result = attempt.await.unwrap();
        assert!(matches!(result, Err(MinerError::OracleTimeout(_))));
        assert!(!miner.is_mining());
    }

    #[tokio::test]
    async fn test_closed_block_channel_leaves_pool_untouched() {
        let pool = ready_pool();
        let (miner, blocks) = Miner::new(config([0xff; 32], 10), "miner", pool.clone(), Arc::new(FeeOracle)).unwrap();
        drop(blocks);

        let result = miner.attempt_block().await;

        assert!(matches!(result, Err(MinerError::NodeUnavailable)));
        assert!(pool.spent.lock().is_empty());
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        let mut config = config([0xff; 32], 10);
        config.subsidy_halving_rate = 0;

        let result = Miner::new(config, "miner", ready_pool(), Arc::new(FeeOracle));
        assert!(matches!(result, Err(RewardError::ZeroHalvingRate)));
    }
}
