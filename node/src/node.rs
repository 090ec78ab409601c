use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use coin_core::{hash_to_hex, Block, Hash256, Identity, Transaction, UndoBlock};
use miner::{ChannelOracle, InputSumRequest, Miner, MinerStats, MiningOutcome, RewardError, TxPool};
use wallet::{Wallet, WalletError};

use crate::chain::{ChainError, ChainState};
use crate::config::{NodeConfig, NodeConfigValidationError};
use crate::mempool::{MempoolError, TransactionPool, TransactionPoolConfig};

const ORACLE_CHANNEL_CAPACITY: usize = 16;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] NodeConfigValidationError),
    #[error("Reward schedule error: {0}")]
    Reward(#[from] RewardError),
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Mempool error: {0}")]
    Mempool(#[from] MempoolError),
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("Node has no wallet")]
    WalletDisabled,
    #[error("Node is not running")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockOrigin {
    Mined,
    External,
}

impl fmt::Display for BlockOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockOrigin::Mined => write!(f, "mined"),
            BlockOrigin::External => write!(f, "external"),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, NodeError>>;

enum NodeCommand {
    SubmitBlock {
        block: Block,
        respond_to: Reply<u64>,
    },
    SubmitTransaction {
        transaction: Transaction,
        respond_to: Reply<u64>,
    },
    Reorganize {
        depth: usize,
        blocks: Vec<Block>,
        respond_to: Reply<u64>,
    },
}

/// State shared by the event loop and every handle
struct NodeShared {
    chain: RwLock<ChainState>,
    mempool: Arc<TransactionPool>,
    wallet: Option<Arc<Wallet>>,
    miner: Option<Arc<Miner>>,
    /// Spends of discarded mined blocks. The miner marks them spent after
    /// handing the block over, so they return to the pool between attempts.
    discarded_spends: Mutex<Vec<Transaction>>,
}

/// Receiving ends served by the event loop
struct NodeInbox {
    commands: mpsc::Receiver<NodeCommand>,
    mined_blocks: Option<mpsc::Receiver<Block>>,
    oracle_requests: Option<mpsc::Receiver<InputSumRequest>>,
}

/// The node's event loop. It owns block adoption: every block, mined or
/// submitted, is connected to the chain here and then handed to the wallet.
pub struct Node {
    shared: Arc<NodeShared>,
    inbox: NodeInbox,
    mining_interval: Duration,
    shutdown: CancellationToken,
}

/// Cloneable access to a running node
#[derive(Clone)]
pub struct NodeHandle {
    shared: Arc<NodeShared>,
    commands: mpsc::Sender<NodeCommand>,
    shutdown: CancellationToken,
}

impl Node {
    /// Build a node whose wallet and mining rewards belong to `identity`
    pub fn new(config: &NodeConfig, identity: Arc<dyn Identity>) -> Result<(Self, NodeHandle), NodeError> {
        config.validate()?;

        let miner_config = miner::MinerConfig::try_from(&config.miner)?;
        let rewards = miner_config.reward_schedule()?;
        let chain = ChainState::new(miner_config.difficulty_target, rewards);
        let mempool = Arc::new(TransactionPool::new(TransactionPoolConfig::from(&config.mempool)));

        let wallet = if config.node.has_wallet {
            let wallet_config = wallet::WalletConfig::from(&config.wallet);
            Some(Arc::new(Wallet::new(identity.clone(), wallet_config)))
        } else {
            None
        };

        let (miner, mined_blocks, oracle_requests) = if config.node.enable_mining {
            let (oracle, requests) = ChannelOracle::channel(ORACLE_CHANNEL_CAPACITY);
            let pool: Arc<dyn TxPool> = mempool.clone();
            let (miner, blocks) = Miner::new(miner_config, identity.locking_script(), pool, Arc::new(oracle))?;
            (Some(Arc::new(miner)), Some(blocks), Some(requests))
        } else {
            (None, None, None)
        };

        let shared = Arc::new(NodeShared {
            chain: RwLock::new(chain),
            mempool,
            wallet,
            miner,
            discarded_spends: Mutex::new(Vec::new()),
        });
        let (command_sender, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let node = Self {
            shared: shared.clone(),
            inbox: NodeInbox {
                commands,
                mined_blocks,
                oracle_requests,
            },
            mining_interval: config.miner.mining_interval,
            shutdown: shutdown.clone(),
        };
        let handle = NodeHandle {
            shared,
            commands: command_sender,
            shutdown,
        };

        Ok((node, handle))
    }

    /// Serve until shutdown is requested or every handle is dropped
    pub async fn run(self) -> Result<(), NodeError> {
        let Node {
            shared,
            mut inbox,
            mining_interval,
            shutdown,
        } = self;

        info!(
            mining = shared.miner.is_some(),
            wallet = shared.wallet.is_some(),
            "Node started"
        );

        let mining_task = shared
            .miner
            .clone()
            .map(|miner| tokio::spawn(mining_loop(shared.clone(), miner, mining_interval, shutdown.clone())));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(request) = recv_optional(&mut inbox.oracle_requests) => {
                    shared.answer_oracle(request);
                }
                Some(block) = recv_optional(&mut inbox.mined_blocks) => {
                    shared.handle_mined_block(block);
                }
                command = inbox.commands.recv() => match command {
                    Some(command) => shared.handle_command(command),
                    None => break,
                },
            }
        }

        info!("Shutting down node");
        shutdown.cancel();
        if let Some(miner) = &shared.miner {
            miner.cancel_current();
        }
        if let Some(task) = mining_task {
            if let Err(e) = task.await {
                error!("Mining task failed: {}", e);
            }
        }

        Ok(())
    }
}

async fn recv_optional<T>(receiver: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn mining_loop(shared: Arc<NodeShared>, miner: Arc<Miner>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // No attempt is running, so nothing can mark these spent again
        shared.requeue_discarded();

        // Dropping the attempt on shutdown cancels its search
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = miner.attempt_block() => match result {
                Ok(MiningOutcome::Mined(block)) => {
                    debug!(hash = %hash_to_hex(&block.hash()), "Mining attempt produced a block");
                }
                Ok(MiningOutcome::NotWorthMining) => debug!("Nothing worth mining yet"),
                Ok(MiningOutcome::Cancelled) => {}
                Err(err) => warn!(error = %err, "Mining attempt failed"),
            },
        }
    }

    debug!("Mining loop stopped");
}

impl NodeShared {
    fn answer_oracle(&self, request: InputSumRequest) {
        let sums = self.chain.read().utxos().input_sums(&request.transactions);
        if request.respond_to.send(sums).is_err() {
            debug!("Input-sum requester went away before the reply");
        }
    }

    fn handle_command(&self, command: NodeCommand) {
        match command {
            NodeCommand::SubmitBlock { block, respond_to } => {
                let result = self.adopt_block(block, BlockOrigin::External);
                if let Err(err) = &result {
                    warn!(error = %err, "Rejected submitted block");
                }
                let _ = respond_to.send(result);
            }
            NodeCommand::SubmitTransaction {
                transaction,
                respond_to,
            } => {
                let _ = respond_to.send(self.accept_transaction(transaction));
            }
            NodeCommand::Reorganize {
                depth,
                blocks,
                respond_to,
            } => {
                let result = self.reorganize(depth, blocks);
                if let Err(err) = &result {
                    warn!(depth, error = %err, "Reorganization failed");
                }
                let _ = respond_to.send(result);
            }
        }
    }

    fn handle_mined_block(&self, block: Block) {
        if let Err(err) = self.adopt_block(block.clone(), BlockOrigin::Mined) {
            warn!(
                hash = %hash_to_hex(&block.hash()),
                error = %err,
                "Discarding mined block"
            );
            self.discarded_spends.lock().extend(block.spends().iter().cloned());
        }
    }

    fn requeue_discarded(&self) {
        let discarded = std::mem::take(&mut *self.discarded_spends.lock());
        if !discarded.is_empty() {
            debug!(transactions = discarded.len(), "Returning spends of discarded mined blocks");
            self.requeue(&discarded);
        }
    }

    fn adopt_block(&self, block: Block, origin: BlockOrigin) -> Result<u64, NodeError> {
        let hash = block.hash();
        let chain_length = self.chain.write().connect_block(block.clone())?;
        let removed = self.mempool.remove_included(block.spends());

        if let Some(miner) = &self.miner {
            if origin == BlockOrigin::External && miner.cancel_current() {
                info!(chain_length, "Another block was found, cancelling the current search");
            }
            miner.set_chain_tip(hash, chain_length);
        }

        if let Some(wallet) = &self.wallet {
            if let Some(observation) = wallet.handle_block(&block) {
                debug!(
                    coins_received = observation.coins_received,
                    spends_seen = observation.spends_seen,
                    amount_confirmed = observation.amount_confirmed,
                    "Wallet observed block"
                );
            }
        }

        info!(
            chain_length,
            hash = %hash_to_hex(&hash),
            transactions = block.transactions.len(),
            removed_from_pool = removed,
            origin = %origin,
            "Adopted block"
        );
        Ok(chain_length)
    }

    fn accept_transaction(&self, transaction: Transaction) -> Result<u64, NodeError> {
        let fee = self.chain.read().utxos().fee(&transaction)?;
        let txid = self.mempool.add_transaction(transaction, fee)?;
        info!(tx = %hash_to_hex(&txid), fee, "Accepted transaction");
        Ok(fee)
    }

    fn reorganize(&self, depth: usize, blocks: Vec<Block>) -> Result<u64, NodeError> {
        let (undone, chain_length, tip) = {
            let mut chain = self.chain.write();
            let undone = chain.reorganize(depth, &blocks)?;
            (undone, chain.height(), chain.tip_hash())
        };

        for block in &blocks {
            self.mempool.remove_included(block.spends());
        }
        let (old_blocks, undo_blocks): (Vec<Block>, Vec<UndoBlock>) = undone.into_iter().unzip();
        for block in old_blocks.iter().rev() {
            self.requeue(block.spends());
        }

        if let Some(miner) = &self.miner {
            miner.cancel_current();
            miner.set_chain_tip(tip, chain_length);
        }
        if let Some(wallet) = &self.wallet {
            wallet.handle_fork(&blocks, &undo_blocks);
        }

        info!(
            undone = undo_blocks.len(),
            applied = blocks.len(),
            chain_length,
            hash = %hash_to_hex(&tip),
            "Reorganized chain"
        );
        Ok(chain_length)
    }

    /// Return the spends of a block that left the chain to the pool, when
    /// they are still valid against the current tip
    fn requeue(&self, transactions: &[Transaction]) {
        let chain = self.chain.read();
        for tx in transactions {
            let result = chain
                .utxos()
                .fee(tx)
                .map_err(NodeError::from)
                .and_then(|fee| self.mempool.add_transaction(tx.clone(), fee).map_err(NodeError::from));

            if let Err(err) = result {
                debug!(tx = %hash_to_hex(&tx.hash()), error = %err, "Dropped transaction of discarded block");
            }
        }
    }
}

impl NodeHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> NodeCommand) -> Result<T, NodeError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(command(respond_to))
            .await
            .map_err(|_| NodeError::Stopped)?;
        response.await.map_err(|_| NodeError::Stopped)?
    }

    /// Offer a block found elsewhere. Cancels the running search when the
    /// block is adopted. Returns the new chain length.
    pub async fn submit_block(&self, block: Block) -> Result<u64, NodeError> {
        self.request(|respond_to| NodeCommand::SubmitBlock { block, respond_to })
            .await
    }

    /// Add a transaction to the pool. Returns the fee it pays.
    pub async fn submit_transaction(&self, transaction: Transaction) -> Result<u64, NodeError> {
        self.request(|respond_to| NodeCommand::SubmitTransaction {
            transaction,
            respond_to,
        })
        .await
    }

    /// Replace the top `depth` blocks with `blocks`, which must connect to
    /// the block below them. Returns the new chain length.
    pub async fn reorganize(&self, depth: usize, blocks: Vec<Block>) -> Result<u64, NodeError> {
        self.request(|respond_to| NodeCommand::Reorganize {
            depth,
            blocks,
            respond_to,
        })
        .await
    }

    /// Pay `amount` to `recipient` from the node's wallet and submit the
    /// payment. The spend is abandoned again if the pool refuses it.
    pub async fn send_payment(&self, amount: u64, fee: u64, recipient: &str) -> Result<Hash256, NodeError> {
        let wallet = self.shared.wallet.as_ref().ok_or(NodeError::WalletDisabled)?;
        let transaction = wallet.build_spend(amount, fee, recipient)?;
        let txid = transaction.hash();

        if let Err(err) = self.submit_transaction(transaction).await {
            if let Err(abandon) = wallet.abandon_spend(&txid) {
                error!(tx = %hash_to_hex(&txid), error = %abandon, "Failed to abandon refused payment");
            }
            return Err(err);
        }

        Ok(txid)
    }

    pub fn chain_length(&self) -> u64 {
        self.shared.chain.read().height()
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.shared.chain.read().tip_hash()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        self.shared.chain.read().block_at(height).cloned()
    }

    pub fn difficulty_target(&self) -> Hash256 {
        self.shared.chain.read().difficulty_target()
    }

    /// Amount the chain's unspent outputs lock to `locking_script`
    pub fn balance_of(&self, locking_script: &str) -> u64 {
        self.shared.chain.read().utxos().balance_of(locking_script)
    }

    pub fn wallet(&self) -> Option<Arc<Wallet>> {
        self.shared.wallet.clone()
    }

    pub fn mempool(&self) -> Arc<TransactionPool> {
        self.shared.mempool.clone()
    }

    pub fn miner_stats(&self) -> Option<MinerStats> {
        self.shared.miner.as_ref().map(|miner| miner.stats())
    }

    /// Ask the event loop to stop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
