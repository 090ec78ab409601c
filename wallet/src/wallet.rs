use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info};

use coin_core::{hash_to_hex, Block, Hash256, Identity, Transaction, UndoBlock};

use crate::coin::{CoinInfo, CoinView};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::ledger::{BlockObservation, CoinLedger, LedgerSnapshot};

struct WalletState {
    ledger: CoinLedger,
    /// Hashes of recently observed blocks
    recent_blocks: LruCache<Hash256, ()>,
}

/// A single-key wallet. All ledger mutations happen under one lock, so
/// block observation and spend construction never interleave.
pub struct Wallet {
    identity: Arc<dyn Identity>,
    state: Mutex<WalletState>,
}

impl Wallet {
    pub fn new(identity: Arc<dyn Identity>, config: WalletConfig) -> Self {
        let capacity = NonZeroUsize::new(config.recent_block_cache).unwrap_or(NonZeroUsize::MIN);
        let ledger = CoinLedger::new(identity.locking_script(), &config);

        Self {
            identity,
            state: Mutex::new(WalletState {
                ledger,
                recent_blocks: LruCache::new(capacity),
            }),
        }
    }

    /// The script our coins are locked to
    pub fn locking_script(&self) -> String {
        self.identity.locking_script()
    }

    pub fn balance(&self) -> u64 {
        self.state.lock().ledger.balance()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state.lock().ledger.snapshot()
    }

    pub fn coins(&self) -> Vec<CoinView> {
        self.state.lock().ledger.coins()
    }

    pub fn unseen_spends(&self) -> Vec<Hash256> {
        self.state.lock().ledger.unseen_spends()
    }

    /// Credit a coin directly, bypassing confirmation
    pub fn insert_confirmed(&self, coin: CoinInfo) -> bool {
        self.state.lock().ledger.insert_confirmed(coin)
    }

    /// Build and sign a payment of `amount` to `recipient` plus `fee`
    pub fn build_spend(&self, amount: u64, fee: u64, recipient: &str) -> Result<Transaction, WalletError> {
        self.state
            .lock()
            .ledger
            .build_spend(amount, fee, recipient, self.identity.as_ref())
    }

    pub fn abandon_spend(&self, txid: &Hash256) -> Result<u64, WalletError> {
        self.state.lock().ledger.abandon_spend(txid)
    }

    /// Observe an adopted block. Returns `None` if the block was already
    /// observed recently.
    pub fn handle_block(&self, block: &Block) -> Option<BlockObservation> {
        let mut state = self.state.lock();
        Self::observe(&mut state, block)
    }

    fn observe(state: &mut WalletState, block: &Block) -> Option<BlockObservation> {
        let hash = block.hash();
        if state.recent_blocks.put(hash, ()).is_some() {
            debug!(block = %hash_to_hex(&hash), "Ignoring already observed block");
            return None;
        }

        Some(state.ledger.observe_block(&block.transactions))
    }

    /// Switch to another branch: take back `undo_blocks` (tip first), then
    /// observe `blocks` in order.
    pub fn handle_fork(&self, blocks: &[Block], undo_blocks: &[UndoBlock]) {
        if blocks.is_empty() && undo_blocks.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        for undo in undo_blocks {
            state.recent_blocks.pop(&undo.block_hash);
            state.ledger.rewind_block(undo);
        }
        for block in blocks {
            Self::observe(&mut state, block);
        }

        info!(
            undone = undo_blocks.len(),
            applied = blocks.len(),
            height = state.ledger.height(),
            balance = state.ledger.balance(),
            "Handled fork"
        );
    }

    /// Panics if the ledger invariants do not hold
    pub fn check_invariants(&self) {
        self.state.lock().ledger.check_invariants();
    }
}
