//! Coin ownership across the confirmation state machine.
//!
//! Every coin the wallet knows about lives in exactly one of four
//! collections:
//!
//! * `confirmed`: spendable now, and the only coins backing the balance
//! * `pending_spend_unseen`: committed to a locally built transaction that
//!   has not yet appeared in a block
//! * `pending_spend`: seen consumed in a block, waiting to be buried
//! * `pending_receive`: seen created in a block, waiting to be buried
//!
//! Coins move between collections only as whole units, so value is never
//! counted twice or dropped on the floor.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use coin_core::{hash_to_hex, Hash256, Identity, OutPoint, Transaction, TransactionInput, TransactionOutput, UndoBlock};

use crate::coin::{CoinInfo, CoinState, CoinView};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::tracker::{ConfirmationTracker, TrackedCoin};

/// Coins committed to one locally built transaction
#[derive(Debug, Clone, PartialEq, Eq)]
struct UnseenSpend {
    coins: Vec<CoinInfo>,
    /// Ledger height at which the spend was built
    committed_at: u64,
}

impl UnseenSpend {
    fn amount(&self) -> u64 {
        self.coins.iter().fold(0u64, |total, coin| total.saturating_add(coin.amount()))
    }
}

/// Coins one block moved past the safety depth, kept so a rewind of that
/// block can move them back
#[derive(Debug, Default)]
struct Maturity {
    promoted: Vec<TrackedCoin>,
    finalized: Vec<TrackedCoin>,
}

/// What observing one block changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockObservation {
    /// Local spends seen in the block
    pub spends_seen: usize,
    /// Coins paid to us by the block
    pub coins_received: usize,
    /// Amount that became spendable
    pub amount_confirmed: u64,
    /// Spent coins buried past the safety depth and forgotten
    pub spends_finalized: usize,
    /// Unseen spends rolled back after expiring
    pub spends_expired: usize,
}

/// Coin count and amount of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub coins: usize,
    pub amount: u64,
}

/// Point-in-time view of the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub height: u64,
    pub balance: u64,
    pub confirmed: CollectionSummary,
    pub pending_spend_unseen: CollectionSummary,
    pub pending_spend: CollectionSummary,
    pub pending_receive: CollectionSummary,
}

#[derive(Debug)]
pub struct CoinLedger {
    locking_script: String,
    safe_block_amount: u64,
    unseen_spend_expiry: u64,
    /// Blocks observed so far, net of rewinds
    height: u64,
    confirmed: BTreeMap<OutPoint, CoinInfo>,
    pending_spend_unseen: HashMap<Hash256, UnseenSpend>,
    pending_spend: ConfirmationTracker,
    pending_receive: ConfirmationTracker,
    /// Keyed by the height of the block that caused them
    matured: BTreeMap<u64, Maturity>,
    /// Heights of maturity history kept for rewinds
    maturity_window: u64,
    balance: u64,
}

impl CoinLedger {
    /// Create an empty ledger for coins locked to `locking_script`
    pub fn new(locking_script: impl Into<String>, config: &WalletConfig) -> Self {
        Self {
            locking_script: locking_script.into(),
            safe_block_amount: config.safe_block_amount,
            unseen_spend_expiry: config.unseen_spend_expiry,
            height: 0,
            confirmed: BTreeMap::new(),
            pending_spend_unseen: HashMap::new(),
            pending_spend: ConfirmationTracker::new(),
            pending_receive: ConfirmationTracker::new(),
            matured: BTreeMap::new(),
            maturity_window: config.recent_block_cache as u64,
            balance: 0,
        }
    }

    pub fn locking_script(&self) -> &str {
        &self.locking_script
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Whether `outpoint` is held in any collection
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.confirmed.contains_key(outpoint)
            || self.pending_spend.contains(outpoint)
            || self.pending_receive.contains(outpoint)
            || self.unseen_key_for(outpoint).is_some()
    }

    /// Place a coin straight into the confirmed set, for genesis allocations
    /// and restores. Returns false if the coin is already held.
    pub fn insert_confirmed(&mut self, coin: CoinInfo) -> bool {
        if self.contains(&coin.outpoint) {
            return false;
        }

        self.balance = self.balance.saturating_add(coin.amount());
        self.confirmed.insert(coin.outpoint, coin);
        self.debug_check();
        true
    }

    /// Build and sign a transaction paying `amount` to `recipient`, with
    /// `fee` left for the miner.
    ///
    /// Confirmed coins are taken in key order until they cover
    /// `amount + fee`; any excess comes back as a change output. The selected
    /// coins move to `pending_spend_unseen` only once signing succeeded.
    pub fn build_spend(
        &mut self,
        amount: u64,
        fee: u64,
        recipient: &str,
        identity: &dyn Identity,
    ) -> Result<Transaction, WalletError> {
        if amount == 0 {
            return Err(WalletError::ZeroAmount);
        }
        let required = amount.checked_add(fee).ok_or(WalletError::AmountOverflow)?;

        let mut selected = Vec::new();
        let mut accumulated = 0u64;
        for coin in self.confirmed.values() {
            selected.push(coin.clone());
            accumulated = accumulated.saturating_add(coin.amount());
            if accumulated >= required {
                break;
            }
        }

        if accumulated < required {
            return Err(WalletError::InsufficientFunds {
                required,
                available: self.balance,
            });
        }

        let inputs = selected
            .iter()
            .map(|coin| TransactionInput::new(coin.outpoint.txid, coin.outpoint.vout, Vec::new()))
            .collect();

        let mut outputs = vec![TransactionOutput::new(amount, recipient)];
        let change = accumulated - required;
        if change > 0 {
            outputs.push(TransactionOutput::new(change, self.locking_script.clone()));
        }

        let mut transaction = Transaction::new(1, inputs, outputs, 0);
        let digest = transaction.signature_hash();
        for input in transaction.inputs.iter_mut() {
            input.unlocking_script = identity.sign(&digest)?;
        }

        let txid = transaction.hash();
        for coin in &selected {
            self.confirmed.remove(&coin.outpoint);
        }
        self.balance = self.balance.saturating_sub(accumulated);
        self.pending_spend_unseen.insert(
            txid,
            UnseenSpend {
                coins: selected,
                committed_at: self.height,
            },
        );

        info!(
            txid = %hash_to_hex(&txid),
            amount,
            fee,
            change,
            "Built spend"
        );
        self.debug_check();
        Ok(transaction)
    }

    /// Apply the transactions of one adopted block, in block order.
    pub fn observe_block(&mut self, transactions: &[Transaction]) -> BlockObservation {
        let mut observation = BlockObservation::default();
        self.height += 1;

        // Everything already pending is buried one block deeper
        self.pending_spend.confirm_all();
        self.pending_receive.confirm_all();

        for tx in transactions {
            let txid = tx.hash();

            for key in self.unseen_spends_settled_by(tx, &txid) {
                if let Some(unseen) = self.pending_spend_unseen.remove(&key) {
                    debug!(txid = %hash_to_hex(&txid), coins = unseen.coins.len(), "Spend seen in block");
                    for coin in unseen.coins {
                        self.pending_spend.insert(coin, txid);
                    }
                    observation.spends_seen += 1;
                }
            }

            for coin in CoinInfo::owned_outputs(tx, &self.locking_script) {
                if self.contains(&coin.outpoint) {
                    continue;
                }
                debug!(outpoint = %coin.outpoint, amount = coin.amount(), "Coin received");
                self.pending_receive.insert(coin, txid);
                observation.coins_received += 1;
            }
        }

        let finalized = self.pending_spend.take_matured(self.safe_block_amount);
        observation.spends_finalized = finalized.len();

        let promoted = self.pending_receive.take_matured(self.safe_block_amount);
        for tracked in &promoted {
            let amount = tracked.coin.amount();
            self.balance = self.balance.saturating_add(amount);
            observation.amount_confirmed = observation.amount_confirmed.saturating_add(amount);
            self.confirmed.insert(tracked.coin.outpoint, tracked.coin.clone());
        }
        self.record_maturity(Maturity { promoted, finalized });

        observation.spends_expired = self.expire_unseen_spends();

        if observation.amount_confirmed > 0 {
            info!(
                height = self.height,
                amount = observation.amount_confirmed,
                balance = self.balance,
                "Coins confirmed"
            );
        }
        self.debug_check();
        observation
    }

    /// Keys of the unseen spends `tx` settles: the entry keyed by its own
    /// hash, and any entry holding a coin one of its inputs consumes.
    fn unseen_spends_settled_by(&self, tx: &Transaction, txid: &Hash256) -> Vec<Hash256> {
        if self.pending_spend_unseen.is_empty() {
            return Vec::new();
        }

        let consumed: HashSet<OutPoint> = tx.inputs.iter().map(TransactionInput::outpoint).collect();
        let mut keys: Vec<Hash256> = self
            .pending_spend_unseen
            .iter()
            .filter(|(key, unseen)| {
                *key == txid || unseen.coins.iter().any(|coin| consumed.contains(&coin.outpoint))
            })
            .map(|(key, _)| *key)
            .collect();
        keys.sort_unstable();
        keys
    }

    fn unseen_key_for(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.pending_spend_unseen
            .iter()
            .find(|(_, unseen)| unseen.coins.iter().any(|coin| &coin.outpoint == outpoint))
            .map(|(key, _)| *key)
    }

    fn expire_unseen_spends(&mut self) -> usize {
        if self.unseen_spend_expiry == 0 {
            return 0;
        }

        let height = self.height;
        let expiry = self.unseen_spend_expiry;
        let expired: Vec<Hash256> = self
            .pending_spend_unseen
            .iter()
            .filter(|(_, unseen)| height.saturating_sub(unseen.committed_at) > expiry)
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            if let Some(unseen) = self.pending_spend_unseen.remove(key) {
                warn!(
                    txid = %hash_to_hex(key),
                    amount = unseen.amount(),
                    committed_at = unseen.committed_at,
                    "Spend never appeared in a block, returning coins"
                );
                self.restore_confirmed(unseen.coins);
            }
        }

        expired.len()
    }

    fn record_maturity(&mut self, maturity: Maturity) {
        let oldest_kept = self.height.saturating_sub(self.maturity_window);
        self.matured = self.matured.split_off(&oldest_kept.saturating_add(1));

        if self.maturity_window > 0 && !(maturity.promoted.is_empty() && maturity.finalized.is_empty()) {
            self.matured.insert(self.height, maturity);
        }
    }

    /// Undo what the block at the current height matured. Promoted coins
    /// leave the confirmed set and finalized spends are tracked again, both
    /// with the confirmations they matured at.
    fn reverse_maturity(&mut self) -> usize {
        let maturity = match self.matured.remove(&self.height) {
            Some(maturity) => maturity,
            None => return 0,
        };

        let mut reversed = 0;
        for tracked in maturity.promoted {
            match self.confirmed.remove(&tracked.coin.outpoint) {
                Some(coin) => {
                    self.balance = self.balance.saturating_sub(coin.amount());
                    self.pending_receive.restore(tracked);
                    reversed += 1;
                }
                None => debug!(
                    outpoint = %tracked.coin.outpoint,
                    "Promoted coin already committed to a spend, leaving it there"
                ),
            }
        }
        for tracked in maturity.finalized {
            if self.pending_spend.restore(tracked) {
                reversed += 1;
            }
        }
        reversed
    }

    fn restore_confirmed(&mut self, coins: Vec<CoinInfo>) {
        for coin in coins {
            self.balance = self.balance.saturating_add(coin.amount());
            self.confirmed.insert(coin.outpoint, coin);
        }
    }

    /// Roll a locally built spend that will never be mined back into the
    /// confirmed set. Returns the amount restored.
    pub fn abandon_spend(&mut self, txid: &Hash256) -> Result<u64, WalletError> {
        let unseen = self
            .pending_spend_unseen
            .remove(txid)
            .ok_or_else(|| WalletError::UnknownSpend(hash_to_hex(txid)))?;

        let amount = unseen.amount();
        self.restore_confirmed(unseen.coins);

        info!(txid = %hash_to_hex(txid), amount, "Abandoned spend");
        self.debug_check();
        Ok(amount)
    }

    /// Take back one block during a reorganization. Records must be applied
    /// tip first.
    pub fn rewind_block(&mut self, undo: &UndoBlock) {
        let undone = &undo.transaction_hashes;
        let maturities_reversed = self.reverse_maturity();

        // Receives the block created never happened
        let dropped = self.pending_receive.take_by_transaction(undone);

        // Spends the block carried are back to unseen
        let mut returned: BTreeMap<Hash256, Vec<CoinInfo>> = BTreeMap::new();
        for tracked in self.pending_spend.take_by_transaction(undone) {
            returned.entry(tracked.transaction).or_default().push(tracked.coin);
        }

        self.pending_spend.unconfirm_all();
        self.pending_receive.unconfirm_all();
        self.height = self.height.saturating_sub(1);

        let height = self.height;
        for (txid, coins) in returned {
            self.pending_spend_unseen
                .entry(txid)
                .or_insert_with(|| UnseenSpend {
                    coins: Vec::new(),
                    committed_at: height,
                })
                .coins
                .extend(coins);
        }

        // Value already past the safety depth: only a deep reorg reaches here
        let orphaned: Vec<OutPoint> = self
            .confirmed
            .keys()
            .filter(|outpoint| undone.contains(&outpoint.txid))
            .copied()
            .collect();
        for outpoint in orphaned {
            if let Some(coin) = self.confirmed.remove(&outpoint) {
                warn!(%outpoint, amount = coin.amount(), "Confirmed coin removed by reorganization");
                self.balance = self.balance.saturating_sub(coin.amount());
            }
        }
        for unseen in self.pending_spend_unseen.values_mut() {
            unseen.coins.retain(|coin| {
                let keep = !undone.contains(&coin.outpoint.txid);
                if !keep {
                    warn!(outpoint = %coin.outpoint, "Committed coin removed by reorganization");
                }
                keep
            });
        }
        self.pending_spend_unseen.retain(|_, unseen| !unseen.coins.is_empty());

        debug!(
            block = %hash_to_hex(&undo.block_hash),
            receives_dropped = dropped.len(),
            maturities_reversed,
            height = self.height,
            "Rewound block"
        );
        self.debug_check();
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let unseen_amount = self
            .pending_spend_unseen
            .values()
            .fold(0u64, |total, unseen| total.saturating_add(unseen.amount()));

        LedgerSnapshot {
            height: self.height,
            balance: self.balance,
            confirmed: CollectionSummary {
                coins: self.confirmed.len(),
                amount: self.balance,
            },
            pending_spend_unseen: CollectionSummary {
                coins: self.pending_spend_unseen.values().map(|unseen| unseen.coins.len()).sum(),
                amount: unseen_amount,
            },
            pending_spend: CollectionSummary {
                coins: self.pending_spend.len(),
                amount: self.pending_spend.total_amount(),
            },
            pending_receive: CollectionSummary {
                coins: self.pending_receive.len(),
                amount: self.pending_receive.total_amount(),
            },
        }
    }

    /// Every coin held, with its state
    pub fn coins(&self) -> Vec<CoinView> {
        let confirmed = self.confirmed.values().map(|coin| CoinView {
            coin: coin.clone(),
            state: CoinState::Confirmed,
            confirmations: None,
        });
        let unseen = self.pending_spend_unseen.values().flat_map(|unseen| {
            unseen.coins.iter().map(|coin| CoinView {
                coin: coin.clone(),
                state: CoinState::PendingSpendUnseen,
                confirmations: None,
            })
        });
        let pending = |tracker: &ConfirmationTracker, state: CoinState| -> Vec<CoinView> {
            tracker
                .iter()
                .map(|tracked| CoinView {
                    coin: tracked.coin.clone(),
                    state,
                    confirmations: Some(tracked.confirmations),
                })
                .collect()
        };

        confirmed
            .chain(unseen)
            .chain(pending(&self.pending_spend, CoinState::PendingSpend))
            .chain(pending(&self.pending_receive, CoinState::PendingReceive))
            .collect()
    }

    /// Hashes of locally built spends not yet seen in a block
    pub fn unseen_spends(&self) -> Vec<Hash256> {
        let mut keys: Vec<Hash256> = self.pending_spend_unseen.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Assert that the collections are disjoint and that the balance equals
    /// the confirmed total. A violation is a bug in the ledger.
    pub fn check_invariants(&self) {
        let mut seen: HashSet<OutPoint> = HashSet::new();
        let all = self
            .confirmed
            .keys()
            .chain(self.pending_spend_unseen.values().flat_map(|unseen| unseen.coins.iter().map(|coin| &coin.outpoint)))
            .chain(self.pending_spend.iter().map(|tracked| &tracked.coin.outpoint))
            .chain(self.pending_receive.iter().map(|tracked| &tracked.coin.outpoint));
        for outpoint in all {
            assert!(seen.insert(*outpoint), "coin {} held in two ledger collections", outpoint);
        }

        let confirmed_total: u128 = self.confirmed.values().map(|coin| u128::from(coin.amount())).sum();
        assert_eq!(
            u128::from(self.balance),
            confirmed_total,
            "balance does not match confirmed coins"
        );
    }

    fn debug_check(&self) {
        #[cfg(debug_assertions)]
        self.check_invariants();
    }
}
