use std::collections::BTreeMap;

use coin_core::{Hash256, OutPoint};

use crate::coin::CoinInfo;

/// A pending coin and the confirmations it has accumulated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedCoin {
    pub coin: CoinInfo,
    pub confirmations: u64,
    /// The transaction that moved the coin into this state: its creator for
    /// a receive, its spender for a spend
    pub transaction: Hash256,
}

/// Confirmation counters for one pending collection of the ledger
#[derive(Debug, Default, Clone)]
pub struct ConfirmationTracker {
    coins: BTreeMap<OutPoint, TrackedCoin>,
}

impl ConfirmationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `coin` at zero confirmations. Returns false and leaves
    /// the existing entry alone if the coin is already tracked.
    pub fn insert(&mut self, coin: CoinInfo, transaction: Hash256) -> bool {
        if self.coins.contains_key(&coin.outpoint) {
            return false;
        }

        self.coins.insert(
            coin.outpoint,
            TrackedCoin {
                coin,
                confirmations: 0,
                transaction,
            },
        );
        true
    }

    /// Put back a coin taken out earlier, keeping its confirmations.
    /// Returns false if the coin is already tracked.
    pub fn restore(&mut self, tracked: TrackedCoin) -> bool {
        if self.coins.contains_key(&tracked.coin.outpoint) {
            return false;
        }
        self.coins.insert(tracked.coin.outpoint, tracked);
        true
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.coins.contains_key(outpoint)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TrackedCoin> {
        self.coins.get(outpoint)
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<TrackedCoin> {
        self.coins.remove(outpoint)
    }

    /// One more block buried every tracked coin
    pub fn confirm_all(&mut self) {
        for tracked in self.coins.values_mut() {
            tracked.confirmations = tracked.confirmations.saturating_add(1);
        }
    }

    /// One block was taken back off every tracked coin
    pub fn unconfirm_all(&mut self) {
        for tracked in self.coins.values_mut() {
            tracked.confirmations = tracked.confirmations.saturating_sub(1);
        }
    }

    /// Remove and return every coin with at least `depth` confirmations
    pub fn take_matured(&mut self, depth: u64) -> Vec<TrackedCoin> {
        self.take_where(|tracked| tracked.confirmations >= depth)
    }

    /// Remove and return every coin moved here by one of `transactions`
    pub fn take_by_transaction(&mut self, transactions: &[Hash256]) -> Vec<TrackedCoin> {
        self.take_where(|tracked| transactions.contains(&tracked.transaction))
    }

    fn take_where(&mut self, predicate: impl Fn(&TrackedCoin) -> bool) -> Vec<TrackedCoin> {
        let matching: Vec<OutPoint> = self
            .coins
            .values()
            .filter(|tracked| predicate(tracked))
            .map(|tracked| tracked.coin.outpoint)
            .collect();

        matching
            .iter()
            .filter_map(|outpoint| self.coins.remove(outpoint))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedCoin> {
        self.coins.values()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn total_amount(&self) -> u64 {
        self.coins
            .values()
            .fold(0u64, |total, tracked| total.saturating_add(tracked.coin.amount()))
    }
}
