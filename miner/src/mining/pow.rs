use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use coin_core::{hash_to_hex, Block};

/// Hashes between two progress log lines
pub const PROGRESS_INTERVAL: u64 = 1_000_000;

/// Largest meaningful nonce limit: every value of the 32-bit header nonce
const NONCE_SPACE: u64 = u32::MAX as u64 + 1;

/// How a proof-of-work search ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The block's header hash is strictly below its target
    Found { block: Block, attempts: u64 },
    /// The cancellation token fired before a nonce was found
    Cancelled { attempts: u64 },
    /// Every nonce in `[0, nonce_limit)` was tried without success
    Exhausted { attempts: u64 },
}

/// Iterates the header nonce of a candidate block looking for a hash below
/// the block's difficulty target. Blocking; run it off the async runtime.
#[derive(Debug)]
pub struct ProofOfWorkSearch {
    block: Block,
    nonce_limit: u64,
    hash_counter: Option<Arc<AtomicU64>>,
}

impl ProofOfWorkSearch {
    pub fn new(block: Block, nonce_limit: u64) -> Self {
        Self {
            block,
            nonce_limit: nonce_limit.min(NONCE_SPACE),
            hash_counter: None,
        }
    }

    /// Bump `counter` once per hash while the search runs
    pub fn with_hash_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.hash_counter = Some(counter);
        self
    }

    /// Try nonces `0, 1, 2, ...` until one satisfies the target, `cancel`
    /// fires, or the nonce limit is reached. The token is checked before
    /// every hash.
    pub fn run(mut self, cancel: &CancellationToken) -> SearchOutcome {
        let mut attempts = 0u64;

        for nonce in 0..self.nonce_limit {
            if cancel.is_cancelled() {
                debug!(attempts, "Proof-of-work search cancelled");
                return SearchOutcome::Cancelled { attempts };
            }

            // nonce_limit is capped at NONCE_SPACE
            self.block.header.nonce = nonce as u32;
            attempts += 1;
            if let Some(counter) = &self.hash_counter {
                counter.fetch_add(1, Ordering::SeqCst);
            }

            if self.block.meets_target() {
                debug!(
                    attempts,
                    nonce,
                    hash = %hash_to_hex(&self.block.hash()),
                    "Found valid nonce"
                );
                return SearchOutcome::Found {
                    block: self.block,
                    attempts,
                };
            }

            if attempts % PROGRESS_INTERVAL == 0 {
                debug!(attempts, "Mining in progress");
            }
        }

        SearchOutcome::Exhausted { attempts }
    }
}
