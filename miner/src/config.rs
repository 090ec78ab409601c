use std::time::Duration;

use coin_core::Hash256;

use crate::mining::reward::{RewardError, RewardSchedule};

/// Parameters of the mining core. The node builds this from its
/// `[miner]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerConfig {
    /// Candidate nonces are `[0, nonce_limit)`
    pub nonce_limit: u64,
    pub initial_subsidy: u64,
    /// Blocks between two subsidy halvings
    pub subsidy_halving_rate: u64,
    pub max_halvings: u64,
    /// Deadline for one input-sum oracle round-trip
    pub oracle_timeout: Duration,
    /// Header hashes must be strictly below this value
    pub difficulty_target: Hash256,
}

impl Default for MinerConfig {
    fn default() -> Self {
        let mut difficulty_target = [0xff; 32];
        difficulty_target[0] = 0x00;
        difficulty_target[1] = 0x0f;

        Self {
            nonce_limit: 1 << 24,
            initial_subsidy: 50_000,
            subsidy_halving_rate: 1_000,
            max_halvings: 10,
            oracle_timeout: Duration::from_secs(1),
            difficulty_target,
        }
    }
}

impl MinerConfig {
    pub fn reward_schedule(&self) -> Result<RewardSchedule, RewardError> {
        RewardSchedule::new(self.initial_subsidy, self.subsidy_halving_rate, self.max_halvings)
    }
}
