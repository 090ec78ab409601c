use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewardError {
    #[error("Subsidy halving rate must be greater than zero")]
    ZeroHalvingRate,
}

/// Minting subsidy as a function of chain length.
///
/// The subsidy halves every `halving_rate` blocks and drops to zero once
/// `max_halvings` halvings have occurred. Only integer arithmetic is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardSchedule {
    initial_subsidy: u64,
    halving_rate: u64,
    max_halvings: u64,
}

impl RewardSchedule {
    pub fn new(initial_subsidy: u64, halving_rate: u64, max_halvings: u64) -> Result<Self, RewardError> {
        if halving_rate == 0 {
            return Err(RewardError::ZeroHalvingRate);
        }

        Ok(Self {
            initial_subsidy,
            halving_rate,
            max_halvings,
        })
    }

    pub fn initial_subsidy(&self) -> u64 {
        self.initial_subsidy
    }

    pub fn halving_rate(&self) -> u64 {
        self.halving_rate
    }

    pub fn max_halvings(&self) -> u64 {
        self.max_halvings
    }

    /// Calculate the subsidy for the block built on a chain of `chain_length` blocks
    pub fn reward(&self, chain_length: u64) -> u64 {
        let halvings = self.subsidy_era(chain_length);

        // Cap at maximum halvings
        if halvings >= self.max_halvings {
            return 0;
        }

        u32::try_from(halvings)
            .ok()
            .and_then(|shift| self.initial_subsidy.checked_shr(shift))
            .unwrap_or(0)
    }

    /// Which halving period `chain_length` falls into
    pub fn subsidy_era(&self, chain_length: u64) -> u64 {
        chain_length / self.halving_rate
    }

    /// Total subsidy minted by the first `chain_length` blocks
    pub fn total_issued(&self, chain_length: u64) -> u64 {
        let mut total = 0u64;
        let mut current = 0u64;
        let mut era = 0u64;

        while current < chain_length && era < self.max_halvings {
            let era_end = (era + 1).saturating_mul(self.halving_rate);
            let blocks_in_era = chain_length.min(era_end) - current;

            total = total.saturating_add(blocks_in_era.saturating_mul(self.reward(current)));

            current = era_end;
            era += 1;
        }

        total
    }
}
