use std::time::Duration;
use tracing::debug;

use coin_core::{hash_to_hex, Transaction};

use super::oracle::InputSumOracle;
use super::reward::RewardSchedule;
use crate::error::MinerError;

/// Builds the reward-bearing coinbase for a mining pool: subsidy plus the
/// fees the pool pays, sent to the miner's own locking script.
#[derive(Debug, Clone)]
pub struct CoinbaseBuilder {
    schedule: RewardSchedule,
    locking_script: String,
}

impl CoinbaseBuilder {
    pub fn new(schedule: RewardSchedule, locking_script: impl Into<String>) -> Self {
        Self {
            schedule,
            locking_script: locking_script.into(),
        }
    }

    pub fn schedule(&self) -> &RewardSchedule {
        &self.schedule
    }

    /// Ask the oracle for the pool's input sums, bounded by `timeout`, and
    /// build the coinbase for the block at `chain_length`.
    pub async fn generate(
        &self,
        oracle: &dyn InputSumOracle,
        pool: &[Transaction],
        chain_length: u64,
        timeout: Duration,
    ) -> Result<Transaction, MinerError> {
        let input_sums = tokio::time::timeout(timeout, oracle.input_sums(pool))
            .await
            .map_err(|_| MinerError::OracleTimeout(timeout))??;

        let fees = Self::total_fees(pool, &input_sums)?;
        debug!(chain_length, fees, transactions = pool.len(), "Computed pool fees");

        self.build(chain_length, fees)
    }

    /// Sum of `inputs - outputs` over the pool
    pub fn total_fees(pool: &[Transaction], input_sums: &[u64]) -> Result<u64, MinerError> {
        if pool.len() != input_sums.len() {
            return Err(MinerError::OracleMismatch {
                expected: pool.len(),
                returned: input_sums.len(),
            });
        }

        pool.iter().zip(input_sums).try_fold(0u64, |total, (tx, input_sum)| {
            let invalid = |reason: &str| MinerError::InvalidFee {
                txid: hash_to_hex(&tx.hash()),
                reason: reason.to_string(),
            };

            let output_sum = tx.sum_outputs().map_err(|_| invalid("output sum overflows"))?;
            let fee = input_sum
                .checked_sub(output_sum)
                .ok_or_else(|| invalid("outputs exceed inputs"))?;

            total.checked_add(fee).ok_or_else(|| invalid("fee total overflows"))
        })
    }

    /// The coinbase for the block at `chain_length`, paying `subsidy + fees`
    pub fn build(&self, chain_length: u64, fees: u64) -> Result<Transaction, MinerError> {
        let subsidy = self.schedule.reward(chain_length);
        let amount = subsidy.checked_add(fees).ok_or_else(|| MinerError::InvalidFee {
            txid: "coinbase".to_string(),
            reason: format!("subsidy {} plus fees {} overflows", subsidy, fees),
        })?;

        Ok(Transaction::coinbase(chain_length, amount, self.locking_script.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coin_core::{TransactionInput, TransactionOutput};

    use crate::mining::oracle::OracleError;

    struct FixedOracle(Vec<u64>);

    #[async_trait]
    impl InputSumOracle for FixedOracle {
        async fn input_sums(&self, _transactions: &[Transaction]) -> Result<Vec<u64>, OracleError> {
            Ok(self.0.clone())
        }
    }

    struct SilentOracle;

    #[async_trait]
    impl InputSumOracle for SilentOracle {
        async fn input_sums(&self, _transactions: &[Transaction]) -> Result<Vec<u64>, OracleError> {
            std::future::pending().await
        }
    }

    fn spend(outputs: &[u64]) -> Transaction {
        Transaction::new(
            1,
            vec![TransactionInput::new([3u8; 32], 0, vec![1])],
            outputs.iter().map(|amount| TransactionOutput::new(*amount, "bob")).collect(),
            0,
        )
    }

    fn builder() -> CoinbaseBuilder {
        CoinbaseBuilder::new(RewardSchedule::new(50, 10, 2).unwrap(), "miner")
    }

    #[tokio::test]
    async fn test_coinbase_pays_subsidy_plus_fees() {
        let pool = vec![spend(&[90]), spend(&[40, 5])];
        let oracle = FixedOracle(vec![100, 50]);

        let coinbase = builder()
            .generate(&oracle, &pool, 12, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.coinbase_height(), Some(12));
        assert_eq!(coinbase.outputs[0].amount, 25 + 10 + 5);
        assert_eq!(coinbase.outputs[0].locking_script, "miner");
    }

    #[tokio::test]
    async fn test_empty_pool_pays_subsidy() {
        let coinbase = builder()
            .generate(&FixedOracle(Vec::new()), &[], 0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(coinbase.outputs[0].amount, 50);
    }

    #[tokio::test]
    async fn test_oracle_timeout() {
        let result = builder()
            .generate(&SilentOracle, &[spend(&[1])], 0, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(MinerError::OracleTimeout(_))));
    }

    #[test]
    fn test_outputs_exceeding_inputs_rejected() {
        let result = CoinbaseBuilder::total_fees(&[spend(&[10, 20])], &[29]);
        assert!(matches!(result, Err(MinerError::InvalidFee { .. })));
    }

    #[test]
    fn test_zero_fee_transaction_accepted() {
        assert_eq!(CoinbaseBuilder::total_fees(&[spend(&[30])], &[30]).unwrap(), 0);
    }

    #[test]
    fn test_sum_count_mismatch() {
        let result = CoinbaseBuilder::total_fees(&[spend(&[1]), spend(&[1])], &[5]);
        assert!(matches!(
            result,
            Err(MinerError::OracleMismatch { expected: 2, returned: 1 })
        ));
    }

    #[test]
    fn test_fee_total_overflow_rejected() {
        let result = CoinbaseBuilder::total_fees(&[spend(&[0]), spend(&[0])], &[u64::MAX, 1]);
        assert!(matches!(result, Err(MinerError::InvalidFee { .. })));
    }
}
