use std::collections::HashMap;

use coin_core::{OutPoint, Transaction, TransactionOutput};

use super::error::ChainError;

/// An unspent output and where it was created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub output: TransactionOutput,
    /// Height of the block that created it
    pub height: u64,
    pub is_coinbase: bool,
}

/// In-memory set of unspent outputs
#[derive(Debug, Default)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, UnspentOutput>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&UnspentOutput> {
        self.utxos.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn add(&mut self, outpoint: OutPoint, output: UnspentOutput) {
        self.utxos.insert(outpoint, output);
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<UnspentOutput> {
        self.utxos.remove(outpoint)
    }

    /// Remove the transaction's inputs and add its outputs. Returns the
    /// outputs that were consumed.
    pub fn process_transaction(&mut self, tx: &Transaction, height: u64) -> Vec<(OutPoint, UnspentOutput)> {
        let is_coinbase = tx.is_coinbase();
        let mut spent = Vec::new();

        if !is_coinbase {
            for input in &tx.inputs {
                let outpoint = input.outpoint();
                if let Some(output) = self.remove(&outpoint) {
                    spent.push((outpoint, output));
                }
            }
        }

        for (outpoint, output) in tx.outpoints() {
            self.add(
                outpoint,
                UnspentOutput {
                    output: output.clone(),
                    height,
                    is_coinbase,
                },
            );
        }

        spent
    }

    /// Sum of the outputs the transaction's inputs reference. Fails if any
    /// of them is not in the set.
    pub fn input_sum(&self, tx: &Transaction) -> Result<u64, ChainError> {
        tx.inputs.iter().try_fold(0u64, |acc, input| {
            let outpoint = input.outpoint();
            let unspent = self.get(&outpoint).ok_or(ChainError::MissingInput(outpoint))?;
            acc.checked_add(unspent.output.amount)
                .ok_or_else(|| ChainError::Overflow(format!("input sum at {}", outpoint)))
        })
    }

    /// Fee paid by a transaction spending outputs of this set
    pub fn fee(&self, tx: &Transaction) -> Result<u64, ChainError> {
        let inputs = self.input_sum(tx)?;
        let outputs = tx.sum_outputs()?;
        inputs.checked_sub(outputs).ok_or_else(|| ChainError::InsufficientInputs {
            txid: hex::encode(tx.hash()),
            inputs,
            outputs,
        })
    }

    /// Input sums for a batch, with unknown inputs counted as zero
    pub fn input_sums(&self, transactions: &[Transaction]) -> Vec<u64> {
        transactions
            .iter()
            .map(|tx| {
                tx.inputs
                    .iter()
                    .filter_map(|input| self.get(&input.outpoint()))
                    .fold(0u64, |acc, unspent| acc.saturating_add(unspent.output.amount))
            })
            .collect()
    }

    /// Total amount locked to `locking_script`
    pub fn balance_of(&self, locking_script: &str) -> u64 {
        self.utxos
            .values()
            .filter(|unspent| unspent.output.locking_script == locking_script)
            .fold(0u64, |acc, unspent| acc.saturating_add(unspent.output.amount))
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coin_core::TransactionInput;

    #[test]
    fn test_process_transaction_moves_value() {
        let mut utxos = UtxoSet::new();
        let coinbase = Transaction::coinbase(0, 50, "alice");
        utxos.process_transaction(&coinbase, 0);
        assert_eq!(utxos.balance_of("alice"), 50);

        let spend = Transaction::new(
            1,
            vec![TransactionInput::new(coinbase.hash(), 0, vec![1])],
            vec![TransactionOutput::new(30, "bob"), TransactionOutput::new(15, "alice")],
            0,
        );
        assert_eq!(utxos.fee(&spend).unwrap(), 5);

        let spent = utxos.process_transaction(&spend, 1);
        assert_eq!(spent.len(), 1);
        assert!(spent[0].1.is_coinbase);
        assert_eq!(utxos.balance_of("alice"), 15);
        assert_eq!(utxos.balance_of("bob"), 30);
        assert_eq!(utxos.len(), 2);

        // The coinbase output is gone now
        assert!(matches!(utxos.fee(&spend), Err(ChainError::MissingInput(_))));
        assert_eq!(utxos.input_sums(&[spend]), vec![0]);
    }

    #[test]
    fn test_fee_rejects_overspend() {
        let mut utxos = UtxoSet::new();
        let coinbase = Transaction::coinbase(0, 10, "alice");
        utxos.process_transaction(&coinbase, 0);

        let spend = Transaction::new(
            1,
            vec![TransactionInput::new(coinbase.hash(), 0, vec![1])],
            vec![TransactionOutput::new(11, "bob")],
            0,
        );
        assert!(matches!(
            utxos.fee(&spend),
            Err(ChainError::InsufficientInputs { inputs: 10, outputs: 11, .. })
        ));
    }
}
