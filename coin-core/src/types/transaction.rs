use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::hash::{hash256, Hash256, ZERO_HASH};

/// Output index carried by the degenerate coinbase input
pub const COINBASE_OUTPUT_INDEX: u32 = u32::MAX;

/// Reference to a transaction output
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction ID (hash)
    pub txid: Hash256,
    /// Output index in the transaction
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

/// Represents a transaction input referencing a previous output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    /// Hash of the transaction whose output is spent
    pub reference_transaction_hash: Hash256,
    /// Index of the output in the referenced transaction
    pub output_index: u32,
    /// Signature material proving ownership of the referenced output
    pub unlocking_script: Vec<u8>,
}

/// Represents a transaction output with an amount and spending conditions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionOutput {
    /// Amount of coins in this output
    pub amount: u64,
    /// Identity that may spend this output
    pub locking_script: String,
}

/// Main transaction structure containing inputs and outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Version number for protocol upgrades
    pub version: u32,
    /// List of inputs spending previous outputs
    pub inputs: Vec<TransactionInput>,
    /// List of new outputs created by this transaction
    pub outputs: Vec<TransactionOutput>,
    /// Lock time (block height or timestamp)
    pub lock_time: u32,
}

impl TransactionInput {
    pub fn new(reference_transaction_hash: Hash256, output_index: u32, unlocking_script: Vec<u8>) -> Self {
        Self {
            reference_transaction_hash,
            output_index,
            unlocking_script,
        }
    }

    /// The degenerate input carried by a coinbase transaction. Its script
    /// commits to the block height so coinbases of different blocks differ.
    pub fn coinbase(height: u64) -> Self {
        Self::new(ZERO_HASH, COINBASE_OUTPUT_INDEX, height.to_le_bytes().to_vec())
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.reference_transaction_hash, self.output_index)
    }

    pub fn is_coinbase(&self) -> bool {
        self.reference_transaction_hash == ZERO_HASH && self.output_index == COINBASE_OUTPUT_INDEX
    }
}

impl TransactionOutput {
    pub fn new(amount: u64, locking_script: impl Into<String>) -> Self {
        Self {
            amount,
            locking_script: locking_script.into(),
        }
    }
}

impl Transaction {
    /// Create a new transaction
    pub fn new(
        version: u32,
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        lock_time: u32,
    ) -> Self {
        Self {
            version,
            inputs,
            outputs,
            lock_time,
        }
    }

    /// Build the value-minting transaction for the block at `height` paying
    /// `amount` to `locking_script`
    pub fn coinbase(height: u64, amount: u64, locking_script: impl Into<String>) -> Self {
        Self::new(
            0,
            vec![TransactionInput::coinbase(height)],
            vec![TransactionOutput::new(amount, locking_script)],
            0,
        )
    }

    /// A coinbase has exactly one degenerate input and one reward output
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase() && self.outputs.len() == 1
    }

    /// Block height committed to by a coinbase transaction
    pub fn coinbase_height(&self) -> Option<u64> {
        if !self.is_coinbase() {
            return None;
        }
        let script: [u8; 8] = self.inputs[0].unlocking_script.as_slice().try_into().ok()?;
        Some(u64::from_le_bytes(script))
    }

    /// Calculate the transaction hash
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize_for_hash(true))
    }

    /// Hash committed to by input signatures: the transaction with every
    /// unlocking script left out.
    pub fn signature_hash(&self) -> Hash256 {
        hash256(&self.serialize_for_hash(false))
    }

    /// Sum of all output amounts, failing on overflow
    pub fn sum_outputs(&self) -> Result<u64, CoreError> {
        self.outputs.iter().try_fold(0u64, |acc, output| {
            acc.checked_add(output.amount).ok_or_else(|| {
                CoreError::ArithmeticOverflow(format!(
                    "output sum of transaction {}",
                    hex::encode(self.hash())
                ))
            })
        })
    }

    /// Outputs of this transaction paired with the outpoints that identify them
    pub fn outpoints(&self) -> impl Iterator<Item = (OutPoint, &TransactionOutput)> + '_ {
        let txid = self.hash();
        self.outputs
            .iter()
            .enumerate()
            .map(move |(index, output)| (OutPoint::new(txid, index as u32), output))
    }

    fn serialize_for_hash(&self, include_unlocking: bool) -> Vec<u8> {
        let mut buffer = Vec::new();

        buffer.extend_from_slice(&self.version.to_le_bytes());

        buffer.extend_from_slice(&(self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            buffer.extend_from_slice(&input.reference_transaction_hash);
            buffer.extend_from_slice(&input.output_index.to_le_bytes());
            if include_unlocking {
                buffer.extend_from_slice(&(input.unlocking_script.len() as u64).to_le_bytes());
                buffer.extend_from_slice(&input.unlocking_script);
            }
        }

        buffer.extend_from_slice(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            buffer.extend_from_slice(&output.amount.to_le_bytes());
            buffer.extend_from_slice(&(output.locking_script.len() as u64).to_le_bytes());
            buffer.extend_from_slice(output.locking_script.as_bytes());
        }

        buffer.extend_from_slice(&self.lock_time.to_le_bytes());
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spend(amounts: &[u64]) -> Transaction {
        Transaction::new(
            1,
            vec![TransactionInput::new([7u8; 32], 0, vec![1, 2, 3])],
            amounts
                .iter()
                .map(|amount| TransactionOutput::new(*amount, "bob"))
                .collect(),
            0,
        )
    }

    #[test]
    fn test_coinbase_shape() {
        let coinbase = Transaction::coinbase(7, 50, "miner");
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.coinbase_height(), Some(7));
        assert_eq!(coinbase.outputs[0].amount, 50);
        assert_eq!(coinbase.outputs[0].locking_script, "miner");

        assert!(!spend(&[10]).is_coinbase());
        assert_eq!(spend(&[10]).coinbase_height(), None);
    }

    #[test]
    fn test_coinbases_at_different_heights_differ() {
        assert_ne!(
            Transaction::coinbase(1, 50, "miner").hash(),
            Transaction::coinbase(2, 50, "miner").hash()
        );
    }

    #[test]
    fn test_signature_hash_ignores_unlocking_script() {
        let tx = spend(&[10, 20]);
        let mut resigned = tx.clone();
        resigned.inputs[0].unlocking_script = vec![9, 9];

        assert_eq!(tx.signature_hash(), resigned.signature_hash());
        assert_ne!(tx.hash(), resigned.hash());
    }

    #[test]
    fn test_sum_outputs_detects_overflow() {
        assert_eq!(spend(&[10, 20]).sum_outputs().unwrap(), 30);
        assert!(spend(&[u64::MAX, 1]).sum_outputs().is_err());
    }

    #[test]
    fn test_outpoints_use_transaction_hash() {
        let tx = spend(&[10, 20]);
        let outpoints: Vec<_> = tx.outpoints().map(|(outpoint, _)| outpoint).collect();
        assert_eq!(outpoints, vec![OutPoint::new(tx.hash(), 0), OutPoint::new(tx.hash(), 1)]);
    }
}
