use thiserror::Error;

use coin_core::{CoreError, OutPoint};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Block does not extend the tip: expected parent {expected}, found {found}")]
    UnknownParent { expected: String, found: String },

    #[error("Block carries difficulty target {found}, expected {expected}")]
    WrongDifficultyTarget { expected: String, found: String },

    #[error("Block hash does not meet its difficulty target")]
    InsufficientWork,

    #[error("Merkle root does not match the block's transactions")]
    InvalidMerkleRoot,

    #[error("Invalid coinbase: {0}")]
    InvalidCoinbase(String),

    #[error("Missing or spent input: {0}")]
    MissingInput(OutPoint),

    #[error("Output {0} spent twice")]
    DoubleSpend(OutPoint),

    #[error("Transaction {txid} spends {inputs} but creates {outputs}")]
    InsufficientInputs { txid: String, inputs: u64, outputs: u64 },

    #[error("Coinbase claims {claimed}, at most {allowed} allowed")]
    ExcessiveReward { claimed: u64, allowed: u64 },

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    #[error("Cannot disconnect {requested} blocks from a chain of {height}")]
    TooDeep { requested: usize, height: u64 },

    #[error(transparent)]
    Core(#[from] CoreError),
}
