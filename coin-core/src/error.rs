use thiserror::Error;

use crate::identity::IdentityError;

/// Main error type for the coin core data model
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    #[error("Block has no coinbase transaction")]
    MissingCoinbase,
}
