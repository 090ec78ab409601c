use thiserror::Error;

use coin_core::IdentityError;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Spend amount must be greater than zero")]
    ZeroAmount,

    #[error("Spend amount plus fee overflows")]
    AmountOverflow,

    #[error("Signing error: {0}")]
    Signing(#[from] IdentityError),

    #[error("No unconfirmed spend with transaction hash {0}")]
    UnknownSpend(String),
}
