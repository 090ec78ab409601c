mod error;
mod state;
mod utxo;

pub use error::ChainError;
pub use state::ChainState;
pub use utxo::{UnspentOutput, UtxoSet};
