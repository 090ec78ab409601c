pub mod coinbase;
pub mod coordinator;
pub mod oracle;
pub mod pow;
pub mod reward;
pub mod template;

pub use coordinator::{Miner, MiningOutcome};
pub use pow::PROGRESS_INTERVAL;
