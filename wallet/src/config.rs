/// Wallet parameters. The node builds this from its `[wallet]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    /// Confirmations after which a coin's state change is final
    pub safe_block_amount: u64,
    /// Blocks after which a locally built spend that never appeared in a
    /// block is rolled back into the confirmed set. Zero disables expiry.
    pub unseen_spend_expiry: u64,
    /// How many recently observed block hashes are remembered to ignore
    /// duplicate deliveries
    pub recent_block_cache: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            safe_block_amount: 6,
            unseen_spend_expiry: 100,
            recent_block_cache: 128,
        }
    }
}
