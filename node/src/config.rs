use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use coin_core::hash::hex_to_hash256;

use crate::mempool::TransactionPoolConfig;

#[derive(Debug, Error)]
pub enum NodeConfigValidationError {
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NodeConfig {
    pub miner: MinerConfig,
    pub wallet: WalletConfig,
    pub mempool: MempoolConfig,
    pub node: GeneralConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MinerConfig {
    pub nonce_limit: u64,
    pub initial_subsidy: u64,
    pub subsidy_halving_rate: u64,
    pub max_halvings: u64,
    #[serde(with = "duration_serde")]
    pub oracle_timeout: Duration,
    /// Big-endian hex; header hashes must be strictly below it
    pub difficulty_target: String,
    /// Pause between two mining attempts
    #[serde(with = "duration_serde")]
    pub mining_interval: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WalletConfig {
    pub safe_block_amount: u64,
    pub unseen_spend_expiry: u64,
    pub recent_block_cache: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MempoolConfig {
    pub max_size: usize,
    pub priority_threshold: u64,
    pub max_block_transactions: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneralConfig {
    pub log_level: String,
    pub enable_mining: bool,
    pub has_wallet: bool,
    /// Hex secret key of the node's identity; a fresh key is generated when unset
    pub secret_key: Option<String>,
}

impl MinerConfig {
    pub fn validate(&self) -> Result<(), NodeConfigValidationError> {
        if self.subsidy_halving_rate == 0 {
            return Err(NodeConfigValidationError::InvalidValue(
                "miner.subsidy_halving_rate must be > 0".to_string(),
            ));
        }
        if self.nonce_limit == 0 {
            return Err(NodeConfigValidationError::InvalidValue(
                "miner.nonce_limit must be > 0".to_string(),
            ));
        }
        if self.nonce_limit > u64::from(u32::MAX) + 1 {
            return Err(NodeConfigValidationError::InvalidValue(
                "miner.nonce_limit cannot exceed the 32-bit nonce space".to_string(),
            ));
        }
        if self.oracle_timeout.is_zero() {
            return Err(NodeConfigValidationError::InvalidValue(
                "miner.oracle_timeout must be > 0".to_string(),
            ));
        }
        if self.mining_interval.is_zero() {
            return Err(NodeConfigValidationError::InvalidValue(
                "miner.mining_interval must be > 0".to_string(),
            ));
        }
        hex_to_hash256(&self.difficulty_target).map_err(|e| {
            NodeConfigValidationError::InvalidValue(format!(
                "miner.difficulty_target is not a 32-byte hex value: {e}"
            ))
        })?;
        Ok(())
    }
}

impl WalletConfig {
    pub fn validate(&self) -> Result<(), NodeConfigValidationError> {
        if self.recent_block_cache == 0 {
            return Err(NodeConfigValidationError::InvalidValue(
                "wallet.recent_block_cache must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl MempoolConfig {
    pub fn validate(&self) -> Result<(), NodeConfigValidationError> {
        if self.max_size == 0 {
            return Err(NodeConfigValidationError::InvalidValue(
                "mempool.max_size must be > 0".to_string(),
            ));
        }
        if self.max_block_transactions > self.max_size {
            return Err(NodeConfigValidationError::InvalidValue(
                "mempool.max_block_transactions cannot exceed mempool.max_size".to_string(),
            ));
        }
        Ok(())
    }
}

impl GeneralConfig {
    pub fn validate(&self) -> Result<(), NodeConfigValidationError> {
        if self.log_level.trim().is_empty() {
            return Err(NodeConfigValidationError::MissingField("node.log_level".to_string()));
        }
        if self.enable_mining && !self.has_wallet {
            return Err(NodeConfigValidationError::InvalidValue(
                "node.enable_mining requires node.has_wallet to receive rewards".to_string(),
            ));
        }
        if let Some(secret_key) = &self.secret_key {
            let bytes = hex::decode(secret_key).map_err(|e| {
                NodeConfigValidationError::InvalidValue(format!("node.secret_key is not hex: {e}"))
            })?;
            if bytes.len() != 32 {
                return Err(NodeConfigValidationError::InvalidValue(
                    "node.secret_key must be 32 bytes".to_string(),
                ));
            }
        }
        Ok(())
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        let defaults = miner::MinerConfig::default();
        Self {
            nonce_limit: defaults.nonce_limit,
            initial_subsidy: defaults.initial_subsidy,
            subsidy_halving_rate: defaults.subsidy_halving_rate,
            max_halvings: defaults.max_halvings,
            oracle_timeout: defaults.oracle_timeout,
            difficulty_target: hex::encode(defaults.difficulty_target),
            mining_interval: Duration::from_millis(500),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        let defaults = wallet::WalletConfig::default();
        Self {
            safe_block_amount: defaults.safe_block_amount,
            unseen_spend_expiry: defaults.unseen_spend_expiry,
            recent_block_cache: defaults.recent_block_cache,
        }
    }
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5000,
            priority_threshold: 0,
            max_block_transactions: 500,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_mining: true,
            has_wallet: true,
            secret_key: None,
        }
    }
}

impl TryFrom<&MinerConfig> for miner::MinerConfig {
    type Error = NodeConfigValidationError;

    fn try_from(config: &MinerConfig) -> Result<Self, Self::Error> {
        let difficulty_target = hex_to_hash256(&config.difficulty_target).map_err(|e| {
            NodeConfigValidationError::InvalidValue(format!("miner.difficulty_target: {e}"))
        })?;

        Ok(Self {
            nonce_limit: config.nonce_limit,
            initial_subsidy: config.initial_subsidy,
            subsidy_halving_rate: config.subsidy_halving_rate,
            max_halvings: config.max_halvings,
            oracle_timeout: config.oracle_timeout,
            difficulty_target,
        })
    }
}

impl From<&WalletConfig> for wallet::WalletConfig {
    fn from(config: &WalletConfig) -> Self {
        Self {
            safe_block_amount: config.safe_block_amount,
            unseen_spend_expiry: config.unseen_spend_expiry,
            recent_block_cache: config.recent_block_cache,
        }
    }
}

impl From<&MempoolConfig> for TransactionPoolConfig {
    fn from(config: &MempoolConfig) -> Self {
        Self {
            max_size: config.max_size,
            priority_threshold: config.priority_threshold,
            max_block_transactions: config.max_block_transactions,
        }
    }
}

impl NodeConfig {
    /// Layer defaults, the optional TOML file at `path`, and `COIN__`
    /// environment overrides (`COIN__MINER__NONCE_LIMIT=...`), then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::builder();
        config = config.add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            info!("Loading configuration from: {:?}", path);
            config = config.add_source(File::from(path).required(true));
        }

        config = config.add_source(
            Environment::with_prefix("COIN")
                .separator("__")
                .try_parsing(true),
        );

        let config: NodeConfig = config.build()?.try_deserialize()?;
        if let Err(e) = config.validate() {
            return Err(ConfigError::Message(format!("Configuration validation error: {e}")));
        }

        Ok(config)
    }

    /// Write the default configuration as TOML to `path`
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(&Self::default())
            .map_err(|e| ConfigError::Message(format!("Failed to serialize default config: {e}")))?;
        fs::write(path, contents)
            .map_err(|e| ConfigError::Message(format!("Failed to write {}: {e}", path.display())))?;
        info!("Created default configuration at {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), NodeConfigValidationError> {
        self.miner.validate()?;
        self.wallet.validate()?;
        self.mempool.validate()?;
        self.node.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("node.toml");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());

        let miner_config = miner::MinerConfig::try_from(&config.miner).unwrap();
        assert_eq!(miner_config, miner::MinerConfig::default());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[miner]
nonce_limit = 1000
oracle_timeout = 250
difficulty_target = "00ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff"

[wallet]
safe_block_amount = 2
"#,
        );

        let config = NodeConfig::load(Some(&path)).unwrap();

        assert_eq!(config.miner.nonce_limit, 1000);
        assert_eq!(config.miner.oracle_timeout, Duration::from_millis(250));
        assert_eq!(config.wallet.safe_block_amount, 2);
        // Untouched values keep their defaults
        assert_eq!(config.miner.initial_subsidy, MinerConfig::default().initial_subsidy);
        assert!(config.node.enable_mining);
    }

    #[test]
    fn test_default_config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");

        NodeConfig::create_default_config(&path).unwrap();
        let loaded = NodeConfig::load(Some(&path)).unwrap();

        assert_eq!(loaded.wallet, NodeConfig::default().wallet);
        assert_eq!(loaded.miner.difficulty_target, NodeConfig::default().miner.difficulty_target);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[miner]\nsubsidy_halving_rate = 0\n");

        let err = NodeConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("subsidy_halving_rate"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = NodeConfig::default();
        config.miner.difficulty_target = "not hex".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.miner.nonce_limit = u64::from(u32::MAX) + 2;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.node.has_wallet = false;
        assert!(config.validate().is_err());
        config.node.enable_mining = false;
        assert!(config.validate().is_ok());

        let mut config = NodeConfig::default();
        config.node.secret_key = Some("abcd".to_string());
        assert!(matches!(
            config.validate(),
            Err(NodeConfigValidationError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_section_conversions() {
        let config = NodeConfig::default();

        let wallet_config = wallet::WalletConfig::from(&config.wallet);
        assert_eq!(wallet_config, wallet::WalletConfig::default());

        let pool_config = TransactionPoolConfig::from(&config.mempool);
        assert_eq!(pool_config.max_block_transactions, 500);
    }
}
