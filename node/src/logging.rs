use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Crates whose events are shown at the configured level
const LOG_TARGETS: [&str; 5] = ["coin_node", "node", "miner", "wallet", "coin_core"];

/// Parse a textual level, accepting any case
pub fn parse_level(level: &str) -> Result<Level, String> {
    level
        .trim()
        .parse::<Level>()
        .map_err(|_| format!("Unknown log level: {}", level))
}

/// Build the filter used when `RUST_LOG` is not set
pub fn default_filter(level: Level) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level.to_string().to_lowercase()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `log_level`.
pub fn init_logging(log_level: &str) -> Result<(), String> {
    let level = parse_level(log_level)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set global default subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level(" WARN ").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_default_filter_covers_workspace() {
        let filter = default_filter(Level::INFO);
        assert_eq!(
            filter,
            "coin_node=info,node=info,miner=info,wallet=info,coin_core=info"
        );
    }
}
