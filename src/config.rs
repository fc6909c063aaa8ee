use crate::error::{KeyscopeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Cardinality at or above which `MEMORY USAGE` is not issued for a key.
pub const DEFAULT_LARGE_KEY_THRESHOLD: u64 = 50_000;

/// How the orchestrator reacts when one node fails during a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Fail the whole request (interactive browsing)
    #[default]
    Abort,
    /// Record the failure and keep scanning the other nodes (batch analysis)
    Continue,
}

/// Scan section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Keys requested per page when the caller gives no count
    pub count_default: u64,
    /// Maximum keys walked across all nodes by a single request
    pub count_threshold: u64,
    /// Upper bound on the COUNT hint of one SCAN call
    pub max_count_per_call: u64,
    /// Cardinality at which MEMORY USAGE is skipped (size reported as -1)
    pub large_key_threshold: u64,
    pub error_mode: ErrorMode,
    /// Extra attempts for a failed node call before the error policy applies
    pub retries: u32,
    /// Per node call timeout in milliseconds (0 disables the timeout)
    pub node_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            count_default: 200,
            count_threshold: 10_000,
            max_count_per_call: 2_000,
            large_key_threshold: DEFAULT_LARGE_KEY_THRESHOLD,
            error_mode: ErrorMode::Abort,
            retries: 0,
            node_timeout_ms: 5_000,
        }
    }
}

impl ScanConfig {
    /// Preset used by background database analysis.
    pub fn for_analysis() -> Self {
        Self {
            error_mode: ErrorMode::Continue,
            ..Self::default()
        }
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        if self.node_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.node_timeout_ms))
        }
    }

    /// COUNT hint actually sent to a node for a requested page size.
    pub fn count_per_call(&self, requested: u64) -> u64 {
        let requested = if requested == 0 {
            self.count_default
        } else {
            requested
        };
        requested.clamp(1, self.max_count_per_call.max(1))
    }
}

/// Connection section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            connect_timeout_ms: 3_000,
            username: None,
            password: None,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

/// Logging section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: text or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            KeyscopeError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        content.parse()
    }
}

impl FromStr for Config {
    type Err = KeyscopeError;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| KeyscopeError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scan.count_default, 200);
        assert_eq!(config.scan.count_threshold, 10_000);
        assert_eq!(config.scan.large_key_threshold, 50_000);
        assert_eq!(config.scan.error_mode, ErrorMode::Abort);
        assert_eq!(config.scan.retries, 0);
        assert_eq!(config.connection.port, 6379);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = r#"
            [scan]
            error_mode = "continue"
            retries = 2
            node_timeout_ms = 0

            [connection]
            host = "10.0.0.5"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.scan.error_mode, ErrorMode::Continue);
        assert_eq!(config.scan.retries, 2);
        assert_eq!(config.scan.node_timeout(), None);
        assert_eq!(config.scan.count_default, 200);
        assert_eq!(config.connection.host, "10.0.0.5");
        assert_eq!(config.connection.port, 6379);
    }

    #[test]
    fn test_invalid_toml() {
        let err = "[scan]\nretries = \"many\"".parse::<Config>().unwrap_err();
        assert!(matches!(err, KeyscopeError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\nformat = \"json\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_count_per_call() {
        let scan = ScanConfig::default();
        assert_eq!(scan.count_per_call(15), 15);
        assert_eq!(scan.count_per_call(10_000), 2_000);
        assert_eq!(scan.count_per_call(0), 200);
    }

    #[test]
    fn test_analysis_preset() {
        assert_eq!(ScanConfig::for_analysis().error_mode, ErrorMode::Continue);
    }
}
