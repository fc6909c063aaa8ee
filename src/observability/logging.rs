//! Logging setup with plain text or JSON output
//!
//! The level comes from the configuration file or the command line;
//! `RUST_LOG` directives take precedence when set.

use crate::config::LoggingConfig;
use crate::error::{KeyscopeError, Result};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else if s.eq_ignore_ascii_case("text") || s.eq_ignore_ascii_case("plain") {
            Some(Self::Text)
        } else {
            None
        }
    }
}

/// Validated `[logging]` section
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// `trace` through `error`, case-insensitive; `warning` is accepted
    pub fn parse_level(s: &str) -> Option<Level> {
        if s.eq_ignore_ascii_case("warning") {
            return Some(Level::WARN);
        }
        // tracing also accepts 1-5; only names are valid here
        if s.bytes().any(|b| b.is_ascii_digit()) {
            return None;
        }
        Level::from_str(s).ok()
    }

    pub fn level_to_string(level: Level) -> &'static str {
        match level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Result<Self> {
        let level = Self::parse_level(&config.level)
            .ok_or_else(|| KeyscopeError::Config(format!("invalid log level '{}'", config.level)))?;
        let format = LogFormat::parse(&config.format).ok_or_else(|| {
            KeyscopeError::Config(format!("invalid log format '{}'", config.format))
        })?;
        Ok(Self { level, format })
    }
}

/// Install the global subscriber. Logs go to stderr so JSON results on
/// stdout stay machine readable.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| KeyscopeError::Config(format!("failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("plain"), Some(LogFormat::Text));
        assert_eq!(LogFormat::parse("invalid"), None);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogConfig::parse_level("trace"), Some(Level::TRACE));
        assert_eq!(LogConfig::parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(LogConfig::parse_level("info"), Some(Level::INFO));
        assert_eq!(LogConfig::parse_level("warning"), Some(Level::WARN));
        assert_eq!(LogConfig::parse_level("error"), Some(Level::ERROR));
        assert_eq!(LogConfig::parse_level("INFO"), Some(Level::INFO));
        assert_eq!(LogConfig::parse_level("3"), None);
        assert_eq!(LogConfig::parse_level("invalid"), None);
        assert_eq!(LogConfig::level_to_string(Level::WARN), "warn");
    }

    #[test]
    fn test_from_config() {
        let config = LogConfig::from_config(&LoggingConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
        })
        .unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);

        let err = LogConfig::from_config(&LoggingConfig {
            level: "loud".to_string(),
            format: "text".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, KeyscopeError::Config(_)));
    }
}
