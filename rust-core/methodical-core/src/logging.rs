//! # Logging
//!
//! Structured logging setup on `tracing-subscriber`. `RUST_LOG` is honored;
//! the configured directive is added on top of it.

use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive added to `RUST_LOG`, e.g. `methodical_core=info`
    pub directive: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directive: "methodical_core=info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LogConfig {
    /// Switch to JSON output
    #[must_use]
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Replace the filter directive
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        let filter = EnvFilter::from_default_env();
        match self.directive.parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        }
    }
}

/// Install the global tracing subscriber
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(config.filter());
    match config.format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Pretty => builder.try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.directive, "methodical_core=info");

        let config = config.json().with_directive("methodical_core=debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.directive, "methodical_core=debug");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LogConfig::default().with_directive("not a directive ===");
        init_tracing(&config);
        assert!(!init_tracing(&LogConfig::default()));
    }
}
