//! Structured logging setup
//!
//! Components never install a subscriber themselves. Each one is handed a
//! `tracing::Span` identifying it and emits its events with that span as the
//! explicit parent, so the host decides where the output goes. `init_logging`
//! is a convenience for hosts without a subscriber of their own.

use serde::Deserialize;
use tracing::{span, Level, Span};
use tracing_subscriber::EnvFilter;

/// Log levels accepted in configuration
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum log level to output, overridden by `RUST_LOG`
    pub level: LogLevel,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Enable console output
    pub console_output: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: true,
            console_output: true,
        }
    }
}

impl LoggerConfig {
    fn filter(&self) -> EnvFilter {
        if !self.console_output {
            return EnvFilter::new("off");
        }

        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(format!("{:?}", self.level).to_lowercase()))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install a global subscriber for `config`
///
/// Returns false when a subscriber was already installed, which is not an
/// error: the existing one keeps receiving events.
pub fn init_logging(config: &LoggerConfig) -> bool {
    let filter = config.filter();

    let init_result = if config.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init()
    };

    init_result.is_ok()
}

/// Span identifying one component of the mirror in emitted events
pub fn component_span(component: &str) -> Span {
    span!(Level::INFO, "zonemirror", component = %component)
}
