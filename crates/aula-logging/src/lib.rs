//! Structured logging for Aula messaging clients
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **User Context Injection**: Spans carry the acting user and session id
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender, or one
//!   file per simulation run
//!
//! # Quick Start
//!
//! ```ignore
//! use aula_logging::{AulaSubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! AulaSubscriberBuilder::new().init();
//!
//! // Pretty output while developing
//! AulaSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//!
//! // Attribute one client's work to its user
//! client.open_dm(&bob).instrument(client_span(&alice)).await?;
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleFormat, EventFields, FileConfig, LogConfig, RotationStrategy};
pub use context::{UserContextData, UserContextGuard, client_span};
pub use layers::{ContextJsonFormat, UserContextLayer, jsonl_layer};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log output: {0}")]
    Io(#[from] std::io::Error),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Builder for configuring and initializing the logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable output.
pub struct AulaSubscriberBuilder {
    config: LogConfig,
}

impl AulaSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Set the console output style
    pub fn with_console(mut self, console: ConsoleFormat) -> Self {
        self.config.console = console;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// The returned guard flushes file output when dropped; keep it alive
    /// for the duration of the program.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.default_level));

        let fields = self.config.fields;
        let (file_layer, guard) = match self.config.file.as_ref() {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                (Some(jsonl_layer(writer, fields)), Some(guard))
            }
            None => (None, None),
        };

        let pretty_layer = match self.config.console {
            ConsoleFormat::Pretty { ansi } => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_target(true),
            ),
            _ => None,
        };
        let console_jsonl = (self.config.console == ConsoleFormat::Jsonl)
            .then(|| jsonl_layer(std::io::stdout, fields));

        Registry::default()
            .with(env_filter)
            .with(UserContextLayer::new())
            .with(pretty_layer)
            .with(console_jsonl)
            .with(file_layer)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        Ok(guard)
    }

    /// Install the subscriber, reporting failures on stderr instead of returning them
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {e}");
                None
            }
        }
    }
}

impl Default for AulaSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-blocking writer for a file config. `Never` truncates a single file.
pub fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;
    let pair = match config.rotation {
        RotationStrategy::Never => {
            let file = File::create(config.directory.join(format!("{}.log", config.prefix)))?;
            tracing_appender::non_blocking(file)
        }
        RotationStrategy::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &config.directory,
            &config.prefix,
        )),
        RotationStrategy::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &config.directory,
            &config.prefix,
        )),
    };
    Ok(pair)
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    AulaSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    AulaSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for tests; ignores an already installed subscriber
pub fn init_testing() {
    let _ = AulaSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_jsonl() {
        let builder = AulaSubscriberBuilder::new();
        assert_eq!(builder.config().default_level, "info");
        assert_eq!(builder.config().console, ConsoleFormat::Jsonl);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = AulaSubscriberBuilder::new()
            .with_config(LogConfig::development())
            .with_level("trace")
            .with_console(ConsoleFormat::Off);
        assert_eq!(builder.config().default_level, "trace");
        assert_eq!(builder.config().console, ConsoleFormat::Off);
    }

    #[test]
    fn test_file_writer_never_rotation_creates_file() {
        let dir = TempDir::new().unwrap();
        let config = FileConfig::new(dir.path().join("logs"), "sim", RotationStrategy::Never);

        let (_writer, _guard) = file_writer(&config).unwrap();

        assert!(dir.path().join("logs").join("sim.log").exists());
    }

    #[test]
    fn test_simulation_file_lines_name_each_client() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig::simulation(dir.path().to_path_buf(), "dm-race");
        let file = config.file.clone().unwrap();
        let (writer, guard) = file_writer(&file).unwrap();

        let subscriber = Registry::default()
            .with(UserContextLayer::new())
            .with(jsonl_layer(writer, config.fields));
        tracing::subscriber::with_default(subscriber, || {
            for user in ["ana", "ben"] {
                let span = client_span(&aula_core::UserId::parse(user).unwrap());
                span.in_scope(|| tracing::info!("Opened direct conversation"));
            }
        });
        drop(guard);

        let text = fs::read_to_string(dir.path().join("dm-race.log")).unwrap();
        let users: Vec<String> = text
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["user_id"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(users, vec!["ana", "ben"]);
    }

    #[test]
    fn test_init_testing_twice_is_harmless() {
        init_testing();
        init_testing();
    }
}
