//! Logging configuration
//!
//! A messaging client logs to the console; the simulation also writes one
//! JSONL file per run so several clients' lines can be filtered by
//! `user_id` afterwards.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive (can be overridden by RUST_LOG)
    pub default_level: String,

    /// How the console is written
    pub console: ConsoleFormat,

    /// Optional JSONL log file
    pub file: Option<FileConfig>,

    /// Fields included in each JSONL line
    pub fields: EventFields,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleFormat::Jsonl,
            file: None,
            fields: EventFields::default(),
        }
    }
}

impl LogConfig {
    /// Pretty console at `debug` for local work
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleFormat::Pretty { ansi: true },
            ..Default::default()
        }
    }

    /// Daily-rotated JSONL files only
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: ConsoleFormat::Off,
            file: Some(FileConfig::new(log_dir, "aula", RotationStrategy::Daily)),
            ..Default::default()
        }
    }

    /// Multi-client simulation run: every client's `debug` lines in
    /// `<log_dir>/<run>.log`, console left to the run's own output
    pub fn simulation(log_dir: PathBuf, run: &str) -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleFormat::Off,
            file: Some(FileConfig::new(log_dir, run, RotationStrategy::Never)),
            fields: EventFields {
                location: false,
                ..EventFields::default()
            },
        }
    }

    /// Warnings only, without source locations
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            fields: EventFields {
                location: false,
                ..EventFields::default()
            },
            ..Default::default()
        }
    }
}

/// Console output style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleFormat {
    Off,
    /// Human-readable lines
    Pretty { ansi: bool },
    /// Same JSONL lines as the log file
    Jsonl,
}

/// JSONL log file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name prefix; with `Never` rotation the file is `<prefix>.log`
    pub prefix: String,
    pub rotation: RotationStrategy,
}

impl FileConfig {
    pub fn new(directory: PathBuf, prefix: impl Into<String>, rotation: RotationStrategy) -> Self {
        Self {
            directory,
            prefix: prefix.into(),
            rotation,
        }
    }
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// Single file, truncated on start
    Never,
}

/// What each JSONL line carries besides level, target and the event's own fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFields {
    /// `user_id` and `session_id` of the acting client
    pub user_context: bool,
    /// Enclosing spans with their fields, outermost first
    pub spans: bool,
    /// `file` and `line`
    pub location: bool,
    /// `thread` name
    pub thread: bool,
}

impl Default for EventFields {
    fn default() -> Self {
        Self {
            user_context: true,
            spans: true,
            location: true,
            thread: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert_eq!(config.console, ConsoleFormat::Jsonl);
        assert!(config.file.is_none());
        assert!(config.fields.user_context);
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.default_level, "debug");
        assert_eq!(config.console, ConsoleFormat::Pretty { ansi: true });
    }

    #[test]
    fn test_production_config() {
        let config = LogConfig::production(PathBuf::from("/var/log/aula"));
        assert_eq!(config.console, ConsoleFormat::Off);
        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/var/log/aula"));
        assert_eq!(file.rotation, RotationStrategy::Daily);
    }

    #[test]
    fn test_simulation_config_writes_one_file_per_run() {
        let config = LogConfig::simulation(PathBuf::from("target/sim"), "capacity");
        let file = config.file.unwrap();
        assert_eq!(file.prefix, "capacity");
        assert_eq!(file.rotation, RotationStrategy::Never);
        assert_eq!(config.console, ConsoleFormat::Off);
        assert!(config.fields.user_context);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: LogConfig =
            serde_json::from_str(r#"{"default_level":"trace","fields":{"thread":true}}"#).unwrap();
        assert_eq!(config.default_level, "trace");
        assert_eq!(config.console, ConsoleFormat::Jsonl);
        assert!(config.fields.thread);
        assert!(config.fields.spans);
    }
}
