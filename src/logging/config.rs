//! Logging configuration
//!
//! Log level, output destinations and formatting options for the tracing
//! subscriber installed by [`super::init_logging`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for daily-rolling JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// File name prefix inside `log_directory`
    pub file_prefix: String,

    /// Include file location in console logs
    pub include_file_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            file_prefix: "tracker.log".to_string(),
            include_file_location: false,
        }
    }
}

impl LoggingConfig {
    /// Verbose configuration for debugging the tracking pipeline
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            ..Self::default()
        }
    }

    /// Override the level from a `-v` count
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        if verbose > 0 {
            self.global_level = match verbose {
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
            .to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];

        if !valid_levels.contains(&self.global_level.as_str()) {
            return Err(format!(
                "Invalid global_level: {}. Must be one of: {:?}",
                self.global_level, valid_levels
            ));
        }

        if self.file_prefix.is_empty() {
            return Err("file_prefix must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.global_level, "info");
        assert!(config.console_output);
        assert!(config.log_directory.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_verbosity_override() {
        assert_eq!(LoggingConfig::default().with_verbosity(0).global_level, "info");
        assert_eq!(LoggingConfig::default().with_verbosity(2).global_level, "debug");
        assert_eq!(LoggingConfig::default().with_verbosity(9).global_level, "trace");
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggingConfig {
            global_level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
