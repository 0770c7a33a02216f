//! Test utilities for ksession
//!
//! Temporary config files, CLI values and assertion helpers shared by the
//! unit tests.

use crate::cli::{Cli, Commands};
use std::path::PathBuf;
use tempfile::TempDir;

/// Writes `contents` to a `config.yaml` inside a fresh temporary directory.
///
/// Keep the returned `TempDir` alive for as long as the path is used.
///
/// # Panics
///
/// Panics if the directory or file cannot be created
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temporary directory");
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, contents).expect("Failed to write config file");
    (dir, path)
}

/// A non-verbose `show-config` invocation with the given config path.
pub fn test_cli(config: Option<String>) -> Cli {
    Cli {
        config,
        verbose: false,
        command: Commands::ShowConfig,
    }
}

/// Assert that an error's message contains `expected`
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T, E: std::fmt::Display>(result: Result<T, E>, expected: &str) {
    match result {
        Ok(_) => panic!("Expected error containing '{}' but got Ok", expected),
        Err(e) => {
            let error_msg = e.to_string();
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// A minimal config file consuming `orders` from a local broker.
pub fn test_config_yaml() -> String {
    r#"
kafka:
  brokers: localhost:9092
  topics: [orders]
  group_id: processors
  auto_offset_reset: earliest
workers:
  count: 2
  buffer_size: 50
session:
  fatal_error_backoff_ms: 1000
logging:
  level: debug
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::ConfigError;

    #[test]
    fn test_temp_config_file_writes_contents() {
        let (_dir, path) = temp_config_file("kafka: {}\n");
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kafka: {}\n");
    }

    #[test]
    fn test_test_cli_defaults() {
        let cli = test_cli(Some("a.yaml".to_string()));
        assert_eq!(cli.config.as_deref(), Some("a.yaml"));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: Result<(), ConfigError> = Err(ConfigError::NoTopics);
        assert_error_contains(result, "topic");
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        let result: Result<(), ConfigError> = Ok(());
        assert_error_contains(result, "error");
    }

    #[test]
    fn test_test_config_yaml_parses() {
        let config: AppConfig = serde_yaml::from_str(&test_config_yaml()).unwrap();
        assert_eq!(config.kafka.topics, vec!["orders"]);
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.session.fatal_error_backoff_ms, 1000);
        assert!(config.validate().is_ok());
    }
}
