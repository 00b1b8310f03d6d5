//! Sniffer configuration
//!
//! Optional YAML file; every field has a default so an empty file (or no
//! file at all) gives the stock behavior. Command-line flags override it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::aggregate::GroupingConfig;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SnifferConfig {
    /// Grouping window in milliseconds
    #[serde(default = "default_group_window_ms")]
    pub group_window_ms: u64,
    /// Minimum time between live redraws, in milliseconds
    #[serde(default = "default_display_throttle_ms")]
    pub display_throttle_ms: u64,
    #[serde(default = "default_true")]
    pub grouping: bool,
    #[serde(default = "default_true")]
    pub colors: bool,
    #[serde(default = "default_true")]
    pub show_hex: bool,
    #[serde(default = "default_true")]
    pub show_timestamp: bool,
    /// Searched for mapping files before the Rekordbox install locations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub csv_search_paths: Vec<PathBuf>,
    /// Where auto-named logs are written; current directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            group_window_ms: default_group_window_ms(),
            display_throttle_ms: default_display_throttle_ms(),
            grouping: true,
            colors: true,
            show_hex: true,
            show_timestamp: true,
            csv_search_paths: Vec::new(),
            log_dir: None,
        }
    }
}

impl SnifferConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty map
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: SnifferConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.group_window_ms == 0 {
            anyhow::bail!("group_window_ms must be greater than 0");
        }
        Ok(())
    }

    pub fn grouping_config(&self) -> GroupingConfig {
        GroupingConfig {
            window: Duration::from_millis(self.group_window_ms),
            enabled: self.grouping,
        }
    }

    pub fn display_throttle(&self) -> Duration {
        Duration::from_millis(self.display_throttle_ms)
    }
}

fn default_group_window_ms() -> u64 {
    500
}
fn default_display_throttle_ms() -> u64 {
    250
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SnifferConfig::default();
        assert_eq!(config.grouping_config(), GroupingConfig::default());
        assert_eq!(config.display_throttle(), Duration::from_millis(250));
        assert_eq!(SnifferConfig::parse("").unwrap(), config);
    }

    #[test]
    fn test_partial_yaml() {
        let config = SnifferConfig::parse(
            "group_window_ms: 300\ncolors: false\ncsv_search_paths:\n  - /opt/maps\n",
        )
        .unwrap();

        assert_eq!(config.group_window_ms, 300);
        assert!(!config.colors);
        assert!(config.grouping);
        assert_eq!(config.csv_search_paths, vec![PathBuf::from("/opt/maps")]);
        assert_eq!(config.log_dir, None);
    }

    #[test]
    fn test_invalid_config() {
        assert!(SnifferConfig::parse("group_window_ms: 0\n").is_err());
        assert!(SnifferConfig::parse("grouping: maybe\n").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "grouping: false\nlog_dir: logs").unwrap();

        let config = SnifferConfig::load(file.path()).await.unwrap();
        assert!(!config.grouping_config().enabled);
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = SnifferConfig::load("/no/such/sniffer.yaml").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
