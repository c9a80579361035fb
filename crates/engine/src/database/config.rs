//! Store configuration via `soupstore.toml`
//!
//! On first open of a data directory a default `soupstore.toml` is created.
//! To change settings, edit the file and reopen the store.

use serde::{Deserialize, Serialize};
use soupstore_core::{SoupError, SoupResult, DEFAULT_PAGE_SIZE};
use std::path::Path;

/// Config file name placed in the store data directory.
pub const CONFIG_FILE_NAME: &str = "soupstore.toml";

/// Backing database file name placed in the store data directory.
pub const DATABASE_FILE_NAME: &str = "store.db";

// ============================================================================
// Pragma enums
// ============================================================================

/// SQLite journal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-ahead log (single writer, concurrent readers)
    Wal,
    /// Rollback journal, deleted after each transaction
    Delete,
    /// Journal kept in memory
    Memory,
}

impl JournalMode {
    /// Pragma value
    pub fn pragma(&self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Memory => "MEMORY",
        }
    }
}

/// SQLite synchronous level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Sync at critical moments
    Normal,
    /// Sync on every commit
    Full,
    /// Leave syncing to the OS
    Off,
}

impl SyncMode {
    /// Pragma value
    pub fn pragma(&self) -> &'static str {
        match self {
            SyncMode::Normal => "NORMAL",
            SyncMode::Full => "FULL",
            SyncMode::Off => "OFF",
        }
    }
}

// ============================================================================
// StoreConfig
// ============================================================================

/// Store configuration loaded from `soupstore.toml`.
///
/// # Example
///
/// ```toml
/// journal_mode = "wal"
/// synchronous = "normal"
/// busy_timeout_ms = 5000
/// default_page_size = 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Journal mode: `"wal"`, `"delete"` or `"memory"`.
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,
    /// Synchronous level: `"normal"`, `"full"` or `"off"`.
    #[serde(default = "default_synchronous")]
    pub synchronous: String,
    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Page size for wire-form query specs that omit `pageSize`.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

fn default_journal_mode() -> String {
    "wal".to_string()
}

fn default_synchronous() -> String {
    "normal".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal_mode: default_journal_mode(),
            synchronous: default_synchronous(),
            busy_timeout_ms: default_busy_timeout_ms(),
            default_page_size: default_page_size(),
        }
    }
}

impl StoreConfig {
    /// Parse the journal mode string.
    pub fn journal_mode(&self) -> SoupResult<JournalMode> {
        match self.journal_mode.as_str() {
            "wal" => Ok(JournalMode::Wal),
            "delete" => Ok(JournalMode::Delete),
            "memory" => Ok(JournalMode::Memory),
            other => Err(SoupError::config(format!(
                "Invalid journal_mode '{}'. Expected \"wal\", \"delete\" or \"memory\".",
                other
            ))),
        }
    }

    /// Parse the synchronous string.
    pub fn sync_mode(&self) -> SoupResult<SyncMode> {
        match self.synchronous.as_str() {
            "normal" => Ok(SyncMode::Normal),
            "full" => Ok(SyncMode::Full),
            "off" => Ok(SyncMode::Off),
            other => Err(SoupError::config(format!(
                "Invalid synchronous '{}'. Expected \"normal\", \"full\" or \"off\".",
                other
            ))),
        }
    }

    /// Check every field eagerly.
    pub fn validate(&self) -> SoupResult<()> {
        self.journal_mode()?;
        self.sync_mode()?;
        if self.default_page_size == 0 {
            return Err(SoupError::config("default_page_size must be at least 1"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Soupstore configuration
#
# Journal mode: "wal" (default), "delete" or "memory"
journal_mode = "wal"

# Synchronous level: "normal" (default), "full" or "off"
synchronous = "normal"

# Milliseconds a writer waits on a locked database before failing
busy_timeout_ms = 5000

# Page size used by query specs that do not carry one
default_page_size = 10
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> SoupResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            SoupError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> SoupResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> SoupResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SoupError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_wal_normal() {
        let config = StoreConfig::default();
        assert_eq!(config.journal_mode().unwrap(), JournalMode::Wal);
        assert_eq!(config.sync_mode().unwrap(), SyncMode::Normal);
        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn parse_invalid_journal_mode_returns_error() {
        let config: StoreConfig = toml::from_str("journal_mode = \"turbo\"").unwrap();
        assert!(matches!(config.validate(), Err(SoupError::Config { .. })));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let config: StoreConfig = toml::from_str("default_page_size = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_toml_parses_correctly() {
        let config: StoreConfig = toml::from_str(StoreConfig::default_toml()).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(&path, "synchronous = \"full\"\n").unwrap();
        StoreConfig::write_default_if_missing(&path).unwrap();

        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.sync_mode().unwrap(), SyncMode::Full);
        assert_eq!(config.journal_mode, "wal");
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = StoreConfig {
            journal_mode: "delete".to_string(),
            synchronous: "off".to_string(),
            busy_timeout_ms: 250,
            default_page_size: 25,
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(StoreConfig::from_file(&path).unwrap(), config);
    }
}
