//! Configuration structures for the nullscan tool.
//!
//! This module provides:
//!
//! - [`ScanConfig`] - Scanner settings (sentinel byte, chunk size, parallelism, deadline)
//! - [`Config`] - Root configuration, loadable from a JSON file
//!
//! All configuration types implement [`Default`]. A configuration file only
//! needs to name the fields it overrides.

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The byte counted when no sentinel is configured.
pub const DEFAULT_SENTINEL: u8 = 0x00;

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Largest accepted chunk size: 1 GiB.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024 * 1024;

/// Returns the default worker count: one less than the number of logical
/// CPUs, but never fewer than one.
///
/// # Examples
///
/// ```
/// assert!(ns_core::default_worker_count() >= 1);
/// ```
#[must_use]
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .saturating_sub(1)
        .max(1)
}

/// Configuration for the file scanner.
///
/// # Examples
///
/// ```
/// use ns_core::ScanConfig;
///
/// let config = ScanConfig::default();
/// assert_eq!(config.sentinel_byte, 0x00);
/// assert_eq!(config.chunk_size_bytes, 4 * 1024 * 1024);
/// assert!(config.worker_count.is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// The byte value being counted.
    pub sentinel_byte: u8,

    /// Maximum size of a single chunk handed to a worker.
    pub chunk_size_bytes: usize,

    /// Number of counting workers.
    /// `None` means one less than the available CPU cores (minimum one).
    pub worker_count: Option<usize>,

    /// Optional per-file deadline in milliseconds.
    ///
    /// When the deadline expires the file is reported as incomplete instead
    /// of blocking the run.
    pub scan_timeout_ms: Option<u64>,

    /// Whether directory targets are expanded recursively.
    pub recursive: bool,

    /// Whether to follow symbolic links while listing directories.
    pub follow_links: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sentinel_byte: DEFAULT_SENTINEL,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            worker_count: None,
            scan_timeout_ms: None,
            recursive: false,
            follow_links: false,
        }
    }
}

impl ScanConfig {
    /// Returns the number of workers to spawn.
    ///
    /// An explicit `worker_count` wins; otherwise [`default_worker_count`].
    #[must_use]
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(default_worker_count)
    }

    /// Returns the per-file deadline, if one is configured.
    #[must_use]
    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout_ms.map(Duration::from_millis)
    }

    /// Checks that every option holds a usable value.
    ///
    /// # Examples
    ///
    /// ```
    /// use ns_core::ScanConfig;
    ///
    /// let config = ScanConfig { chunk_size_bytes: 0, ..ScanConfig::default() };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size_bytes == 0 {
            return Err(ConfigError::invalid_option(
                "chunk_size_bytes",
                "must be greater than zero",
            ));
        }
        if self.chunk_size_bytes > MAX_CHUNK_SIZE {
            return Err(ConfigError::invalid_option(
                "chunk_size_bytes",
                format!("must not exceed {MAX_CHUNK_SIZE} bytes"),
            ));
        }
        if self.worker_count == Some(0) {
            return Err(ConfigError::invalid_option(
                "worker_count",
                "must be at least one",
            ));
        }
        if self.scan_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_option(
                "scan_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Root configuration for the nullscan tool.
///
/// # Examples
///
/// ```
/// use ns_core::Config;
///
/// let config: Config = serde_json::from_str(r#"{"scan": {"sentinel_byte": 255}}"#).unwrap();
/// assert_eq!(config.scan.sentinel_byte, 0xFF);
/// assert_eq!(config.scan.chunk_size_bytes, 4 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scanner configuration.
    pub scan: ScanConfig,
}

impl Config {
    /// Loads and validates a configuration file.
    ///
    /// Fields missing from the file keep their default values.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path.as_std_path()).map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.scan.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn test_scan_config_defaults() {
        insta::assert_json_snapshot!(ScanConfig::default(), @r#"
        {
          "sentinel_byte": 0,
          "chunk_size_bytes": 4194304,
          "worker_count": null,
          "scan_timeout_ms": null,
          "recursive": false,
          "follow_links": false
        }
        "#);
    }

    #[test]
    fn test_effective_worker_count() {
        let config = ScanConfig {
            worker_count: Some(3),
            ..ScanConfig::default()
        };
        assert_eq!(config.effective_worker_count(), 3);

        let config = ScanConfig::default();
        assert_eq!(config.effective_worker_count(), default_worker_count());
        assert!(config.effective_worker_count() >= 1);
    }

    #[test]
    fn test_scan_timeout() {
        assert!(ScanConfig::default().scan_timeout().is_none());

        let config = ScanConfig {
            scan_timeout_ms: Some(1500),
            ..ScanConfig::default()
        };
        assert_eq!(config.scan_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_validate() {
        assert!(ScanConfig::default().validate().is_ok());

        let zero_workers = ScanConfig {
            worker_count: Some(0),
            ..ScanConfig::default()
        };
        assert!(zero_workers.validate().is_err());

        let zero_timeout = ScanConfig {
            scan_timeout_ms: Some(0),
            ..ScanConfig::default()
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_validate_chunk_size_bound() {
        let at_limit = ScanConfig {
            chunk_size_bytes: MAX_CHUNK_SIZE,
            ..ScanConfig::default()
        };
        assert!(at_limit.validate().is_ok());

        for chunk_size_bytes in [MAX_CHUNK_SIZE + 1, 1 << 40, usize::MAX] {
            let config = ScanConfig {
                chunk_size_bytes,
                ..ScanConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidOption { option, .. } if option == "chunk_size_bytes"),
                "chunk_size_bytes = {chunk_size_bytes}"
            );
        }
    }

    #[test]
    fn test_config_deserialize_with_missing_fields() {
        let json = r#"{"scan": {"chunk_size_bytes": 1024}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.scan.chunk_size_bytes, 1024);
        // Other fields should have defaults
        assert_eq!(config.scan.sentinel_byte, DEFAULT_SENTINEL);
        assert!(config.scan.worker_count.is_none());
    }

    #[test]
    fn test_config_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nullscan.json")).unwrap();
        std::fs::write(&path, r#"{"scan": {"sentinel_byte": 10, "worker_count": 2}}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scan.sentinel_byte, b'\n');
        assert_eq!(config.scan.worker_count, Some(2));
    }

    #[test]
    fn test_config_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nullscan.json")).unwrap();
        std::fs::write(&path, r#"{"scan": {"chunk_size_bytes": 0}}"#).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { .. }));
    }

    #[test]
    fn test_config_load_missing_file() {
        let err = Config::load(Utf8Path::new("/nonexistent/nullscan.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
