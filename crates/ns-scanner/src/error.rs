//! Error types for the ns-scanner crate.
//!
//! This module provides the [`ScanError`] type for errors that can occur
//! while resolving targets and scanning files.

use std::time::Duration;

use camino::Utf8PathBuf;

/// Errors that can occur during scanning operations.
///
/// # Error Recovery Strategy
///
/// - **Per-target errors** ([`ScanError::Unreadable`], [`ScanError::WorkerFault`],
///   [`ScanError::Incomplete`], [`ScanError::Resolve`], [`ScanError::NonUtf8Path`]):
///   reported for that target only, the run continues with the next one
/// - **Fatal errors** ([`ScanError::Config`], [`ScanError::PoolClosed`],
///   [`ScanError::WorkerSpawn`]): the scanner cannot continue
///
/// # Examples
///
/// ```
/// use ns_scanner::ScanError;
///
/// fn marker(err: &ScanError) -> &'static str {
///     match err {
///         ScanError::Unreadable { .. } => "unreadable",
///         ScanError::WorkerFault { .. } => "fault",
///         ScanError::Incomplete { .. } => "incomplete",
///         _ => "error",
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The target could not be opened or read.
    #[error("failed to read file {path}: {source}")]
    Unreadable {
        /// The path of the file that couldn't be read.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// At least one chunk of the file could not be counted.
    ///
    /// The total is withheld; partial counts are never reported.
    #[error("worker fault while scanning {path}: {faulted_chunks} chunk(s) failed")]
    WorkerFault {
        /// The path of the file being scanned.
        path: Utf8PathBuf,
        /// Number of chunks whose count failed.
        faulted_chunks: u64,
    },

    /// The scan deadline expired before every chunk was counted.
    #[error("scan of {path} did not complete within {timeout:?}")]
    Incomplete {
        /// The path of the file being scanned.
        path: Utf8PathBuf,
        /// The deadline that expired.
        timeout: Duration,
    },

    /// A directory, or one of its entries, could not be resolved.
    #[error("failed to resolve {path}: {source}")]
    Resolve {
        /// The directory or entry that couldn't be resolved.
        path: Utf8PathBuf,
        /// The underlying walker error.
        #[source]
        source: ignore::Error,
    },

    /// Invalid scanner configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The worker pool has shut down and no longer accepts work.
    #[error("worker pool is closed")]
    PoolClosed,

    /// A worker thread could not be started.
    #[error("failed to spawn worker {id}: {source}")]
    WorkerSpawn {
        /// Index of the worker that failed to start.
        id: usize,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),
}

impl ScanError {
    /// Creates a new [`ScanError::Unreadable`] error.
    #[inline]
    pub fn unreadable(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`ScanError::Config`] error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` if this error only affects a single target.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Unreadable { .. }
                | Self::WorkerFault { .. }
                | Self::Incomplete { .. }
                | Self::Resolve { .. }
                | Self::NonUtf8Path(_)
        )
    }

    /// Returns `true` if this error is fatal (scanning should stop).
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::Unreadable { path, .. }
            | Self::WorkerFault { path, .. }
            | Self::Incomplete { path, .. }
            | Self::Resolve { path, .. } => Some(path),
            Self::Config(_)
            | Self::PoolClosed
            | Self::WorkerSpawn { .. }
            | Self::NonUtf8Path(_) => None,
        }
    }
}

impl From<ns_core::ConfigError> for ScanError {
    fn from(err: ns_core::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
