//! Core configuration and error types for the nullscan tool.
//!
//! This crate provides the foundational types shared across the workspace:
//!
//! - [`ScanConfig`] - Sentinel byte, chunk size, worker count and deadline
//! - [`Config`] - Root configuration loaded from a JSON file
//! - [`ConfigError`] - Errors raised while loading or validating configuration

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{
    Config, DEFAULT_CHUNK_SIZE, DEFAULT_SENTINEL, MAX_CHUNK_SIZE, ScanConfig, default_worker_count,
};
pub use error::ConfigError;
