// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the device watcher
//!
//! Three families of failure exist: bad match criteria (fatal to the
//! watcher being configured), native resource failures while enumerating
//! or arming the monitor (the watcher state is left untouched), and
//! ancestry lookups that found nothing (recoverable, caller decides).

use thiserror::Error;

/// Main error type for the watcher
#[derive(Error, Debug)]
pub enum WatchError {
    /// Match criteria that cannot be pushed to the native filters
    #[error("Invalid match criteria: {0}")]
    InvalidCriteria(String),

    /// Native enumeration could not be created or run
    #[error("Device enumeration failed: {0}")]
    Enumerate(#[source] std::io::Error),

    /// Native monitor could not be created, filtered or armed
    #[error("Device monitor setup failed: {0}")]
    Monitor(#[source] std::io::Error),

    /// Device sits at the root of the device tree
    #[error("Device {syspath} has no parent")]
    NoParent { syspath: String },

    /// No ancestor matched the requested subsystem/devtype pair
    #[error("No parent with subsystem {subsystem:?} and devtype {devtype:?} for device {syspath}")]
    NoMatchingParent {
        syspath: String,
        subsystem: Option<String>,
        devtype: Option<String>,
    },

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// `true` for ancestry lookups that simply found nothing
    pub fn is_traversal(&self) -> bool {
        matches!(self, WatchError::NoParent { .. } | WatchError::NoMatchingParent { .. })
    }
}

/// Result type alias for WatchError
pub type Result<T> = std::result::Result<T, WatchError>;
