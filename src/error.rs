// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for Kea-Roster

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Kea-Roster operations
pub type Result<T> = std::result::Result<T, RosterError>;

/// Errors that can occur during Roster operations
#[derive(Error, Debug)]
pub enum RosterError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Identity list could not be read
    #[error("Cannot read input file '{path}': {source}")]
    InputUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Identity does not have the `local@domain.tld` shape
    #[error("Invalid identity '{identity}': {reason}")]
    InvalidIdentity { identity: String, reason: String },

    /// Address fails syntax or pool membership checks
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// No free host left in the pool
    #[error("Address pool {network} is exhausted")]
    PoolExhausted { network: String },

    /// Config store missing or malformed
    #[error("Config store '{path}' unavailable: {message}")]
    StoreUnavailable { path: String, message: String },

    /// Another invocation holds the store lock
    #[error("Config store is locked by another process ({path})")]
    StoreLocked { path: String },

    /// Writing a peer block to the store failed
    #[error("Failed to append peer '{name}' to the config store: {message}")]
    StoreAppendFailure { name: String, message: String },

    /// Server public key file missing or empty
    #[error("Server public key unavailable at {path}")]
    PublicKeyMissing { path: String },

    /// External key generation produced no usable key
    #[error("Key generation failed: {message}")]
    KeyGenFailure { message: String },

    /// Profile could not be written to the peers directory
    #[error("Failed to write profile '{path}': {message}")]
    ProfileWriteFailure { path: String, message: String },

    /// External command failed or timed out
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Notification preconditions not met
    #[error("Invalid notification configuration: {message}")]
    NotifyConfigInvalid { message: String },

    /// Delivery to a single recipient failed
    #[error("Failed to notify '{recipient}': {message}")]
    NotifyFailed { recipient: String, message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Classification of a per-item provisioning failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    InvalidIdentity,
    PoolExhausted,
    KeyGenFailure,
    ProfileWriteFailure,
    StoreAppendFailure,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::InvalidIdentity => write!(formatter, "InvalidIdentity"),
            FailureKind::PoolExhausted => write!(formatter, "PoolExhausted"),
            FailureKind::KeyGenFailure => write!(formatter, "KeyGenFailure"),
            FailureKind::ProfileWriteFailure => write!(formatter, "ProfileWriteFailure"),
            FailureKind::StoreAppendFailure => write!(formatter, "StoreAppendFailure"),
        }
    }
}
