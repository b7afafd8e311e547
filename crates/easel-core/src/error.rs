//! Application-wide error types
//!
//! This module defines the centralized error type using `thiserror`, plus
//! the transport error taxonomy that crosses process boundaries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ipc::TransportError;
use crate::packages::PackageError;
use crate::undo::UndoError;

/// Errors surfaced to request callers
///
/// Serialized with a stable `code` field so a renderer can match on it
/// after the error crosses the process boundary.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "code")]
pub enum IpcError {
    /// The session expired before a reply arrived
    #[serde(rename = "ETIMEOUT")]
    #[error("Timed out waiting for reply to '{channel}' (session {session_id}, {timeout_ms}ms)")]
    Timeout {
        channel: String,
        session_id: u64,
        timeout_ms: u64,
    },

    /// Directed send to a panel that no live window hosts
    #[serde(rename = "ENOPANEL")]
    #[error("Panel not found: {panel}")]
    NoPanel { panel: String },

    /// Panel-scoped send naming a channel nobody listens on
    #[serde(rename = "ENOMSG")]
    #[error("Panel '{panel}' has no listener for '{channel}'")]
    NoMsg { channel: String, panel: String },
}

impl IpcError {
    /// Stable string code for this error
    pub fn code(&self) -> &'static str {
        match self {
            IpcError::Timeout { .. } => "ETIMEOUT",
            IpcError::NoPanel { .. } => "ENOPANEL",
            IpcError::NoMsg { .. } => "ENOMSG",
        }
    }
}

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Undo(#[from] UndoError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl From<AppError> for String {
    fn from(error: AppError) -> String {
        error.to_string()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
