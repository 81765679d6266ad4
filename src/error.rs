//! Error types for live-relay

use std::path::PathBuf;
use thiserror::Error;

/// Why an upgrade request was refused before any handshake
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeAuthError {
    #[error("Origin not allowed")]
    OriginNotAllowed,

    #[error("Missing or invalid token")]
    InvalidToken,
}

impl UpgradeAuthError {
    /// Status code written on the raw socket
    pub fn status_code(&self) -> u16 {
        match self {
            Self::OriginNotAllowed => 403,
            Self::InvalidToken => 401,
        }
    }

    /// Reason phrase paired with [`Self::status_code`]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::OriginNotAllowed => "Forbidden",
            Self::InvalidToken => "Unauthorized",
        }
    }
}

/// Main error type for live-relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to send frame to client {client_id}: {message}")]
    Send { client_id: String, message: String },

    #[error("Upgrade rejected: {0}")]
    UpgradeAuth(#[from] UpgradeAuthError),

    #[error("Tunnel error: {message}")]
    Tunnel { message: String },

    #[error("Watcher error: {message}")]
    Watcher { message: String },

    #[error("Malformed request: {message}")]
    Protocol { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Broken pipes and connection resets are routine when a peer goes away
    pub fn is_benign(&self) -> bool {
        match self {
            Self::Io(e) => is_benign_io(e),
            _ => false,
        }
    }
}

/// Classify socket errors that are expected during teardown
pub fn is_benign_io(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
    )
}

impl From<notify::Error> for RelayError {
    fn from(e: notify::Error) -> Self {
        Self::Watcher {
            message: e.to_string(),
        }
    }
}

/// Result type alias for live-relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
