//! Error types for the bridge.

use thiserror::Error;

/// Main error type for the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors (invalid JSON, missing fields, conflicts)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Startup errors (upstream failed its initial connect)
    #[error("Startup error: {0}")]
    Startup(String),

    /// Transport errors (channel cannot be opened, I/O failure mid-session)
    #[error("Transport error for '{name}': {message}")]
    Transport { name: String, message: String },

    /// Handshake errors (protocol initialize refused or failed)
    #[error("Handshake error for '{name}': {message}")]
    Handshake { name: String, message: String },

    /// A call or probe exceeded its deadline
    #[error("timeout after {after_ms}ms: {context}")]
    Timeout { after_ms: u128, context: String },

    /// No healthy session could be obtained
    #[error("Upstream '{0}' is unavailable")]
    Unavailable(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn transport(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn handshake(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handshake {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn timeout(after: std::time::Duration, context: impl Into<String>) -> Self {
        Self::Timeout {
            after_ms: after.as_millis(),
            context: context.into(),
        }
    }

    /// True for deadline-expiry errors, which map to HTTP 504 when the retry
    /// budget runs out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
