//! Error types for pipelink
//!
//! Every bounded IPC operation maps its failure onto one of these kinds so
//! callers can branch on the cause (not connected, disposed, timed out,
//! cancelled, bad payload).

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pipelink
#[derive(Error, Debug)]
pub enum Error {
    // === Channel State Errors ===
    #[error("Pipe is not connected")]
    NotConnected,

    #[error("Pipe has been disposed")]
    Disposed,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // === Timeout / Cancellation ===
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Operation was cancelled")]
    Cancelled,

    // === Payload Errors ===
    #[error("Received an empty payload")]
    EmptyPayload,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Argument Errors ===
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Missing required argument '{0}'")]
    MissingArgument(String),

    #[error("Pipe '{name}' already has the maximum of {max} server instance(s)")]
    InstanceLimit { name: String, max: usize },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(name: &str, reason: &str) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Whether this error means the operation ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether a host handler failing with this error ends the host loop
    ///
    /// A released or unusable channel cannot recover inside the loop, so
    /// these stop it. Everything else is logged and the loop goes on.
    pub fn stops_host_loop(&self) -> bool {
        matches!(
            self,
            Self::Disposed | Self::NotConnected | Self::InvalidOperation(_)
        )
    }

    /// Process exit code for a fatal failure
    ///
    /// IO failures report the OS error code when there is one.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(e) => e.raw_os_error().filter(|c| *c != 0).unwrap_or(1),
            Self::NotConnected => 2,
            Self::Disposed => 3,
            Self::InvalidOperation(_) => 4,
            Self::Timeout(_) => 5,
            Self::Cancelled => 6,
            Self::EmptyPayload | Self::Json(_) => 7,
            Self::InvalidArgument { .. } | Self::MissingArgument(_) => 8,
            Self::InstanceLimit { .. } => 9,
            Self::Config(_) | Self::ConfigParse(_) | Self::FileRead { .. } => 10,
            Self::Internal(_) => 1,
        }
    }
}
