//! Error types for the debug adapter
//!
//! Errors fall into two groups. Fatal errors (framing, I/O, internal) end
//! the session. Everything else is reported back to the client as an error
//! response and the session carries on.

use std::io;
use thiserror::Error;

use crate::adapter::SessionState;
use crate::bridge::BridgeError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debug adapter
#[derive(Error, Debug)]
pub enum Error {
    // === Transport Errors ===
    #[error("DAP framing error: {0}")]
    Framing(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Client closed the request stream")]
    EndOfStream,

    #[error("Client disconnected")]
    Disconnected,

    // === Protocol Errors ===
    #[error("DAP request '{command}' failed: {message}")]
    Protocol { command: String, message: String },

    #[error("Unknown variablesReference {0}")]
    UnknownVariablesReference(i64),

    // === Interpreter Errors ===
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    // === Session Errors ===
    #[error("Illegal session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a protocol error for a request
    pub fn protocol(command: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Create a framing error
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing(message.into())
    }

    /// Whether the error ends the session instead of producing an error response
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Framing(_)
                | Error::Io(_)
                | Error::Json(_)
                | Error::EndOfStream
                | Error::Disconnected
                | Error::InvalidTransition { .. }
                | Error::Internal(_)
        )
    }

    /// Whether the session ended at the client's request rather than on a failure
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, Error::EndOfStream | Error::Disconnected)
    }

    /// Text placed in the `message` field of an error response
    pub fn response_message(&self) -> String {
        match self {
            Error::Protocol { message, .. } => message.clone(),
            Error::UnknownVariablesReference(_) => "unknown variablesReference".to_string(),
            other => other.to_string(),
        }
    }
}
