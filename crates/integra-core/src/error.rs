//! Error types for Integra.
//!
//! Registry-side and call-side failures are distinct variants so callers can
//! react to them without string matching. Faults raised by a remote handler are
//! carried as a `(kind, message)` pair since the two ends of a call share no
//! error types.

use crate::handler::FaultKind;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Integra.
#[derive(Debug, Error)]
pub enum IntegraError {
    // Registry errors
    #[error("Service already registered: {name}")]
    DuplicateName { name: String },

    #[error("Service not registered: {name}")]
    NotFound { name: String },

    #[error("Invalid service name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    // Call errors
    #[error("Service unavailable: {name}")]
    ServiceUnavailable { name: String },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote error ({kind}): {message}")]
    Remote { kind: FaultKind, message: String },

    #[error("Connection to {addr} lost")]
    ConnectionLost { addr: SocketAddr },

    // Plumbing errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Discovery error: {message}")]
    Discovery { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Integra operations.
pub type Result<T> = std::result::Result<T, IntegraError>;

impl From<std::io::Error> for IntegraError {
    fn from(err: std::io::Error) -> Self {
        IntegraError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for IntegraError {
    fn from(err: serde_json::Error) -> Self {
        IntegraError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

#[cfg(feature = "mdns")]
impl From<mdns_sd::Error> for IntegraError {
    fn from(err: mdns_sd::Error) -> Self {
        IntegraError::Discovery {
            message: err.to_string(),
        }
    }
}

impl IntegraError {
    /// Fault kind used when this error crosses the wire from inside a handler.
    ///
    /// Remote faults keep their original kind so nested calls report the
    /// innermost cause.
    pub fn to_fault_kind(&self) -> FaultKind {
        match self {
            IntegraError::Remote { kind, .. } => kind.clone(),

            IntegraError::ServiceUnavailable { .. }
            | IntegraError::Timeout(_)
            | IntegraError::ConnectionLost { .. } => FaultKind::Unavailable,

            IntegraError::Validation { .. } | IntegraError::InvalidName { .. } => {
                FaultKind::InvalidArguments
            }

            _ => FaultKind::HandlerFailed,
        }
    }

    /// True when the remote handler does not expose the requested method.
    pub fn is_method_not_found(&self) -> bool {
        matches!(
            self,
            IntegraError::Remote {
                kind: FaultKind::MethodNotFound,
                ..
            }
        )
    }

    /// Check if a caller-side retry policy may reasonably try again.
    ///
    /// The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IntegraError::ServiceUnavailable { .. }
                | IntegraError::Timeout(_)
                | IntegraError::ConnectionLost { .. }
        )
    }
}
