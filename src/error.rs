//! Error types for DHCP client management.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

use std::fmt;

use crate::api::Operation;
use crate::search::SearchKind;

/// The remote call and key an error originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// The remote verb that failed.
    pub operation: Operation,
    /// The subnet, address, name or MAC the call was made for.
    pub key: String,
}

impl CallContext {
    pub fn new(operation: Operation, key: impl Into<String>) -> Self {
        Self {
            operation,
            key: key.into(),
        }
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.key)
    }
}

/// Errors that can occur while managing subnet clients.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config file or output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The server has no client matching the key.
    #[error("{0}: no such client")]
    NotFound(CallContext),

    /// A create collided with a client the server already holds.
    #[error("{0}: client already exists")]
    AlreadyExists(CallContext),

    /// Any other non-zero status returned by the server.
    ///
    /// Callers decide whether to retry; nothing in this crate does.
    #[error("{context}: remote status {status}")]
    RemoteFailure { status: u32, context: CallContext },

    /// Text or an address could not be put into wire form.
    ///
    /// Typically a malformed address string or a name with an embedded NUL.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The server returned a buffer that does not match the layout contract.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A search key payload was read through the wrong accessor.
    #[error("Search key holds a {actual} payload, not {requested}")]
    SearchFieldMismatch {
        requested: SearchKind,
        actual: SearchKind,
    },

    /// An enumeration was stopped by the caller between pages.
    #[error("Enumeration cancelled")]
    Cancelled,

    /// No remote management API is available on this platform.
    #[error("Remote DHCP API unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Returns true for errors caused by the registry state rather than the call.
    pub fn is_registry_mismatch(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::AlreadyExists(_))
    }
}

/// A specialized Result type for client management operations.
pub type Result<T> = std::result::Result<T, Error>;
