//! Error types for the rportfwd relay.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for rportfwd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while managing or running forwards.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port text did not parse as a non-zero 16-bit integer.
    #[error("Invalid port: {0:?}")]
    InvalidPort(String),

    /// Forward address is neither an IP literal nor a resolvable host name.
    #[error("Failed to resolve address: {0}")]
    AddressResolution(String),

    /// Another forward already owns this bind port.
    #[error("Bind port {0} is already forwarded")]
    AlreadyBound(u16),

    /// Creating a listening socket failed.
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Listener setup produced nothing to accept on.
    #[error("No listeners created for bind port {0}")]
    NoListeners(u16),

    /// Stop was called while no forward is active.
    #[error("No active forwards")]
    NoForwards,

    /// No forward is registered under this bind port.
    #[error("No forward on bind port {0}")]
    NotFound(u16),

    /// Outbound connection to the forward target failed.
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Outbound connect did not complete in time.
    #[error("Connection timeout")]
    Timeout,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this is a runtime network failure the relay should log and
    /// move past, as opposed to a caller or state error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Connect { .. } | Error::Timeout
        )
    }
}
