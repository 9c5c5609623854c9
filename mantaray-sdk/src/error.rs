//! Error types for the client library.

use std::io;

/// Errors surfaced by connection management.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The host could not be reached (DNS, refused, reset, ...).
    #[error("network error connecting to {addr}: {source}")]
    Network {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {addr} failed: {source}")]
    Tls {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    /// A live connection for this server already exists.
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("no connection named {0}")]
    UnknownServer(String),

    /// The connection task has stopped; commands can no longer be sent.
    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
