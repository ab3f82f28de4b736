//! Error types for replication operations.

use thiserror::Error;

/// Errors that can occur while replicating a document.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CrdtError {
    /// Failed to import CRDT data.
    #[error("failed to import CRDT data: {0}")]
    Import(String),

    /// Failed to export CRDT data.
    #[error("failed to export CRDT data: {0}")]
    Export(String),

    /// Loro rejected an operation.
    #[error("loro error: {0}")]
    Loro(#[from] loro::LoroError),

    /// Encoded anchor or version vector could not be decoded.
    #[error("invalid encoded {what}")]
    Decode { what: &'static str },

    /// Relay connection could not be established or broke.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire message could not be encoded/decoded.
    #[error(transparent)]
    Protocol(#[from] codoc_common::CommonError),

    /// The session was closed while an operation was in flight.
    #[error("session closed")]
    Closed,

    /// Setup gave up after too many consecutive failures.
    #[error("giving up after {0} failed setup attempts")]
    RetriesExhausted(u32),
}

impl From<tokio_tungstenite::tungstenite::Error> for CrdtError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        CrdtError::Transport(e.to_string())
    }
}
