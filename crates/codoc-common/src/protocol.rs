//! Wire protocol for collaborative editing messages.
//!
//! The relay never decodes these; it forwards frames between members of a
//! room. Each binary WebSocket frame carries exactly one postcard-encoded
//! [`CollabMessage`].

use serde::{Deserialize, Serialize};

use crate::awareness::AwarenessUpdate;
use crate::error::CommonError;

/// Messages exchanged between collaborators through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollabMessage {
    /// "Here is what I have": sent on connect so peers can answer with
    /// whatever the sender is missing.
    SyncStep1 {
        /// Encoded version vector of the sender's document
        version: Vec<u8>,
    },

    /// Answer to `SyncStep1`: updates the asker is missing.
    SyncStep2 {
        /// Loro update bytes
        update: Vec<u8>,
    },

    /// Incremental document change.
    Update {
        /// Loro update bytes
        update: Vec<u8>,
    },

    /// Ephemeral presence state for one or more clients.
    Awareness { update: AwarenessUpdate },

    /// Ask peers to rebroadcast their awareness state (late joiner).
    QueryAwareness,
}

impl CollabMessage {
    /// Serialize message to postcard bytes for wire transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CommonError> {
        Ok(postcard::to_stdvec(self)?)
    }

    /// Deserialize message from postcard bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommonError> {
        Ok(postcard::from_bytes(bytes)?)
    }

    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyncStep1 { .. } => "sync-step-1",
            Self::SyncStep2 { .. } => "sync-step-2",
            Self::Update { .. } => "update",
            Self::Awareness { .. } => "awareness",
            Self::QueryAwareness => "query-awareness",
        }
    }
}
