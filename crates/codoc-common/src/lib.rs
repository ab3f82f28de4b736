//! Shared types for codoc clients and the relay.

pub mod awareness;
pub mod config;
pub mod error;
pub mod listeners;
pub mod protocol;

pub use awareness::{
    Awareness, AwarenessChange, AwarenessEntry, AwarenessState, AwarenessUpdate, ChangeOrigin,
    EncodedSelection, OUTDATED_TIMEOUT, UserInfo,
};
pub use config::{ClientConfig, relay_url};
pub use error::CommonError;
pub use listeners::{ListenerId, Listeners};
pub use protocol::CollabMessage;
