//! Stateless WebSocket relay.
//!
//! Clients connect to `/relay/{doc_id}`; every frame one client sends is
//! forwarded unchanged to every other client on the same document id. The
//! relay never looks inside frames and keeps nothing once a room empties.

pub mod config;
pub mod error;
pub mod rooms;
pub mod server;

pub use config::RelayConfig;
pub use error::RelayError;
pub use rooms::{Frame, PeerId, Rooms};
pub use server::{AppState, MISSING_DOC_ID, router, run};
