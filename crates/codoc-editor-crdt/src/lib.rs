//! Loro-backed replication for the codoc editor.
//!
//! This crate provides:
//! - `ReplicatedDoc`: the shared text plus transaction and delta observers
//! - `TextBinding`: two-way sync between a `LocalBuffer` and the shared text
//! - `AwarenessMirror`: remote selections in, local selection out
//! - `BootstrapPolicy`: first-client seeding
//! - `DocumentSession`: relay connection and handshake for one document

mod anchor;
mod binding;
mod bootstrap;
mod doc;
mod error;
mod guard;
mod mirror;
mod session;
mod transport;

pub use anchor::{AnchoredSelection, StableAnchor};
pub use binding::{BINDING_ORIGIN, TextBinding};
pub use bootstrap::{BootstrapPolicy, DEFAULT_SYNC_TIMEOUT, SEED_ORIGIN, SeedOutcome, SyncWait};
pub use doc::{DeltaOp, IMPORT_ORIGIN, ReplicatedDoc, TEXT_CONTAINER, TextDeltaEvent, TransactionInfo};
pub use error::CrdtError;
pub use guard::BusyGuard;
pub use mirror::{AwarenessMirror, RemoteDecoration};
pub use session::{
    AWARENESS_TICK, DocumentSession, MAX_SETUP_ATTEMPTS, SessionConfig, SessionSlot, SessionState,
    SetupRetry,
};
pub use transport::{RelayClient, RelaySender};

// Re-export Loro types that consumers need
pub use loro::{ExportMode, LoroDoc, LoroText, VersionVector};
