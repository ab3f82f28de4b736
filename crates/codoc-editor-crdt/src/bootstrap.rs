//! First-client seeding.
//!
//! When a document is opened, wait briefly for a peer to answer the sync
//! handshake. If nobody does (or the answer is an empty document) and the
//! local buffer has content, that content becomes the initial replicated
//! text. Two clients opening a brand-new document within the wait window
//! can both seed; only seeding an already populated document is guaranteed
//! to be a no-op.

use std::future::Future;
use std::time::Duration;

use crate::doc::ReplicatedDoc;
use crate::error::CrdtError;

/// How long to wait for a peer before considering ourselves first.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(2);

/// Origin tag on the seeding transaction.
pub const SEED_ORIGIN: &str = "codoc-seed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncWait {
    Synced,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The replicated text was empty and now holds the local content.
    Seeded,
    /// The replicated text already had content; nothing was written.
    AlreadyPopulated,
    /// Both sides are empty; nothing to seed.
    LocalEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapPolicy {
    pub timeout: Duration,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

impl BootstrapPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Drive `synced` until it completes or the timeout elapses. `synced`
    /// is expected to keep processing incoming messages while it waits.
    pub async fn wait_for_sync<F>(&self, synced: F) -> SyncWait
    where
        F: Future<Output = ()>,
    {
        match tokio::time::timeout(self.timeout, synced).await {
            Ok(()) => SyncWait::Synced,
            Err(_) => {
                tracing::debug!(timeout = ?self.timeout, "bootstrap: no peer answered");
                SyncWait::TimedOut
            }
        }
    }

    /// Seed `doc` from `local` if `doc` is empty, in one transaction.
    pub fn seed_if_empty(&self, doc: &ReplicatedDoc, local: &str) -> Result<SeedOutcome, CrdtError> {
        if !doc.is_empty() {
            return Ok(SeedOutcome::AlreadyPopulated);
        }
        if local.is_empty() {
            return Ok(SeedOutcome::LocalEmpty);
        }
        doc.transact(SEED_ORIGIN, |text| text.insert(0, local))?;
        tracing::info!(chars = doc.len_chars(), "bootstrap: seeded replicated text");
        Ok(SeedOutcome::Seeded)
    }
}
