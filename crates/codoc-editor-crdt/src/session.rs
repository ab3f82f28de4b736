//! Per-document collaboration session.
//!
//! A `DocumentSession` owns everything replicated about one open document:
//! the relay connection, the replicated text, the awareness table and the
//! binding to the editor's buffer. It is created when the view opens a
//! document and closed (synchronously) before the next one is opened.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use codoc_common::awareness::{ChangeOrigin, OUTDATED_TIMEOUT};
use codoc_common::listeners::ListenerId;
use codoc_common::{Awareness, CollabMessage, UserInfo};
use codoc_editor_core::LocalBuffer;
use loro::Subscription;
use smol_str::{SmolStr, ToSmolStr};
use tokio::sync::mpsc;
use url::Url;
use web_time::Instant;

use crate::binding::TextBinding;
use crate::bootstrap::{BootstrapPolicy, SeedOutcome, SyncWait};
use crate::doc::ReplicatedDoc;
use crate::error::CrdtError;
use crate::mirror::AwarenessMirror;
use crate::transport::{RelayClient, RelaySender};

/// Consecutive setup failures before giving up until a manual reset.
pub const MAX_SETUP_ATTEMPTS: u32 = 5;

/// How often the run loop refreshes and sweeps awareness.
pub const AWARENESS_TICK: Duration = Duration::from_secs(5);

/// Session state machine.
///
/// UI can use this to show appropriate status indicators.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionState {
    /// No session, or the session was closed.
    #[default]
    Idle,
    /// Opening the relay connection.
    Connecting,
    /// Connected, waiting for a peer to answer the handshake.
    Syncing,
    /// Bound to the editor and exchanging updates.
    Active,
    /// Setup or transport failed.
    Failed(SmolStr),
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failed(msg) => Some(msg.as_str()),
            _ => None,
        }
    }
}

/// Bounded counter of consecutive setup failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupRetry {
    failures: u32,
    cap: u32,
}

impl Default for SetupRetry {
    fn default() -> Self {
        Self::new(MAX_SETUP_ATTEMPTS)
    }
}

impl SetupRetry {
    pub fn new(cap: u32) -> Self {
        Self { failures: 0, cap }
    }

    pub fn can_attempt(&self) -> bool {
        self.failures < self.cap
    }

    /// Count a failure; returns the number of consecutive failures so far.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Manual trigger (navigation, explicit reconnect).
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay before the next attempt: 500 ms doubling, capped at 8 s.
    pub fn backoff(&self) -> Duration {
        let exp = self.failures.min(4);
        Duration::from_millis(500 * (1u64 << exp))
    }
}

/// What to open and how.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub doc_id: String,
    pub relay_url: Url,
    pub bootstrap: BootstrapPolicy,
    /// Display identity; a random one is picked when absent.
    pub user: Option<UserInfo>,
    /// Fixed replica id, mainly for tests.
    pub peer_id: Option<u64>,
}

impl SessionConfig {
    pub fn new(doc_id: impl Into<String>, relay_url: Url) -> Self {
        Self {
            doc_id: doc_id.into(),
            relay_url,
            bootstrap: BootstrapPolicy::default(),
            user: None,
            peer_id: None,
        }
    }
}

/// Replication state for one open document.
pub struct DocumentSession {
    doc_id: String,
    state: RefCell<SessionState>,
    transport: RefCell<Option<RelayClient>>,
    incoming: RefCell<Option<mpsc::UnboundedReceiver<CollabMessage>>>,
    sender: RelaySender,
    doc: ReplicatedDoc,
    awareness: Awareness,
    buffer: LocalBuffer,
    binding: RefCell<Option<TextBinding>>,
    local_updates: RefCell<Option<Subscription>>,
    awareness_listener: Cell<Option<ListenerId>>,
    bootstrap: BootstrapPolicy,
    synced: Cell<bool>,
    seed_outcome: Cell<Option<SeedOutcome>>,
    closed: Cell<bool>,
}

impl DocumentSession {
    /// Connect to the relay, run the handshake and bind `buffer`.
    pub async fn open(config: SessionConfig, buffer: LocalBuffer) -> Result<Self, CrdtError> {
        let client = RelayClient::connect(&config.relay_url).await?;
        let session = Self::with_transport(config, buffer, client)?;
        session.handshake().await?;
        Ok(session)
    }

    /// Build a session over an already-connected transport. The handshake
    /// request is sent immediately; call [`handshake`](Self::handshake) next.
    pub fn with_transport(
        config: SessionConfig,
        buffer: LocalBuffer,
        mut client: RelayClient,
    ) -> Result<Self, CrdtError> {
        let doc = match config.peer_id {
            Some(peer) => ReplicatedDoc::with_peer_id(peer)?,
            None => ReplicatedDoc::new(),
        };
        let awareness = Awareness::new(doc.peer_id());
        awareness.set_local_user(config.user.clone().unwrap_or_else(UserInfo::random));

        let sender = client.sender();
        let incoming = client.take_incoming().ok_or(CrdtError::Closed)?;

        let session = Self {
            doc_id: config.doc_id,
            state: RefCell::new(SessionState::Connecting),
            transport: RefCell::new(Some(client)),
            incoming: RefCell::new(Some(incoming)),
            sender,
            doc,
            awareness,
            buffer,
            binding: RefCell::new(None),
            local_updates: RefCell::new(None),
            awareness_listener: Cell::new(None),
            bootstrap: config.bootstrap,
            synced: Cell::new(false),
            seed_outcome: Cell::new(None),
            closed: Cell::new(false),
        };
        session.wire_outgoing();

        session.sender.send(CollabMessage::SyncStep1 {
            version: session.doc.version(),
        })?;
        session.sender.send(CollabMessage::QueryAwareness)?;
        session.sender.send(CollabMessage::Awareness {
            update: session.awareness.encode_local(),
        })?;
        session.set_state(SessionState::Syncing);
        Ok(session)
    }

    fn wire_outgoing(&self) {
        let updates = self.sender.clone();
        let subscription = self.doc.subscribe_local_update(move |update| {
            let _ = updates.send(CollabMessage::Update {
                update: update.to_vec(),
            });
        });
        *self.local_updates.borrow_mut() = Some(subscription);

        let presence = self.sender.clone();
        let awareness = self.awareness.clone();
        let id = self.awareness.on_change(move |change| {
            if change.origin != ChangeOrigin::Local {
                return;
            }
            let update = awareness.encode_local();
            if let Err(e) = presence.send(CollabMessage::Awareness { update }) {
                tracing::trace!(error = %e, "session: awareness not sent");
            }
        });
        self.awareness_listener.set(Some(id));
    }

    /// Wait for a peer (bounded by the bootstrap timeout), seed if we are
    /// first, then bind the editor buffer.
    pub async fn handshake(&self) -> Result<(), CrdtError> {
        let mut incoming = self.incoming.borrow_mut().take().ok_or(CrdtError::Closed)?;

        let mut relay_closed = false;
        let wait = self
            .bootstrap
            .wait_for_sync(async {
                while !self.synced.get() {
                    match incoming.recv().await {
                        Some(message) => self.dispatch(message),
                        None => {
                            relay_closed = true;
                            return;
                        }
                    }
                }
            })
            .await;
        *self.incoming.borrow_mut() = Some(incoming);

        if relay_closed {
            self.fail("relay closed during handshake");
            return Err(CrdtError::Transport("relay closed during handshake".into()));
        }
        tracing::debug!(doc_id = %self.doc_id, ?wait, "session: handshake finished");

        let outcome = self
            .bootstrap
            .seed_if_empty(&self.doc, &self.buffer.text())?;
        self.seed_outcome.set(Some(outcome));
        if wait == SyncWait::TimedOut && outcome == SeedOutcome::Seeded {
            tracing::info!(doc_id = %self.doc_id, "session: no peers, seeded from local buffer");
        }

        let binding = TextBinding::with_awareness(
            self.doc.clone(),
            self.buffer.clone(),
            self.awareness.clone(),
        );
        *self.binding.borrow_mut() = Some(binding);
        self.set_state(SessionState::Active);
        Ok(())
    }

    /// Process incoming messages until the relay goes away or the session
    /// is closed. Also keeps awareness fresh.
    pub async fn run(&self) {
        let Some(mut incoming) = self.incoming.borrow_mut().take() else {
            return;
        };
        let mut tick = tokio::time::interval(AWARENESS_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = incoming.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => break,
                },
                _ = tick.tick() => self.tick(Instant::now()),
            }
            if self.closed.get() {
                break;
            }
        }

        if !self.closed.get() {
            self.fail("relay connection closed");
        }
    }

    /// Handle one incoming message.
    pub fn handle_message(&self, message: CollabMessage) -> Result<(), CrdtError> {
        if self.closed.get() {
            return Err(CrdtError::Closed);
        }
        tracing::trace!(kind = message.kind(), doc_id = %self.doc_id, "session: message");
        match message {
            CollabMessage::SyncStep1 { version } => {
                let update = self.doc.export_updates_since(&version)?;
                self.sender.send(CollabMessage::SyncStep2 { update })?;
            }
            CollabMessage::SyncStep2 { update } => {
                self.doc.import(&update)?;
                self.synced.set(true);
            }
            CollabMessage::Update { update } => {
                self.doc.import(&update)?;
            }
            CollabMessage::Awareness { update } => {
                self.awareness.apply_update(&update);
            }
            CollabMessage::QueryAwareness => {
                self.sender.send(CollabMessage::Awareness {
                    update: self.awareness.encode_local(),
                })?;
            }
        }
        Ok(())
    }

    fn dispatch(&self, message: CollabMessage) {
        let kind = message.kind();
        if let Err(e) = self.handle_message(message) {
            tracing::warn!(error = %e, kind, doc_id = %self.doc_id, "session: message failed");
        }
    }

    /// Periodic awareness upkeep: drop silent peers, refresh our own entry.
    pub fn tick(&self, now: Instant) {
        if self.closed.get() {
            return;
        }
        self.awareness.remove_outdated(now, OUTDATED_TIMEOUT);
        if let Some(update) = self.awareness.renew(now, OUTDATED_TIMEOUT) {
            let _ = self.sender.send(CollabMessage::Awareness { update });
        }
    }

    /// Tear down transport, then the replicated document, then the binding.
    /// Synchronous; safe to call more than once.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        // Tell peers we are leaving while the socket is still up.
        self.awareness.set_local_state(None);

        if let Some(mut transport) = self.transport.borrow_mut().take() {
            transport.close();
        }
        self.incoming.borrow_mut().take();

        self.local_updates.borrow_mut().take();
        if let Some(id) = self.awareness_listener.take() {
            self.awareness.remove_listener(id);
        }
        self.doc.destroy();

        if let Some(binding) = self.binding.borrow_mut().take() {
            binding.destroy();
        }

        self.set_state(SessionState::Idle);
        tracing::info!(doc_id = %self.doc_id, "session: closed");
    }

    fn fail(&self, reason: &str) {
        tracing::warn!(doc_id = %self.doc_id, reason, "session: failed");
        self.set_state(SessionState::Failed(reason.to_smolstr()));
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!(doc_id = %self.doc_id, ?state, "session: state");
        *self.state.borrow_mut() = state;
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn doc(&self) -> &ReplicatedDoc {
        &self.doc
    }

    pub fn awareness(&self) -> &Awareness {
        &self.awareness
    }

    pub fn buffer(&self) -> &LocalBuffer {
        &self.buffer
    }

    pub fn is_synced(&self) -> bool {
        self.synced.get()
    }

    pub fn seed_outcome(&self) -> Option<SeedOutcome> {
        self.seed_outcome.get()
    }

    pub fn binding(&self) -> Option<TextBinding> {
        self.binding.borrow().clone()
    }

    pub fn mirror(&self) -> Option<AwarenessMirror> {
        self.binding
            .borrow()
            .as_ref()
            .and_then(|b| b.mirror().cloned())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("doc_id", &self.doc_id)
            .field("state", &*self.state.borrow())
            .field("synced", &self.synced.get())
            .finish()
    }
}

/// The view's single session slot. Opening a document closes the previous
/// session first; setup failures count against a [`SetupRetry`].
#[derive(Debug, Default)]
pub struct SessionSlot {
    current: Option<DocumentSession>,
    retry: SetupRetry,
}

impl SessionSlot {
    pub fn new(retry: SetupRetry) -> Self {
        Self {
            current: None,
            retry,
        }
    }

    pub fn current(&self) -> Option<&DocumentSession> {
        self.current.as_ref()
    }

    pub fn retry(&self) -> &SetupRetry {
        &self.retry
    }

    /// One setup attempt for `config`.
    pub async fn open(
        &mut self,
        config: SessionConfig,
        buffer: LocalBuffer,
    ) -> Result<&DocumentSession, CrdtError> {
        self.close();
        if !self.retry.can_attempt() {
            return Err(CrdtError::RetriesExhausted(self.retry.failures()));
        }
        let doc_id = config.doc_id.clone();
        match DocumentSession::open(config, buffer).await {
            Ok(session) => {
                self.retry.record_success();
                Ok(self.current.insert(session))
            }
            Err(e) => {
                let failures = self.retry.record_failure();
                tracing::warn!(%doc_id, failures, error = %e, "session: setup failed");
                Err(e)
            }
        }
    }

    /// Retry setup with backoff until it succeeds or the cap is reached.
    pub async fn open_with_retry(
        &mut self,
        config: SessionConfig,
        buffer: LocalBuffer,
    ) -> Result<&DocumentSession, CrdtError> {
        loop {
            let attempt = self.open(config.clone(), buffer.clone()).await.map(|_| ());
            match attempt {
                Ok(()) => break,
                Err(CrdtError::RetriesExhausted(n)) => return Err(CrdtError::RetriesExhausted(n)),
                Err(_) if !self.retry.can_attempt() => {
                    return Err(CrdtError::RetriesExhausted(self.retry.failures()));
                }
                Err(_) => tokio::time::sleep(self.retry.backoff()).await,
            }
        }
        self.current.as_ref().ok_or(CrdtError::Closed)
    }

    /// Navigation to another document: close and re-arm retries.
    pub fn navigate(&mut self) {
        self.close();
        self.retry.reset();
    }

    pub fn close(&mut self) {
        if let Some(session) = self.current.take() {
            session.close();
        }
    }
}
