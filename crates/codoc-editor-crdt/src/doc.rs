//! Replicated document handle.
//!
//! Wraps a `LoroDoc` holding one text container and turns Loro's diff
//! events into [`TextDeltaEvent`]s delivered on the UI thread. Loro invokes
//! subscribers with `Send + Sync` callbacks, so the subscription only queues
//! events; `transact` and `import` drain the queue once the commit or
//! import has settled and hand the events to the (single-threaded)
//! listeners.

use std::borrow::Cow;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use codoc_common::listeners::{ListenerId, Listeners};
use loro::event::{Diff, DiffEvent};
use loro::{
    ContainerTrait, EventTriggerKind, ExportMode, LoroDoc, LoroText, Subscription, TextDelta,
    VersionVector,
};

use crate::error::CrdtError;

/// Name of the root text container shared by every replica.
pub const TEXT_CONTAINER: &str = "content";

/// Origin tag used for imported remote updates.
pub const IMPORT_ORIGIN: &str = "remote";

/// One delta operation, in chars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    Retain(usize),
    Insert(String),
    Delete(usize),
}

/// Structural change to the replicated text from one commit or import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDeltaEvent {
    pub ops: Vec<DeltaOp>,
    pub origin: String,
    /// True for changes committed on this replica.
    pub local: bool,
}

/// Passed to before-transaction observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub origin: String,
    pub local: bool,
}

fn delta_op(delta: TextDelta) -> DeltaOp {
    match delta {
        TextDelta::Retain { retain, .. } => DeltaOp::Retain(retain),
        TextDelta::Insert { insert, .. } => DeltaOp::Insert(insert),
        TextDelta::Delete { delete } => DeltaOp::Delete(delete),
    }
}

type EventQueue = Arc<Mutex<Vec<TextDeltaEvent>>>;

struct DocInner {
    doc: LoroDoc,
    text: LoroText,
    queue: EventQueue,
    _text_subscription: Subscription,
    before_listeners: Listeners<TransactionInfo>,
    delta_listeners: Listeners<TextDeltaEvent>,
    destroyed: Cell<bool>,
}

/// Shared handle to the replicated text of one open document.
#[derive(Clone)]
pub struct ReplicatedDoc {
    inner: Rc<DocInner>,
}

impl ReplicatedDoc {
    /// Create an empty document with a random replica id.
    pub fn new() -> Self {
        Self::from_loro(LoroDoc::new())
    }

    /// Create an empty document with a fixed replica id.
    pub fn with_peer_id(peer_id: u64) -> Result<Self, CrdtError> {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer_id)?;
        Ok(Self::from_loro(doc))
    }

    /// Create a document from a snapshot (or update) export.
    pub fn from_snapshot(snapshot: &[u8]) -> Result<Self, CrdtError> {
        let doc = LoroDoc::new();
        doc.import(snapshot)
            .map_err(|e| CrdtError::Import(e.to_string()))?;
        Ok(Self::from_loro(doc))
    }

    fn from_loro(doc: LoroDoc) -> Self {
        let text = doc.get_text(TEXT_CONTAINER);
        let queue: EventQueue = Arc::new(Mutex::new(Vec::new()));

        let sink = queue.clone();
        let subscription = doc.subscribe(
            &text.id(),
            Arc::new(move |event: DiffEvent<'_>| {
                let local = matches!(event.triggered_by, EventTriggerKind::Local);
                let origin = event.origin.to_string();
                let mut queued = sink.lock().unwrap_or_else(|e| e.into_inner());
                for container in event.events {
                    if let Diff::Text(delta) = container.diff {
                        queued.push(TextDeltaEvent {
                            ops: delta.into_iter().map(delta_op).collect(),
                            origin: origin.clone(),
                            local,
                        });
                    }
                }
            }),
        );

        Self {
            inner: Rc::new(DocInner {
                doc,
                text,
                queue,
                _text_subscription: subscription,
                before_listeners: Listeners::new(),
                delta_listeners: Listeners::new(),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub fn peer_id(&self) -> u64 {
        self.inner.doc.peer_id()
    }

    /// Current text content.
    pub fn text(&self) -> String {
        self.inner.text.to_string()
    }

    pub fn len_chars(&self) -> usize {
        self.inner.text.len_unicode()
    }

    pub fn is_empty(&self) -> bool {
        self.len_chars() == 0
    }

    /// The underlying Loro document.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.inner.doc
    }

    /// The shared text container.
    pub fn loro_text(&self) -> &LoroText {
        &self.inner.text
    }

    /// Apply local mutations as one atomic commit tagged with `origin`.
    ///
    /// Before-transaction observers run first, then `f`, then the commit;
    /// the resulting delta is dispatched before this returns. If `f` fails,
    /// whatever it already applied is still committed and dispatched.
    pub fn transact<R>(
        &self,
        origin: &str,
        f: impl FnOnce(&LoroText) -> Result<R, loro::LoroError>,
    ) -> Result<R, CrdtError> {
        self.settle();
        self.inner.before_listeners.emit(&TransactionInfo {
            origin: origin.to_string(),
            local: true,
        });

        let result = f(&self.inner.text);
        self.inner.doc.set_next_commit_origin(origin);
        self.inner.doc.commit();
        self.dispatch_pending();

        Ok(result?)
    }

    /// Merge remote update bytes.
    pub fn import(&self, bytes: &[u8]) -> Result<(), CrdtError> {
        self.settle();
        self.inner.before_listeners.emit(&TransactionInfo {
            origin: IMPORT_ORIGIN.to_string(),
            local: false,
        });

        let result = self.inner.doc.import(bytes);
        self.dispatch_pending();

        match result {
            Ok(status) => {
                if status.pending.is_some() {
                    tracing::debug!("doc: import left pending changes (missing dependencies)");
                }
                Ok(())
            }
            Err(e) => Err(CrdtError::Import(e.to_string())),
        }
    }

    /// Commit anything left in Loro's implicit transaction and deliver any
    /// queued events.
    fn settle(&self) {
        self.inner.doc.commit();
        self.dispatch_pending();
    }

    fn dispatch_pending(&self) {
        let events = {
            let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *queue)
        };
        if self.inner.destroyed.get() {
            return;
        }
        for event in events {
            tracing::trace!(
                origin = %event.origin,
                local = event.local,
                ops = event.ops.len(),
                "doc: text delta"
            );
            self.inner.delta_listeners.emit(&event);
        }
    }

    pub fn on_before_transaction(
        &self,
        listener: impl Fn(&TransactionInfo) + 'static,
    ) -> ListenerId {
        self.inner.before_listeners.add(listener)
    }

    pub fn on_text_delta(&self, listener: impl Fn(&TextDeltaEvent) + 'static) -> ListenerId {
        self.inner.delta_listeners.add(listener)
    }

    pub fn remove_before_listener(&self, id: ListenerId) {
        self.inner.before_listeners.remove(id);
    }

    pub fn remove_delta_listener(&self, id: ListenerId) {
        self.inner.delta_listeners.remove(id);
    }

    /// Encoded version vector of everything this replica has seen.
    pub fn version(&self) -> Vec<u8> {
        self.inner.doc.oplog_vv().encode()
    }

    /// Updates a peer at `version` (as produced by [`version`](Self::version))
    /// is missing.
    pub fn export_updates_since(&self, version: &[u8]) -> Result<Vec<u8>, CrdtError> {
        let from = if version.is_empty() {
            VersionVector::default()
        } else {
            VersionVector::decode(version).map_err(|_| CrdtError::Decode {
                what: "version vector",
            })?
        };
        self.inner
            .doc
            .export(ExportMode::Updates {
                from: Cow::Owned(from),
            })
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    pub fn export_snapshot(&self) -> Result<Vec<u8>, CrdtError> {
        self.inner
            .doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    /// Called with the encoded update for every local commit. Loro may call
    /// this from any thread; keep the callback to channel sends.
    pub fn subscribe_local_update(
        &self,
        f: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .doc
            .subscribe_local_update(Box::new(move |update| {
                f(update);
                true
            }))
    }

    /// Drop every observer; later commits and imports dispatch nothing.
    /// Safe to call more than once.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        self.inner.before_listeners.clear();
        self.inner.delta_listeners.clear();
        tracing::debug!(peer = self.peer_id(), "doc: destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }
}

impl Default for ReplicatedDoc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplicatedDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedDoc")
            .field("peer_id", &self.peer_id())
            .field("len_chars", &self.len_chars())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}
