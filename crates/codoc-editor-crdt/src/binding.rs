//! Two-way binding between the replicated text and the local buffer.
//!
//! Remote deltas are replayed onto the buffer; local content changes are
//! replayed onto the replicated text as one transaction per batch. Both
//! directions run under the same [`BusyGuard`], which is what stops a
//! remote delta from echoing back as a local change (and vice versa).
//!
//! Around remote transactions the buffer's selections are captured as
//! stable anchors and re-resolved afterwards, so a collaborator typing
//! above your cursor moves the cursor with the text.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use codoc_common::Awareness;
use codoc_common::listeners::ListenerId;
use codoc_editor_core::{ContentChangeEvent, LocalBuffer, Selection, TextEdit};

use crate::anchor::AnchoredSelection;
use crate::doc::{DeltaOp, ReplicatedDoc, TextDeltaEvent, TransactionInfo};
use crate::guard::BusyGuard;
use crate::mirror::AwarenessMirror;

/// Origin tag on transactions produced from local buffer edits.
pub const BINDING_ORIGIN: &str = "codoc-binding";

struct BindingInner {
    doc: ReplicatedDoc,
    buffer: LocalBuffer,
    guard: BusyGuard,
    saved_selections: RefCell<Vec<Option<AnchoredSelection>>>,
    mirror: Option<AwarenessMirror>,
    before_listener: Cell<Option<ListenerId>>,
    delta_listener: Cell<Option<ListenerId>>,
    content_listener: Cell<Option<ListenerId>>,
    destroyed: Cell<bool>,
}

/// Keeps `LocalBuffer` text equal to the replicated text.
#[derive(Clone)]
pub struct TextBinding {
    inner: Rc<BindingInner>,
}

impl TextBinding {
    /// Bind without remote cursors.
    pub fn new(doc: ReplicatedDoc, buffer: LocalBuffer) -> Self {
        Self::build(doc, buffer, None)
    }

    /// Bind and mirror collaborators' selections through `awareness`.
    pub fn with_awareness(doc: ReplicatedDoc, buffer: LocalBuffer, awareness: Awareness) -> Self {
        Self::build(doc, buffer, Some(awareness))
    }

    fn build(doc: ReplicatedDoc, buffer: LocalBuffer, awareness: Option<Awareness>) -> Self {
        // The replicated text is authoritative at bind time.
        let remote = doc.text();
        if buffer.text() != remote {
            tracing::debug!(
                local_len = buffer.len_chars(),
                remote_len = doc.len_chars(),
                "binding: overwriting buffer with replicated text"
            );
            buffer.set_value(&remote);
        }

        let guard = BusyGuard::new();
        let mirror = awareness.map(|a| AwarenessMirror::new(doc.clone(), buffer.clone(), a));

        let inner = Rc::new(BindingInner {
            doc,
            buffer,
            guard,
            saved_selections: RefCell::new(Vec::new()),
            mirror,
            before_listener: Cell::new(None),
            delta_listener: Cell::new(None),
            content_listener: Cell::new(None),
            destroyed: Cell::new(false),
        });

        let weak = Rc::downgrade(&inner);
        inner.before_listener.set(Some(inner.doc.on_before_transaction({
            let weak = weak.clone();
            move |info: &TransactionInfo| {
                if let Some(inner) = weak.upgrade() {
                    inner.guard.run(|| inner.capture_selections(info));
                }
            }
        })));

        inner.delta_listener.set(Some(inner.doc.on_text_delta({
            let weak = weak.clone();
            move |event: &TextDeltaEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.guard.run_or(
                        || inner.apply_remote(event),
                        || {
                            tracing::trace!(
                                origin = %event.origin,
                                "binding: skipped delta produced by the binding"
                            )
                        },
                    );
                    if let Some(mirror) = &inner.mirror {
                        mirror.rerender();
                    }
                }
            }
        })));

        inner.content_listener.set(Some(inner.buffer.on_did_change_content({
            let weak: Weak<BindingInner> = weak;
            move |event: &ContentChangeEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.guard.run(|| inner.apply_local(event));
                }
            }
        })));

        Self { inner }
    }

    pub fn doc(&self) -> &ReplicatedDoc {
        &self.inner.doc
    }

    pub fn buffer(&self) -> &LocalBuffer {
        &self.inner.buffer
    }

    pub fn mirror(&self) -> Option<&AwarenessMirror> {
        self.inner.mirror.as_ref()
    }

    /// True while a replay in either direction is running.
    pub fn is_busy(&self) -> bool {
        self.inner.guard.is_busy()
    }

    /// Unregister every observer and drop remote decorations. Safe to call
    /// more than once.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.replace(true) {
            return;
        }
        if let Some(id) = inner.before_listener.take() {
            inner.doc.remove_before_listener(id);
        }
        if let Some(id) = inner.delta_listener.take() {
            inner.doc.remove_delta_listener(id);
        }
        if let Some(id) = inner.content_listener.take() {
            inner.buffer.remove_content_listener(id);
        }
        if let Some(mirror) = &inner.mirror {
            mirror.destroy();
        }
        inner.saved_selections.borrow_mut().clear();
        tracing::debug!("binding: destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }
}

impl BindingInner {
    fn capture_selections(&self, info: &TransactionInfo) {
        let saved = self
            .buffer
            .selections()
            .into_iter()
            .map(|sel| AnchoredSelection::capture(&self.doc, sel.anchor, sel.head))
            .collect::<Vec<_>>();
        tracing::trace!(origin = %info.origin, count = saved.len(), "binding: captured selections");
        *self.saved_selections.borrow_mut() = saved;
    }

    /// Replay one delta onto the buffer, walking a running char index.
    fn apply_remote(&self, event: &TextDeltaEvent) {
        let mut index = 0usize;
        for op in &event.ops {
            let edit = match op {
                DeltaOp::Retain(n) => {
                    index += n;
                    continue;
                }
                DeltaOp::Insert(text) => {
                    let edit = TextEdit::insert(index, text.as_str());
                    index += text.chars().count();
                    edit
                }
                DeltaOp::Delete(n) => TextEdit::delete(index..index + n),
            };
            if let Err(e) = self.buffer.apply_edits(vec![edit]) {
                tracing::warn!(error = %e, "binding: delta does not fit buffer, resetting text");
                self.buffer.set_value(&self.doc.text());
                break;
            }
        }

        if self.buffer.len_chars() != self.doc.len_chars() {
            tracing::warn!(
                buffer = self.buffer.len_chars(),
                doc = self.doc.len_chars(),
                "binding: buffer diverged after remote delta, resetting text"
            );
            self.buffer.set_value(&self.doc.text());
        }

        self.restore_selections();
    }

    /// Re-resolve captured selections. Selections whose anchors no longer
    /// resolve keep whatever offsets the buffer shifted them to.
    fn restore_selections(&self) {
        let saved = std::mem::take(&mut *self.saved_selections.borrow_mut());
        if saved.is_empty() {
            return;
        }
        let current = self.buffer.selections();
        if current.is_empty() {
            return;
        }
        let restored: Vec<Selection> = current
            .iter()
            .enumerate()
            .map(|(i, cur)| {
                saved
                    .get(i)
                    .and_then(Option::as_ref)
                    .and_then(|sel| sel.resolve(&self.doc))
                    .map(|(anchor, head)| Selection::new(anchor, head))
                    .unwrap_or(*cur)
            })
            .collect();
        self.buffer.set_selections(restored);
    }

    /// Replay a local change batch onto the replicated text in one commit.
    fn apply_local(&self, event: &ContentChangeEvent) {
        let mut changes = event.changes.clone();
        changes.sort_by(|a, b| b.range_offset.cmp(&a.range_offset));

        let result = self.doc.transact(BINDING_ORIGIN, |text| {
            for change in &changes {
                if change.range_length > 0 {
                    text.delete(change.range_offset, change.range_length)?;
                }
                if !change.text.is_empty() {
                    text.insert(change.range_offset, &change.text)?;
                }
            }
            Ok(())
        });

        if let Err(e) = result {
            tracing::warn!(error = %e, version = event.version, "binding: local edit rejected");
        }
    }
}
