//! Remote cursor mirror.
//!
//! Publishes the local selection through awareness as a pair of encoded
//! anchors and turns every other client's anchors back into decorations
//! over the local buffer.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ops::Range;
use std::rc::Rc;

use codoc_common::awareness::{AwarenessChange, EncodedSelection};
use codoc_common::listeners::{ListenerId, Listeners};
use codoc_common::Awareness;
use codoc_editor_core::{LocalBuffer, Selection, SelectionChangeEvent, SelectionDirection};

use crate::anchor::StableAnchor;
use crate::doc::ReplicatedDoc;

/// Highlight for one remote collaborator's selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDecoration {
    pub client_id: u64,
    /// Selected char range, `start <= end`.
    pub range: Range<usize>,
    /// Where the collaborator's caret sits (either end of `range`).
    pub head: usize,
    pub name: Option<String>,
    pub color: Option<String>,
    /// Class for the selection body, `remote-selection-{id}`.
    pub class_name: String,
    /// Class for the caret, `remote-selection-head-{id}`.
    pub head_class_name: String,
}

impl RemoteDecoration {
    /// Caret renders before the range (right-to-left selection).
    pub fn head_before(&self) -> bool {
        self.head == self.range.start && self.range.start != self.range.end
    }
}

struct MirrorInner {
    doc: ReplicatedDoc,
    buffer: LocalBuffer,
    awareness: Awareness,
    decorations: RefCell<BTreeMap<u64, RemoteDecoration>>,
    listeners: Listeners<Vec<RemoteDecoration>>,
    selection_listener: Cell<Option<ListenerId>>,
    awareness_listener: Cell<Option<ListenerId>>,
    destroyed: Cell<bool>,
}

/// Mirrors selections between the local buffer and awareness.
#[derive(Clone)]
pub struct AwarenessMirror {
    inner: Rc<MirrorInner>,
}

impl AwarenessMirror {
    pub fn new(doc: ReplicatedDoc, buffer: LocalBuffer, awareness: Awareness) -> Self {
        let inner = Rc::new(MirrorInner {
            doc,
            buffer,
            awareness,
            decorations: RefCell::new(BTreeMap::new()),
            listeners: Listeners::new(),
            selection_listener: Cell::new(None),
            awareness_listener: Cell::new(None),
            destroyed: Cell::new(false),
        });

        let weak = Rc::downgrade(&inner);
        inner
            .selection_listener
            .set(Some(inner.buffer.on_did_change_selection({
                let weak = weak.clone();
                move |event: &SelectionChangeEvent| {
                    if let Some(inner) = weak.upgrade() {
                        inner.publish(event.selections.first().copied());
                    }
                }
            })));

        inner
            .awareness_listener
            .set(Some(inner.awareness.on_change(move |change: &AwarenessChange| {
                if let Some(inner) = weak.upgrade() {
                    tracing::trace!(
                        changed = change.changed().count(),
                        origin = ?change.origin,
                        "mirror: awareness changed"
                    );
                    inner.rerender();
                }
            })));

        let mirror = Self { inner };
        mirror
            .inner
            .publish(mirror.inner.buffer.selections().first().copied());
        mirror.rerender();
        mirror
    }

    /// Recompute every remote decoration against the current text.
    pub fn rerender(&self) {
        self.inner.rerender();
    }

    /// Current decorations, ordered by client id.
    pub fn decorations(&self) -> Vec<RemoteDecoration> {
        self.inner.decorations.borrow().values().cloned().collect()
    }

    /// Called with the full decoration set whenever it changes.
    pub fn on_decorations_changed(
        &self,
        listener: impl Fn(&Vec<RemoteDecoration>) + 'static,
    ) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_decorations_listener(&self, id: ListenerId) {
        self.inner.listeners.remove(id);
    }

    /// Stop mirroring and clear decorations. Safe to call more than once.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.replace(true) {
            return;
        }
        if let Some(id) = inner.selection_listener.take() {
            inner.buffer.remove_selection_listener(id);
        }
        if let Some(id) = inner.awareness_listener.take() {
            inner.awareness.remove_listener(id);
        }
        let had_any = !inner.decorations.borrow().is_empty();
        inner.decorations.borrow_mut().clear();
        if had_any {
            inner.listeners.emit(&Vec::new());
        }
        inner.listeners.clear();
    }
}

impl MirrorInner {
    fn publish(&self, selection: Option<Selection>) {
        if self.destroyed.get() {
            return;
        }
        let encoded = selection.and_then(|sel| {
            let (anchor, head) = match sel.direction() {
                SelectionDirection::LeftToRight => (sel.start(), sel.end()),
                SelectionDirection::RightToLeft => (sel.end(), sel.start()),
            };
            Some(EncodedSelection {
                anchor: StableAnchor::at(&self.doc, anchor)?.encode(),
                head: StableAnchor::at(&self.doc, head)?.encode(),
            })
        });
        self.awareness.set_local_selection(encoded);
    }

    fn rerender(&self) {
        if self.destroyed.get() {
            return;
        }
        let local_id = self.awareness.client_id();
        let mut next = BTreeMap::new();

        for (client_id, state) in self.awareness.remote_states() {
            if client_id == local_id {
                continue;
            }
            let Some(selection) = state.selection else {
                continue;
            };
            let resolved = StableAnchor::decode(&selection.anchor)
                .ok()
                .and_then(|a| a.resolve(&self.doc))
                .zip(
                    StableAnchor::decode(&selection.head)
                        .ok()
                        .and_then(|h| h.resolve(&self.doc)),
                );
            let Some((anchor, head)) = resolved else {
                tracing::trace!(client_id, "mirror: remote selection did not resolve");
                continue;
            };

            let len = self.buffer.len_chars();
            let (anchor, head) = (anchor.min(len), head.min(len));
            let user = state.user;
            next.insert(
                client_id,
                RemoteDecoration {
                    client_id,
                    range: anchor.min(head)..anchor.max(head),
                    head,
                    name: user.as_ref().map(|u| u.name.clone()),
                    color: user.map(|u| u.color),
                    class_name: format!("remote-selection-{client_id}"),
                    head_class_name: format!("remote-selection-head-{client_id}"),
                },
            );
        }

        let changed = *self.decorations.borrow() != next;
        if changed {
            let snapshot: Vec<RemoteDecoration> = next.values().cloned().collect();
            *self.decorations.borrow_mut() = next;
            self.listeners.emit(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codoc_common::UserInfo;

    struct Peer {
        doc: ReplicatedDoc,
        buffer: LocalBuffer,
        awareness: Awareness,
        mirror: AwarenessMirror,
    }

    fn peer(id: u64, snapshot: Option<&[u8]>) -> Peer {
        let doc = ReplicatedDoc::with_peer_id(id).unwrap();
        if let Some(bytes) = snapshot {
            doc.import(bytes).unwrap();
        }
        let buffer = LocalBuffer::new(&doc.text());
        let awareness = Awareness::new(id);
        awareness.set_local_user(UserInfo::for_client(id));
        let mirror = AwarenessMirror::new(doc.clone(), buffer.clone(), awareness.clone());
        Peer {
            doc,
            buffer,
            awareness,
            mirror,
        }
    }

    #[test]
    fn test_remote_selection_becomes_decoration() {
        let seed = ReplicatedDoc::with_peer_id(9).unwrap();
        seed.transact("seed", |t| t.insert(0, "hello collaborative world"))
            .unwrap();
        let snapshot = seed.export_snapshot().unwrap();
        let alice = peer(1, Some(&snapshot));
        let bob = peer(2, Some(&snapshot));

        // Right-to-left selection on Bob's side.
        bob.buffer.set_selections(vec![Selection::new(13, 6)]);
        alice.awareness.apply_update(&bob.awareness.encode_local());

        let decorations = alice.mirror.decorations();
        assert_eq!(decorations.len(), 1);
        let deco = &decorations[0];
        assert_eq!(deco.client_id, 2);
        assert_eq!(deco.range, 6..13);
        assert_eq!(deco.head, 6);
        assert!(deco.head_before());
        assert_eq!(deco.class_name, "remote-selection-2");
        assert_eq!(deco.head_class_name, "remote-selection-head-2");
        assert_eq!(deco.name.as_deref(), Some(UserInfo::for_client(2).name.as_str()));
    }

    #[test]
    fn test_unresolvable_selection_is_skipped_and_replaced() {
        let alice = peer(1, None);
        let stranger = peer(3, None);
        stranger
            .doc
            .transact("own", |t| t.insert(0, "text alice never saw"))
            .unwrap();
        stranger.buffer.set_value(&stranger.doc.text());
        stranger.buffer.set_selections(vec![Selection::new(0, 4)]);

        alice.awareness.apply_update(&stranger.awareness.encode_local());
        assert!(alice.mirror.decorations().is_empty());
    }

    #[test]
    fn test_one_decoration_per_client_and_destroy_clears() {
        let seed = ReplicatedDoc::with_peer_id(9).unwrap();
        seed.transact("seed", |t| t.insert(0, "0123456789")).unwrap();
        let snapshot = seed.export_snapshot().unwrap();
        let alice = peer(1, Some(&snapshot));
        let bob = peer(2, Some(&snapshot));

        let renders = Rc::new(Cell::new(0));
        let r = renders.clone();
        alice.mirror.on_decorations_changed(move |_| r.set(r.get() + 1));

        bob.buffer.set_selections(vec![Selection::new(1, 2)]);
        alice.awareness.apply_update(&bob.awareness.encode_local());
        bob.buffer.set_selections(vec![Selection::new(4, 8)]);
        alice.awareness.apply_update(&bob.awareness.encode_local());

        let decorations = alice.mirror.decorations();
        assert_eq!(decorations.len(), 1);
        assert_eq!(decorations[0].range, 4..8);
        assert_eq!(renders.get(), 2);

        alice.mirror.destroy();
        alice.mirror.destroy();
        assert!(alice.mirror.decorations().is_empty());
        assert_eq!(renders.get(), 3);
    }

    #[test]
    fn test_peer_leaving_removes_decoration() {
        let seed = ReplicatedDoc::with_peer_id(9).unwrap();
        seed.transact("seed", |t| t.insert(0, "abcdef")).unwrap();
        let snapshot = seed.export_snapshot().unwrap();
        let alice = peer(1, Some(&snapshot));
        let bob = peer(2, Some(&snapshot));

        bob.buffer.set_selections(vec![Selection::collapsed(3)]);
        alice.awareness.apply_update(&bob.awareness.encode_local());
        assert_eq!(alice.mirror.decorations().len(), 1);

        bob.awareness.set_local_state(None);
        alice.awareness.apply_update(&bob.awareness.encode_local());
        assert!(alice.mirror.decorations().is_empty());
    }
}
