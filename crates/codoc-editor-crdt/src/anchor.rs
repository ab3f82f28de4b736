//! Positions that survive concurrent edits.

use loro::ContainerTrait;
use loro::cursor::{Cursor, Side};

use crate::doc::ReplicatedDoc;
use crate::error::CrdtError;

/// Weak reference to a position in the replicated text.
///
/// The anchor is attached to the character at the index it was created
/// from, so inserts and deletes elsewhere move it along with that character.
#[derive(Debug, Clone)]
pub struct StableAnchor {
    cursor: Cursor,
}

impl StableAnchor {
    /// Anchor at char `index`, clamped to the text length.
    pub fn at(doc: &ReplicatedDoc, index: usize) -> Option<Self> {
        let index = index.min(doc.len_chars());
        doc.loro_text()
            .get_cursor(index, Side::Middle)
            .map(|cursor| Self { cursor })
    }

    /// Current char index, or `None` if the anchor cannot be resolved in
    /// `doc` (unknown history, or a different text container).
    pub fn resolve(&self, doc: &ReplicatedDoc) -> Option<usize> {
        if self.cursor.container != doc.loro_text().id() {
            return None;
        }
        let result = doc.loro_doc().get_cursor_pos(&self.cursor).ok()?;
        Some(result.current.pos.min(doc.len_chars()))
    }

    pub fn encode(&self) -> Vec<u8> {
        self.cursor.encode()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CrdtError> {
        Cursor::decode(bytes)
            .map(|cursor| Self { cursor })
            .map_err(|_| CrdtError::Decode { what: "anchor" })
    }
}

/// A selection captured as two anchors, direction preserved.
#[derive(Debug, Clone)]
pub struct AnchoredSelection {
    pub anchor: StableAnchor,
    pub head: StableAnchor,
}

impl AnchoredSelection {
    pub fn capture(doc: &ReplicatedDoc, anchor: usize, head: usize) -> Option<Self> {
        Some(Self {
            anchor: StableAnchor::at(doc, anchor)?,
            head: StableAnchor::at(doc, head)?,
        })
    }

    /// Resolve both ends; fails if either end fails.
    pub fn resolve(&self, doc: &ReplicatedDoc) -> Option<(usize, usize)> {
        Some((self.anchor.resolve(doc)?, self.head.resolve(doc)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(peer: u64, text: &str) -> ReplicatedDoc {
        let doc = ReplicatedDoc::with_peer_id(peer).unwrap();
        doc.transact("seed", |t| t.insert(0, text)).unwrap();
        doc
    }

    #[test]
    fn test_anchor_follows_remote_insert() {
        let local = doc_with(1, "01234567890123456789");
        let remote = ReplicatedDoc::with_peer_id(2).unwrap();
        remote.import(&local.export_snapshot().unwrap()).unwrap();

        let sel = AnchoredSelection::capture(&local, 5, 10).unwrap();

        let before = local.version();
        remote.transact("edit", |t| t.insert(0, "abc")).unwrap();
        local
            .import(&remote.export_updates_since(&before).unwrap())
            .unwrap();

        assert_eq!(sel.resolve(&local), Some((8, 13)));
    }

    #[test]
    fn test_anchor_encodes_for_other_replicas() {
        let a = doc_with(1, "hello world");
        let b = ReplicatedDoc::with_peer_id(2).unwrap();
        b.import(&a.export_snapshot().unwrap()).unwrap();

        let anchor = StableAnchor::at(&a, 6).unwrap();
        let decoded = StableAnchor::decode(&anchor.encode()).unwrap();
        assert_eq!(decoded.resolve(&b), Some(6));
    }

    #[test]
    fn test_unknown_history_does_not_resolve() {
        let a = doc_with(1, "hello");
        let stranger = ReplicatedDoc::with_peer_id(3).unwrap();
        let anchor = StableAnchor::at(&a, 2).unwrap();
        assert_eq!(anchor.resolve(&stranger), None);
        assert!(StableAnchor::decode(&[]).is_err());
    }
}
