//! Room membership and fan-out.
//!
//! A room is the set of connections open on one document id. Frames are
//! opaque: whatever one member sends is queued for every other member.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Connection id, unique for the lifetime of the process.
pub type PeerId = u64;

/// A frame as received, forwarded without inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Bytes),
    Text(String),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Binary(b) => b.len(),
            Frame::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct Rooms {
    rooms: DashMap<String, HashMap<PeerId, mpsc::UnboundedSender<Frame>>>,
    next_peer: AtomicU64,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to `doc_id`'s room. Frames from other members arrive
    /// on the returned receiver.
    pub fn join(&self, doc_id: &str) -> (PeerId, mpsc::UnboundedReceiver<Frame>) {
        let peer = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let members = {
            let mut room = self.rooms.entry(doc_id.to_string()).or_default();
            room.insert(peer, tx);
            room.len()
        };
        info!(doc_id, peer, members, "relay: joined room");
        (peer, rx)
    }

    /// Queue `frame` for every member of the room except `from`. Members
    /// whose queue is gone are dropped from the room. Returns how many
    /// members the frame was queued for.
    pub fn broadcast(&self, doc_id: &str, from: PeerId, frame: Frame) -> usize {
        let Some(mut room) = self.rooms.get_mut(doc_id) else {
            return 0;
        };
        let mut delivered = 0;
        let mut stale = Vec::new();
        for (&peer, tx) in room.iter() {
            if peer == from {
                continue;
            }
            if tx.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                stale.push(peer);
            }
        }
        for peer in stale {
            room.remove(&peer);
            debug!(doc_id, peer, "relay: pruned stale peer");
        }
        delivered
    }

    /// Remove a connection; the room goes away with its last member.
    pub fn leave(&self, doc_id: &str, peer: PeerId) {
        let remaining = match self.rooms.get_mut(doc_id) {
            Some(mut room) => {
                room.remove(&peer);
                room.len()
            }
            None => 0,
        };
        self.rooms.remove_if(doc_id, |_, room| room.is_empty());
        info!(doc_id, peer, remaining, "relay: left room");
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.rooms.iter().map(|room| room.len()).sum()
    }

    pub fn members(&self, doc_id: &str) -> usize {
        self.rooms.get(doc_id).map(|room| room.len()).unwrap_or(0)
    }
}
