//! Ephemeral per-client presence state.
//!
//! Every client owns one entry, identified by its replica id and versioned
//! by a clock that only that client increments. Entries travel in
//! [`AwarenessUpdate`]s; a receiver keeps whichever entry has the higher
//! clock. A `None` state is a tombstone: the peer left. Peers that stop
//! refreshing are dropped by [`Awareness::remove_outdated`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::listeners::{ListenerId, Listeners};

/// Peers not heard from for this long are considered gone.
pub const OUTDATED_TIMEOUT: Duration = Duration::from_secs(30);

/// Collaborator colours (pastel-ish for readability on both themes).
const COLLABORATOR_COLORS: [&str; 8] = [
    "#FF6B6B", // Red
    "#4ECDC4", // Teal
    "#FFE66D", // Yellow
    "#95E1D3", // Mint
    "#F38181", // Coral
    "#AA96DA", // Purple
    "#FCBF49", // Orange
    "#2EC4B6", // Cyan
];

const NAME_ADJECTIVES: [&str; 8] = [
    "Quiet", "Brisk", "Amber", "Clever", "Gentle", "Lucky", "Sunny", "Swift",
];

const NAME_ANIMALS: [&str; 8] = [
    "Heron", "Otter", "Lynx", "Badger", "Wren", "Marten", "Ibis", "Fox",
];

/// Display metadata for a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    /// CSS colour, `#RRGGBB`
    pub color: String,
}

impl UserInfo {
    /// Deterministic identity derived from a client id.
    pub fn for_client(client_id: u64) -> Self {
        let idx = client_id as usize;
        Self {
            name: format!(
                "{} {}",
                NAME_ADJECTIVES[idx % NAME_ADJECTIVES.len()],
                NAME_ANIMALS[(idx / NAME_ADJECTIVES.len()) % NAME_ANIMALS.len()]
            ),
            color: COLLABORATOR_COLORS[idx % COLLABORATOR_COLORS.len()].to_string(),
        }
    }

    /// Random identity for an anonymous collaborator.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let adjective = NAME_ADJECTIVES.choose(&mut rng).copied().unwrap_or("Anonymous");
        let animal = NAME_ANIMALS.choose(&mut rng).copied().unwrap_or("Writer");
        let color = COLLABORATOR_COLORS.choose(&mut rng).copied().unwrap_or("#FF6B6B");
        Self {
            name: format!("{adjective} {animal}"),
            color: color.to_string(),
        }
    }
}

/// A selection as a pair of encoded stable anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSelection {
    pub anchor: Vec<u8>,
    pub head: Vec<u8>,
}

/// What one client publishes about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessState {
    pub user: Option<UserInfo>,
    pub selection: Option<EncodedSelection>,
}

/// One client's entry on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessEntry {
    pub client_id: u64,
    pub clock: u64,
    /// `None` marks the client as gone.
    pub state: Option<AwarenessState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub entries: Vec<AwarenessEntry>,
}

impl AwarenessUpdate {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
    /// Entry dropped by the timeout sweep.
    Timeout,
}

/// Client ids touched by one awareness operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwarenessChange {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
    pub origin: ChangeOrigin,
}

impl AwarenessChange {
    fn new(origin: ChangeOrigin) -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            origin,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Every client id mentioned, in added/updated/removed order.
    pub fn changed(&self) -> impl Iterator<Item = u64> + '_ {
        self.added
            .iter()
            .chain(&self.updated)
            .chain(&self.removed)
            .copied()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    clock: u64,
    state: Option<AwarenessState>,
    last_updated: Instant,
}

struct AwarenessInner {
    client_id: u64,
    entries: RefCell<HashMap<u64, Entry>>,
    listeners: Listeners<AwarenessChange>,
}

/// Shared handle to the awareness table for one document.
#[derive(Clone)]
pub struct Awareness {
    inner: Rc<AwarenessInner>,
}

impl Awareness {
    /// Create a table for `client_id` with an empty (but present) local state.
    pub fn new(client_id: u64) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            client_id,
            Entry {
                clock: 0,
                state: Some(AwarenessState::default()),
                last_updated: Instant::now(),
            },
        );
        Self {
            inner: Rc::new(AwarenessInner {
                client_id,
                entries: RefCell::new(entries),
                listeners: Listeners::new(),
            }),
        }
    }

    pub fn client_id(&self) -> u64 {
        self.inner.client_id
    }

    pub fn local_state(&self) -> Option<AwarenessState> {
        self.state(self.inner.client_id)
    }

    pub fn state(&self, client_id: u64) -> Option<AwarenessState> {
        self.inner
            .entries
            .borrow()
            .get(&client_id)
            .and_then(|e| e.state.clone())
    }

    /// Live states of every other client, ordered by client id.
    pub fn remote_states(&self) -> Vec<(u64, AwarenessState)> {
        let entries = self.inner.entries.borrow();
        let mut states: Vec<_> = entries
            .iter()
            .filter(|(id, _)| **id != self.inner.client_id)
            .filter_map(|(id, e)| e.state.clone().map(|s| (*id, s)))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        states
    }

    /// Replace the local state, bumping the local clock. `None` announces
    /// that this client is leaving.
    pub fn set_local_state(&self, state: Option<AwarenessState>) {
        let change = {
            let mut entries = self.inner.entries.borrow_mut();
            let id = self.inner.client_id;
            let mut change = AwarenessChange::new(ChangeOrigin::Local);
            let previous = entries.get(&id).cloned();
            let clock = previous.as_ref().map_or(0, |e| e.clock + 1);
            let had_state = previous.as_ref().is_some_and(|e| e.state.is_some());

            match (&state, had_state) {
                (Some(_), false) => change.added.push(id),
                (Some(_), true) => change.updated.push(id),
                (None, true) => change.removed.push(id),
                (None, false) => {}
            }

            entries.insert(
                id,
                Entry {
                    clock,
                    state,
                    last_updated: Instant::now(),
                },
            );
            change
        };
        self.emit(change);
    }

    /// Update the local selection, keeping the rest of the local state.
    pub fn set_local_selection(&self, selection: Option<EncodedSelection>) {
        let mut state = self.local_state().unwrap_or_default();
        if state.selection == selection {
            return;
        }
        state.selection = selection;
        self.set_local_state(Some(state));
    }

    pub fn set_local_user(&self, user: UserInfo) {
        let mut state = self.local_state().unwrap_or_default();
        state.user = Some(user);
        self.set_local_state(Some(state));
    }

    /// Encode the entries for `clients`; unknown ids are skipped.
    pub fn encode_update(&self, clients: &[u64]) -> AwarenessUpdate {
        let entries = self.inner.entries.borrow();
        AwarenessUpdate {
            entries: clients
                .iter()
                .filter_map(|id| {
                    entries.get(id).map(|e| AwarenessEntry {
                        client_id: *id,
                        clock: e.clock,
                        state: e.state.clone(),
                    })
                })
                .collect(),
        }
    }

    pub fn encode_local(&self) -> AwarenessUpdate {
        self.encode_update(&[self.inner.client_id])
    }

    /// Merge a remote update. Entries with an older clock are ignored; an
    /// equal clock only wins when it removes a live entry.
    pub fn apply_update(&self, update: &AwarenessUpdate) -> AwarenessChange {
        self.apply_update_at(update, Instant::now())
    }

    pub fn apply_update_at(&self, update: &AwarenessUpdate, now: Instant) -> AwarenessChange {
        let mut renew_local = false;
        let change = {
            let mut entries = self.inner.entries.borrow_mut();
            let mut change = AwarenessChange::new(ChangeOrigin::Remote);

            for incoming in &update.entries {
                let id = incoming.client_id;
                let current = entries.get(&id);
                let current_clock = current.map(|e| e.clock);
                let current_live = current.is_some_and(|e| e.state.is_some());

                let newer = current_clock.is_none_or(|c| incoming.clock > c);
                let removes_at_same_clock = current_clock == Some(incoming.clock)
                    && incoming.state.is_none()
                    && current_live;
                if !newer && !removes_at_same_clock {
                    continue;
                }

                if id == self.inner.client_id {
                    // Someone announced us as gone while we are still here:
                    // outbid the tombstone instead of accepting it.
                    if incoming.state.is_none() && current_live {
                        if let Some(entry) = entries.get_mut(&id) {
                            entry.clock = incoming.clock + 1;
                            entry.last_updated = now;
                        }
                        renew_local = true;
                    }
                    continue;
                }

                match (&incoming.state, current_live) {
                    (Some(_), false) => change.added.push(id),
                    (Some(state), true) => {
                        let unchanged = current
                            .and_then(|e| e.state.as_ref())
                            .is_some_and(|s| s == state);
                        if !unchanged {
                            change.updated.push(id);
                        }
                    }
                    (None, true) => change.removed.push(id),
                    (None, false) => {}
                }

                entries.insert(
                    id,
                    Entry {
                        clock: incoming.clock,
                        state: incoming.state.clone(),
                        last_updated: now,
                    },
                );
            }
            change
        };

        if renew_local {
            tracing::debug!(client = self.inner.client_id, "awareness: outbid remote tombstone");
            self.emit(AwarenessChange {
                updated: vec![self.inner.client_id],
                ..AwarenessChange::new(ChangeOrigin::Local)
            });
        }
        self.emit(change.clone());
        change
    }

    /// Mark `clients` as gone locally, e.g. when the transport reports a
    /// disconnect. The local client cannot be removed this way.
    pub fn remove_states(&self, clients: &[u64]) -> AwarenessChange {
        let change = {
            let mut entries = self.inner.entries.borrow_mut();
            let mut change = AwarenessChange::new(ChangeOrigin::Remote);
            for id in clients {
                if *id == self.inner.client_id {
                    continue;
                }
                if let Some(entry) = entries.get_mut(id) {
                    if entry.state.take().is_some() {
                        entry.last_updated = Instant::now();
                        change.removed.push(*id);
                    }
                }
            }
            change
        };
        self.emit(change.clone());
        change
    }

    /// Drop remote peers whose entry has not been refreshed within
    /// `timeout`. Returns the removed ids.
    ///
    /// A removed peer leaves a tombstone (its last clock) so late copies of
    /// older updates are still rejected; tombstones are forgotten once they
    /// are themselves older than `timeout`.
    pub fn remove_outdated(&self, now: Instant, timeout: Duration) -> Vec<u64> {
        let change = {
            let mut entries = self.inner.entries.borrow_mut();
            let mut change = AwarenessChange::new(ChangeOrigin::Timeout);
            let local = self.inner.client_id;
            entries.retain(|id, entry| {
                *id == local
                    || entry.state.is_some()
                    || now.duration_since(entry.last_updated) < timeout
            });
            for (id, entry) in entries.iter_mut() {
                if *id == local || entry.state.is_none() {
                    continue;
                }
                if now.duration_since(entry.last_updated) >= timeout {
                    entry.state = None;
                    entry.last_updated = now;
                    change.removed.push(*id);
                }
            }
            change.removed.sort_unstable();
            change
        };
        if !change.removed.is_empty() {
            tracing::debug!(removed = ?change.removed, "awareness: dropped outdated peers");
        }
        let removed = change.removed.clone();
        self.emit(change);
        removed
    }

    /// Refresh the local entry if it is older than half of `timeout`, so
    /// peers do not time us out. Returns the update to broadcast, if any.
    pub fn renew(&self, now: Instant, timeout: Duration) -> Option<AwarenessUpdate> {
        {
            let mut entries = self.inner.entries.borrow_mut();
            let entry = entries.get_mut(&self.inner.client_id)?;
            entry.state.as_ref()?;
            if now.duration_since(entry.last_updated) < timeout / 2 {
                return None;
            }
            entry.clock += 1;
            entry.last_updated = now;
        }
        Some(self.encode_local())
    }

    pub fn on_change(&self, listener: impl Fn(&AwarenessChange) + 'static) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners.remove(id);
    }

    fn emit(&self, change: AwarenessChange) {
        if !change.is_empty() {
            self.inner.listeners.emit(&change);
        }
    }
}

impl std::fmt::Debug for Awareness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Awareness")
            .field("client_id", &self.inner.client_id)
            .field("entries", &self.inner.entries.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn state(name: &str) -> AwarenessState {
        AwarenessState {
            user: Some(UserInfo {
                name: name.into(),
                color: "#000000".into(),
            }),
            selection: None,
        }
    }

    #[test]
    fn test_remote_update_added_then_updated() {
        let a = Awareness::new(1);
        let b = Awareness::new(2);
        b.set_local_state(Some(state("bob")));

        let change = a.apply_update(&b.encode_local());
        assert_eq!(change.added, vec![2]);
        assert_eq!(a.remote_states().len(), 1);

        b.set_local_state(Some(state("bobby")));
        let change = a.apply_update(&b.encode_local());
        assert_eq!(change.updated, vec![2]);
        assert_eq!(
            a.state(2).and_then(|s| s.user).map(|u| u.name),
            Some("bobby".to_string())
        );
    }

    #[test]
    fn test_stale_clock_is_ignored() {
        let a = Awareness::new(1);
        let b = Awareness::new(2);
        b.set_local_state(Some(state("v1")));
        let old = b.encode_local();
        b.set_local_state(Some(state("v2")));

        a.apply_update(&b.encode_local());
        let change = a.apply_update(&old);
        assert!(change.is_empty());
        assert_eq!(a.state(2).and_then(|s| s.user).map(|u| u.name).as_deref(), Some("v2"));
    }

    #[test]
    fn test_tombstone_removes_peer() {
        let a = Awareness::new(1);
        let b = Awareness::new(2);
        b.set_local_state(Some(state("bob")));
        a.apply_update(&b.encode_local());

        b.set_local_state(None);
        let change = a.apply_update(&b.encode_local());
        assert_eq!(change.removed, vec![2]);
        assert!(a.remote_states().is_empty());
    }

    #[test]
    fn test_remove_outdated() {
        let a = Awareness::new(1);
        let b = Awareness::new(2);
        b.set_local_state(Some(state("bob")));
        let t0 = Instant::now();
        a.apply_update_at(&b.encode_local(), t0);

        assert!(a.remove_outdated(t0 + Duration::from_secs(5), OUTDATED_TIMEOUT).is_empty());
        assert_eq!(
            a.remove_outdated(t0 + OUTDATED_TIMEOUT, OUTDATED_TIMEOUT),
            vec![2]
        );
        assert!(a.local_state().is_some());
    }

    #[test]
    fn test_departed_peers_are_forgotten() {
        let a = Awareness::new(1);
        let b = Awareness::new(2);
        let c = Awareness::new(3);
        b.set_local_state(Some(state("bob")));
        c.set_local_state(Some(state("carol")));
        let t0 = Instant::now();
        a.apply_update_at(&b.encode_local(), t0);
        a.apply_update_at(&c.encode_local(), t0);
        let stale = b.encode_local();

        // Bob leaves explicitly; carol goes silent.
        b.set_local_state(None);
        a.apply_update_at(&b.encode_local(), t0);
        let tracked = |aw: &Awareness| aw.inner.entries.borrow().len();
        assert_eq!(tracked(&a), 3);

        // Within the window the tombstone still rejects old updates.
        let half = t0 + OUTDATED_TIMEOUT / 2;
        a.apply_update_at(&stale, half);
        assert!(a.state(2).is_none());

        let t1 = t0 + OUTDATED_TIMEOUT;
        assert_eq!(a.remove_outdated(t1, OUTDATED_TIMEOUT), vec![3]);
        assert_eq!(tracked(&a), 2);

        assert!(a.remove_outdated(t1 + OUTDATED_TIMEOUT, OUTDATED_TIMEOUT).is_empty());
        assert_eq!(tracked(&a), 1);
        assert!(a.local_state().is_some());
    }

    #[test]
    fn test_local_client_outbids_tombstone() {
        let a = Awareness::new(1);
        a.set_local_state(Some(state("alice")));
        let clock = a.encode_local().entries[0].clock;

        a.apply_update(&AwarenessUpdate {
            entries: vec![AwarenessEntry {
                client_id: 1,
                clock: clock + 1,
                state: None,
            }],
        });
        assert!(a.local_state().is_some());
        assert_eq!(a.encode_local().entries[0].clock, clock + 2);
    }

    #[test]
    fn test_listeners_and_renew() {
        let a = Awareness::new(1);
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let id = a.on_change(move |_| c.set(c.get() + 1));

        a.set_local_selection(Some(EncodedSelection {
            anchor: vec![1],
            head: vec![2],
        }));
        // Same selection again is not a change.
        a.set_local_selection(Some(EncodedSelection {
            anchor: vec![1],
            head: vec![2],
        }));
        a.remove_listener(id);
        a.set_local_user(UserInfo::for_client(3));
        assert_eq!(calls.get(), 1);

        let now = Instant::now();
        assert!(a.renew(now, OUTDATED_TIMEOUT).is_none());
        assert!(a.renew(now + OUTDATED_TIMEOUT, OUTDATED_TIMEOUT).is_some());
    }

    #[test]
    fn test_user_info_palette() {
        let first = UserInfo::for_client(0);
        assert_eq!(first.name, "Quiet Heron");
        assert_eq!(first.color, "#FF6B6B");
        assert_eq!(UserInfo::for_client(9).color, "#4ECDC4");
        assert!(UserInfo::random().color.starts_with('#'));
    }
}
