//! Single-threaded observer lists.
//!
//! Everything in the editor core runs on the UI thread, so observers are
//! plain `Rc` closures. `emit` snapshots the list before calling out, which
//! lets a listener add or remove listeners (including itself) while running.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle returned by [`Listeners::add`], used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Rc<dyn Fn(&E)>;

pub struct Listeners<E> {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(0),
            entries: RefCell::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: impl Fn(&E) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    /// Returns false if the id was not registered (already removed).
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in snapshot {
            cb(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_remove() {
        let listeners = Listeners::<u32>::new();
        let total = Rc::new(Cell::new(0));
        let t = total.clone();
        let id = listeners.add(move |v| t.set(t.get() + v));

        listeners.emit(&3);
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.emit(&3);
        assert_eq!(total.get(), 3);
    }

    #[test]
    fn test_listener_may_unregister_itself() {
        let listeners = Rc::new(Listeners::<()>::new());
        let slot: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));
        let calls = Rc::new(Cell::new(0));

        let l = listeners.clone();
        let s = slot.clone();
        let c = calls.clone();
        let id = listeners.add(move |_| {
            c.set(c.get() + 1);
            if let Some(id) = s.get() {
                l.remove(id);
            }
        });
        slot.set(Some(id));

        listeners.emit(&());
        listeners.emit(&());
        assert_eq!(calls.get(), 1);
        assert!(listeners.is_empty());
    }
}
