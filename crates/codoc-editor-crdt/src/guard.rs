//! Reentrancy guard shared by both directions of the text binding.

use std::cell::Cell;
use std::rc::Rc;

/// Binary busy flag. While a closure runs under the guard, nested calls
/// are dropped (`run`) or diverted to a fallback (`run_or`).
#[derive(Clone, Default)]
pub struct BusyGuard {
    busy: Rc<Cell<bool>>,
}

impl BusyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    /// Run `f` unless the guard is already held. Returns `None` when the
    /// call was dropped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.busy.replace(true) {
            return None;
        }
        let _release = Release(&self.busy);
        Some(f())
    }

    /// Run `f`, or `g` if the guard is already held.
    pub fn run_or<R>(&self, f: impl FnOnce() -> R, g: impl FnOnce() -> R) -> R {
        if self.busy.replace(true) {
            return g();
        }
        let _release = Release(&self.busy);
        f()
    }
}

impl std::fmt::Debug for BusyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyGuard").field("busy", &self.busy.get()).finish()
    }
}

/// Clears the busy flag on drop, including during unwinding.
struct Release<'a>(&'a Cell<bool>);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
