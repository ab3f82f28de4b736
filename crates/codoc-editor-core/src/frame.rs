//! Per-frame coalescing for scroll-driven work.

/// Pending-flag coalescer: any number of requests between two frames
/// collapse into one unit of work.
///
/// The host calls [`request`](Self::request) on every event and schedules a
/// frame callback only when it returns true; the frame callback calls
/// [`take`](Self::take) and does the work if it returns true.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameCoalescer {
    pending: bool,
}

impl FrameCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark work as pending. Returns true if a frame needs to be scheduled.
    pub fn request(&mut self) -> bool {
        !std::mem::replace(&mut self.pending, true)
    }

    /// Clear the pending flag, returning whether work was pending.
    pub fn take(&mut self) -> bool {
        std::mem::replace(&mut self.pending, false)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Drop any pending work without running it.
    pub fn cancel(&mut self) {
        self.pending = false;
    }
}
