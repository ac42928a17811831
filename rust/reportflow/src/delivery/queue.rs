//! FIFO of subscription ids with a single-drainer guard.
//!
//! The guard is an [`AtomicBool`] taken with compare-and-swap. A drainer must
//! re-check the queue after releasing the guard: an id pushed between the
//! drainer's last pop and the release would otherwise wait for the next
//! trigger.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    /// Id currently being delivered.
    active: Option<String>,
}

/// Pending deliveries.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    state: Mutex<QueueState>,
    draining: AtomicBool,
}

/// Held by the single active drainer. Releases the flag on drop.
#[derive(Debug)]
pub struct DrainGuard<'a> {
    queue: &'a DeliveryQueue,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.queue.state.lock().active = None;
        self.queue.draining.store(false, Ordering::Release);
    }
}

impl DrainGuard<'_> {
    /// Take the next id, marking it active.
    pub fn take_next(&self) -> Option<String> {
        let mut state = self.queue.state.lock();
        let id = state.pending.pop_front();
        state.active.clone_from(&id);
        id
    }
}

impl DeliveryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id. Returns the queue length afterwards.
    pub fn push(&self, id: impl Into<String>) -> usize {
        let mut state = self.state.lock();
        state.pending.push_back(id.into());
        state.pending.len()
    }

    /// Drop every pending entry of `id`.
    pub fn remove(&self, id: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|pending| pending != id);
        before - state.pending.len()
    }

    /// Whether `id` is waiting or being delivered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        let state = self.state.lock();
        state.active.as_deref() == Some(id) || state.pending.iter().any(|p| p == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Become the drainer, unless one is already running.
    pub fn try_drain(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(DrainGuard { queue: self })
    }
}
