//! Listener lists shared by properties, events, and ownership notifications.

use std::panic::{AssertUnwindSafe, catch_unwind};

/// Whether a notification originated on this peer or arrived from the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// Raised by local code on this peer.
    Local,
    /// Applied from an inbound network message.
    Remote,
}

/// Handle returned by `add_listener`, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Box<dyn FnMut(EventSource, &T)>;

pub(crate) struct Listeners<T> {
    entries: Vec<(ListenerId, Callback<T>)>,
    next_id: u64,
}

impl<T> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn add(&mut self, callback: impl FnMut(EventSource, &T) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(callback)));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Call every listener. A panicking listener is logged and skipped so the
    /// remaining listeners, and later items, still run.
    pub(crate) fn notify(&mut self, source: EventSource, value: &T) {
        for (id, callback) in &mut self.entries {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(source, value)));
            if outcome.is_err() {
                tracing::warn!("Listener {id:?} panicked during {source:?} notification");
            }
        }
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}
