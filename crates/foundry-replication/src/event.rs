//! Bounded event channels.
//!
//! An event is fire-and-forget: `invoke` queues the argument for the next
//! sync pass and fires local listeners at once; peers replay it through
//! `on_receive`, which fires their listeners tagged [`EventSource::Remote`]
//! and never queues it again. The queue is capped at `max_queue_length`;
//! overflow evicts the oldest entries.

use std::any::{Any, type_name};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

use crate::codec::SharedCodec;
use crate::error::CodecError;
use crate::listener::{EventSource, ListenerId, Listeners};

/// Queue bound applied when nothing else is configured.
pub const DEFAULT_MAX_QUEUE_LENGTH: usize = 5;

/// A replicated event carrying arguments of type `T`.
pub struct NetworkEvent<T> {
    queue: VecDeque<T>,
    max_queue_length: usize,
    dropped: u64,
    codec: SharedCodec<T>,
    listeners: Listeners<T>,
}

impl<T: 'static> NetworkEvent<T> {
    /// An idle channel with the given queue bound (at least 1).
    pub fn new(codec: SharedCodec<T>, max_queue_length: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max_queue_length: max_queue_length.max(1),
            dropped: 0,
            codec,
            listeners: Listeners::new(),
        }
    }

    /// Queue `value` for peers and fire local listeners.
    pub fn invoke(&mut self, value: T) {
        self.listeners.notify(EventSource::Local, &value);
        self.enqueue(value);
    }

    /// Fire local listeners only. Nothing is sent.
    pub fn invoke_local(&mut self, value: T) {
        self.listeners.notify(EventSource::Local, &value);
    }

    /// Queue `value` for peers without firing local listeners.
    pub fn invoke_remote(&mut self, value: T) {
        self.enqueue(value);
    }

    /// Dequeue and encode every pending item in FIFO order.
    ///
    /// An item that fails to encode is logged and skipped; the rest are
    /// still returned.
    pub fn drain_for_send(&mut self) -> Vec<Vec<u8>> {
        let mut encoded = Vec::with_capacity(self.queue.len());
        for value in self.queue.drain(..) {
            let mut bytes = Vec::new();
            match self.codec.encode(&value, &mut bytes) {
                Ok(()) => encoded.push(bytes),
                Err(e) => tracing::warn!("Skipping event item: {e}"),
            }
        }
        encoded
    }

    /// Decode one item sent by a peer and fire listeners as `Remote`.
    pub fn on_receive(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let value = self.codec.decode(bytes)?;
        self.listeners.notify(EventSource::Remote, &value);
        Ok(())
    }

    /// Change the queue bound (at least 1). Shrinking evicts the oldest
    /// pending items immediately.
    pub fn set_max_queue_length(&mut self, max_queue_length: usize) {
        self.max_queue_length = max_queue_length.max(1);
        self.evict_overflow();
    }

    pub fn max_queue_length(&self) -> usize {
        self.max_queue_length
    }

    /// Number of items waiting for the next sync pass.
    pub fn event_count(&self) -> usize {
        self.queue.len()
    }

    /// Items evicted by overflow since the channel was created.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Pending items, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &T> {
        self.queue.iter()
    }

    pub fn add_listener(&mut self, listener: impl FnMut(EventSource, &T) + 'static) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn enqueue(&mut self, value: T) {
        self.queue.push_back(value);
        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        let excess = self.queue.len().saturating_sub(self.max_queue_length);
        if excess == 0 {
            return;
        }
        self.queue.drain(..excess);
        self.dropped += excess as u64;
        tracing::warn!(
            "Event queue for {} exceeded {} item(s); dropped {excess} oldest ({} total)",
            type_name::<T>(),
            self.max_queue_length,
            self.dropped
        );
    }
}

impl<T> fmt::Debug for NetworkEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkEvent")
            .field("type", &type_name::<T>())
            .field("queued", &self.queue.len())
            .field("max_queue_length", &self.max_queue_length)
            .field("dropped", &self.dropped)
            .finish()
    }
}

/// Type-erased view used by entities to drive events by index.
pub(crate) trait ErasedEvent {
    fn drain_for_send(&mut self) -> Vec<Vec<u8>>;
    fn apply(&mut self, bytes: &[u8]) -> Result<(), CodecError>;
    fn event_count(&self) -> usize;
    fn value_type(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> ErasedEvent for NetworkEvent<T> {
    fn drain_for_send(&mut self) -> Vec<Vec<u8>> {
        NetworkEvent::drain_for_send(self)
    }

    fn apply(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.on_receive(bytes)
    }

    fn event_count(&self) -> usize {
        NetworkEvent::event_count(self)
    }

    fn value_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed handle to an event slot on an entity.
pub struct EventKey<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EventKey<T> {
    /// Key for the event at `index`.
    pub const fn at(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(self) -> u32 {
        self.index
    }
}

impl<T> Clone for EventKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EventKey<T> {}

impl<T> PartialEq for EventKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for EventKey<T> {}

impl<T> fmt::Debug for EventKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventKey<{}>({})", type_name::<T>(), self.index)
    }
}
