//! The send side of the transport boundary.
//!
//! The replication core never touches sockets. It hands each per-entity
//! payload to a [`Transport`] together with a [`Destination`]; the transport
//! owns delivery, ordering per sender, and fan-out to peers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ids::{NetworkId, PlayerId};

/// Where an outbound payload should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// A single peer.
    Peer(PlayerId),
    /// Every connected peer except the sender.
    Broadcast,
}

/// Errors surfaced by transports and the inbound queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The destination peer is not connected.
    #[error("unknown peer {0}")]
    UnknownPeer(PlayerId),

    /// The receiving side of a queue has been dropped.
    #[error("channel closed")]
    Closed,

    /// A bounded queue is at capacity; the payload was not delivered.
    #[error("queue full")]
    QueueFull,

    /// The payload could not be wrapped for the wire.
    #[error("envelope encoding failed: {0}")]
    Encode(String),
}

/// Outbound half of a transport.
///
/// Payloads are reference-counted so a broadcast can reuse one encoded buffer
/// for every peer.
pub trait Transport {
    /// Queue `payload` for `entity` towards `destination`.
    fn send(
        &mut self,
        destination: Destination,
        entity: NetworkId,
        payload: Bytes,
    ) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(
        &mut self,
        destination: Destination,
        entity: NetworkId,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        (**self).send(destination, entity, payload)
    }
}

/// A transport that records everything it is asked to send. Useful for
/// asserting on the exact outbound traffic of a single peer.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    /// Every `(destination, entity, payload)` handed to [`Transport::send`].
    pub sent: Vec<(Destination, NetworkId, Bytes)>,
}

impl RecordingTransport {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&mut self) -> Vec<(Destination, NetworkId, Bytes)> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for RecordingTransport {
    fn send(
        &mut self,
        destination: Destination,
        entity: NetworkId,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.sent.push((destination, entity, payload));
        Ok(())
    }
}
