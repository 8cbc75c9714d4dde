//! Thread-safe hand-off from network I/O to the tick thread.
//!
//! Transport reader tasks push [`InboundMessage`]s through a bounded
//! [`tokio::sync::mpsc`] channel; the simulation thread drains it once per
//! tick with [`InboundReceiver::drain`]. Order is preserved per sender.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use crate::ids::{NetworkId, PlayerId};
use crate::transport::TransportError;

/// A payload received from a peer, addressed to one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// The peer that sent the payload.
    pub from: PlayerId,
    /// The entity the payload targets.
    pub entity: NetworkId,
    /// Encoded entity records.
    pub payload: Bytes,
}

/// Producer side, cloneable and usable from any thread.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<InboundMessage>,
}

/// Consumer side, owned by the tick thread.
#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::Receiver<InboundMessage>,
}

/// Create a bounded inbound queue.
pub fn inbound_channel(capacity: usize) -> (InboundSender, InboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (InboundSender { tx }, InboundReceiver { rx })
}

impl InboundSender {
    /// Push without waiting. Fails with [`TransportError::QueueFull`] when the
    /// tick thread has fallen behind.
    pub fn try_push(&self, message: InboundMessage) -> Result<(), TransportError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Push, waiting for capacity. Used by async reader tasks.
    pub async fn push(&self, message: InboundMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Returns `true` once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl InboundReceiver {
    /// Drain everything currently queued, in arrival order.
    pub fn drain(&mut self) -> Vec<InboundMessage> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(message) => out.push(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::debug!("Inbound queue has no remaining senders");
                    break;
                }
            }
        }
        out
    }

    /// Wait for the next message. Returns `None` when every sender is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: u64, entity: u64, payload: &'static [u8]) -> InboundMessage {
        InboundMessage {
            from: PlayerId(from),
            entity: NetworkId(entity),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_drain_preserves_order() {
        let (tx, mut rx) = inbound_channel(8);
        tx.try_push(message(1, 5, b"a")).unwrap();
        tx.try_push(message(1, 5, b"b")).unwrap();
        tx.try_push(message(2, 6, b"c")).unwrap();

        let drained = rx.drain();
        let payloads: Vec<&[u8]> = drained.iter().map(|m| m.payload.as_ref()).collect();
        assert_eq!(payloads, vec![b"a".as_ref(), b"b", b"c"]);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_full_queue_reports_backpressure() {
        let (tx, _rx) = inbound_channel(1);
        tx.try_push(message(1, 1, b"x")).unwrap();
        assert_eq!(
            tx.try_push(message(1, 1, b"y")),
            Err(TransportError::QueueFull)
        );
    }

    #[test]
    fn test_closed_queue_reported() {
        let (tx, rx) = inbound_channel(4);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.try_push(message(1, 1, b"x")), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_push_from_network_thread() {
        let (tx, mut rx) = inbound_channel(4);
        let handle = std::thread::spawn(move || {
            tx.try_push(message(3, 7, b"from-io")).unwrap();
        });
        handle.join().unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.from, PlayerId(3));
        assert_eq!(received.entity, NetworkId(7));
    }
}
