//! In-process transport connecting several peers through shared queues.
//!
//! Each peer that joins a [`LoopbackHub`] gets a [`LoopbackTransport`] for
//! sending and an [`InboundReceiver`] for its tick thread. Delivery is
//! immediate and per-sender FIFO, which makes the hub suitable for tests and
//! single-process sessions.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::ids::{NetworkId, PlayerId};
use crate::inbound::{InboundMessage, InboundReceiver, InboundSender, inbound_channel};
use crate::transport::{Destination, Transport, TransportError};

type PeerMap = BTreeMap<PlayerId, InboundSender>;

/// Shared routing table for in-process peers.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    peers: Arc<Mutex<PeerMap>>,
}

/// Sending half for one peer on a [`LoopbackHub`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    local: PlayerId,
    peers: Arc<Mutex<PeerMap>>,
}

impl LoopbackHub {
    /// Creates a hub with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `player`, replacing any previous registration under that id.
    pub fn join(&self, player: PlayerId, capacity: usize) -> (LoopbackTransport, InboundReceiver) {
        let (tx, rx) = inbound_channel(capacity);
        lock(&self.peers).insert(player, tx);
        tracing::debug!("{player} joined loopback hub");
        let transport = LoopbackTransport {
            local: player,
            peers: Arc::clone(&self.peers),
        };
        (transport, rx)
    }

    /// Disconnect `player`. Returns `false` if it was not connected.
    pub fn leave(&self, player: PlayerId) -> bool {
        lock(&self.peers).remove(&player).is_some()
    }

    /// Connected players in ascending id order.
    pub fn players(&self) -> Vec<PlayerId> {
        lock(&self.peers).keys().copied().collect()
    }
}

impl LoopbackTransport {
    /// The player this transport sends as.
    pub fn local_player(&self) -> PlayerId {
        self.local
    }
}

impl Transport for LoopbackTransport {
    fn send(
        &mut self,
        destination: Destination,
        entity: NetworkId,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let peers = lock(&self.peers);
        let message = |payload: Bytes| InboundMessage {
            from: self.local,
            entity,
            payload,
        };
        match destination {
            Destination::Peer(player) => peers
                .get(&player)
                .ok_or(TransportError::UnknownPeer(player))?
                .try_push(message(payload)),
            Destination::Broadcast => {
                for (player, tx) in peers.iter().filter(|(p, _)| **p != self.local) {
                    if let Err(e) = tx.try_push(message(payload.clone())) {
                        tracing::warn!("Loopback delivery to {player} failed: {e}");
                    }
                }
                Ok(())
            }
        }
    }
}

fn lock(peers: &Mutex<PeerMap>) -> MutexGuard<'_, PeerMap> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_send_reaches_only_target() {
        let hub = LoopbackHub::new();
        let (mut a, _rx_a) = hub.join(PlayerId(1), 8);
        let (_b, mut rx_b) = hub.join(PlayerId(2), 8);
        let (_c, mut rx_c) = hub.join(PlayerId(3), 8);

        a.send(
            Destination::Peer(PlayerId(2)),
            NetworkId(10),
            Bytes::from_static(b"hi"),
        )
        .unwrap();

        let got = rx_b.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].from, PlayerId(1));
        assert_eq!(got[0].entity, NetworkId(10));
        assert!(rx_c.drain().is_empty());
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let hub = LoopbackHub::new();
        let (mut a, mut rx_a) = hub.join(PlayerId(1), 8);
        let (_b, mut rx_b) = hub.join(PlayerId(2), 8);
        let (_c, mut rx_c) = hub.join(PlayerId(3), 8);

        a.send(Destination::Broadcast, NetworkId(1), Bytes::from_static(b"x"))
            .unwrap();

        assert!(rx_a.drain().is_empty());
        assert_eq!(rx_b.drain().len(), 1);
        assert_eq!(rx_c.drain().len(), 1);
    }

    #[test]
    fn test_unknown_peer_is_an_error() {
        let hub = LoopbackHub::new();
        let (mut a, _rx) = hub.join(PlayerId(1), 8);
        let err = a
            .send(Destination::Peer(PlayerId(9)), NetworkId(1), Bytes::new())
            .unwrap_err();
        assert_eq!(err, TransportError::UnknownPeer(PlayerId(9)));
    }

    #[test]
    fn test_leave_removes_peer() {
        let hub = LoopbackHub::new();
        let (_a, _rx_a) = hub.join(PlayerId(1), 8);
        let (_b, _rx_b) = hub.join(PlayerId(2), 8);
        assert_eq!(hub.players(), vec![PlayerId(1), PlayerId(2)]);
        assert!(hub.leave(PlayerId(1)));
        assert!(!hub.leave(PlayerId(1)));
        assert_eq!(hub.players(), vec![PlayerId(2)]);
    }
}
