//! In-flight ownership requests.
//!
//! [`NetworkManager::request_object_ownership`] returns an [`OwnershipTicket`]
//! straight away. The ticket resolves on a later tick: `true` when the owner
//! accepted, `false` on denial or timeout. The tick thread never blocks on it.
//!
//! [`NetworkManager::request_object_ownership`]: crate::NetworkManager::request_object_ownership

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use foundry_net::{NetworkId, PlayerId};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Outcome of an ownership request, awaitable or pollable from the tick loop.
#[derive(Debug)]
pub struct OwnershipTicket {
    state: TicketState,
}

#[derive(Debug)]
enum TicketState {
    Ready(bool),
    Waiting(oneshot::Receiver<bool>),
}

impl OwnershipTicket {
    /// A ticket that is already decided, used when no message needs sending.
    pub(crate) fn resolved(accepted: bool) -> Self {
        Self {
            state: TicketState::Ready(accepted),
        }
    }

    pub(crate) fn pending() -> (Self, oneshot::Sender<bool>) {
        let (tx, rx) = oneshot::channel();
        let ticket = Self {
            state: TicketState::Waiting(rx),
        };
        (ticket, tx)
    }

    /// The outcome if known, without waiting.
    pub fn try_result(&mut self) -> Option<bool> {
        match &mut self.state {
            TicketState::Ready(accepted) => Some(*accepted),
            TicketState::Waiting(rx) => {
                let accepted = match rx.try_recv() {
                    Ok(accepted) => accepted,
                    Err(TryRecvError::Empty) => return None,
                    // Manager dropped with the request in flight.
                    Err(TryRecvError::Closed) => false,
                };
                self.state = TicketState::Ready(accepted);
                Some(accepted)
            }
        }
    }
}

impl Future for OwnershipTicket {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let this = self.get_mut();
        match &mut this.state {
            TicketState::Ready(accepted) => Poll::Ready(*accepted),
            TicketState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(result) => {
                    let accepted = result.unwrap_or(false);
                    this.state = TicketState::Ready(accepted);
                    Poll::Ready(accepted)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Bookkeeping for a request this peer sent and is waiting on.
#[derive(Debug)]
pub(crate) struct PendingOwnership {
    pub(crate) entity: NetworkId,
    /// Peer the request was sent to.
    pub(crate) target: PlayerId,
    pub(crate) deadline: Instant,
    reply: oneshot::Sender<bool>,
}

impl PendingOwnership {
    pub(crate) fn new(
        entity: NetworkId,
        target: PlayerId,
        deadline: Instant,
        reply: oneshot::Sender<bool>,
    ) -> Self {
        Self {
            entity,
            target,
            deadline,
            reply,
        }
    }

    pub(crate) fn resolve(self, accepted: bool) {
        // The caller may have dropped the ticket.
        let _ = self.reply.send(accepted);
    }
}
