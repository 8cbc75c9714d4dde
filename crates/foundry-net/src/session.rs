//! Session lifecycle as seen by one peer.
//!
//! Tracks the state machine Disconnected → Connecting → Connected →
//! Disconnected, the local player id handed out by the session layer, the
//! session members in the order they joined, and which peer acts as graph
//! authority.

use crate::ids::PlayerId;

/// State machine for the local peer's connection to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not part of any session.
    Disconnected,
    /// Connection initiated, waiting for a player id.
    Connecting,
    /// Player id assigned, replication is live.
    Connected,
}

/// Errors for illegal session transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The requested transition is not valid from the current state.
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        /// State the session was in.
        state: SessionState,
        /// What was attempted.
        action: &'static str,
    },
}

/// Per-process session handle.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    local_player_id: PlayerId,
    /// Every member including the local player, oldest first.
    members: Vec<PlayerId>,
    host: Option<PlayerId>,
}

impl Session {
    /// A disconnected session. `host` pins the graph authority when set and
    /// should be the peer that opens the session, since it takes over the
    /// moment it is present.
    pub fn new(host: Option<PlayerId>) -> Self {
        Self {
            state: SessionState::Disconnected,
            local_player_id: PlayerId::NONE,
            members: Vec::new(),
            host,
        }
    }

    /// Disconnected → Connecting.
    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Disconnected, SessionState::Connecting, "connect")
    }

    /// Connecting → Connected, with the id assigned by the session layer.
    ///
    /// `peers` are the members already in the session, in the order they
    /// joined. The local player is recorded as the newest member.
    pub fn on_connected(
        &mut self,
        local_player_id: PlayerId,
        peers: impl IntoIterator<Item = PlayerId>,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::Connecting, SessionState::Connected, "complete connection")?;
        self.local_player_id = local_player_id;
        self.members.clear();
        for peer in peers {
            if peer != local_player_id && !self.members.contains(&peer) {
                self.members.push(peer);
            }
        }
        self.members.push(local_player_id);
        tracing::info!(
            "Session connected as {local_player_id} with {} peer(s), authority {}",
            self.members.len() - 1,
            self.authority()
        );
        Ok(())
    }

    /// Any state → Disconnected. Clears peers and the local id.
    pub fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            tracing::info!("Session disconnected ({:?})", self.state);
        }
        self.state = SessionState::Disconnected;
        self.local_player_id = PlayerId::NONE;
        self.members.clear();
    }

    /// Record a newly connected peer as the newest member. Returns `false` if
    /// already known.
    pub fn peer_joined(&mut self, player: PlayerId) -> bool {
        if player == self.local_player_id || self.members.contains(&player) {
            return false;
        }
        self.members.push(player);
        true
    }

    /// Record a peer leaving. Returns `false` if it was not known.
    pub fn peer_left(&mut self, player: PlayerId) -> bool {
        if player == self.local_player_id {
            return false;
        }
        let before = self.members.len();
        self.members.retain(|p| *p != player);
        self.members.len() != before
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// `true` once the session layer has assigned a player id.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Local player id, [`PlayerId::NONE`] unless connected.
    pub fn local_player_id(&self) -> PlayerId {
        self.local_player_id
    }

    /// Connected remote peers, oldest first.
    pub fn peers(&self) -> impl Iterator<Item = PlayerId> + '_ {
        let local = self.local_player_id;
        self.members.iter().copied().filter(move |p| *p != local)
    }

    /// Whether `player` is the local player or a connected peer.
    pub fn is_present(&self, player: PlayerId) -> bool {
        player.is_some() && (player == self.local_player_id || self.members.contains(&player))
    }

    /// The peer resolving ownership conflicts and allocating ids: the
    /// configured host while it is present, otherwise the longest-connected
    /// member. A joiner never takes over from members already in the session,
    /// whatever its player id.
    pub fn authority(&self) -> PlayerId {
        if let Some(host) = self.host.filter(|h| self.is_present(*h)) {
            return host;
        }
        self.members.first().copied().unwrap_or(PlayerId::NONE)
    }

    /// Whether the local peer is the graph authority.
    pub fn is_authority(&self) -> bool {
        self.is_connected() && self.authority() == self.local_player_id
    }

    fn transition(
        &mut self,
        from: SessionState,
        to: SessionState,
        action: &'static str,
    ) -> Result<(), SessionError> {
        if self.state != from {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(local: u64, peers: &[u64]) -> Session {
        let mut session = Session::default();
        session.begin_connect().unwrap();
        session
            .on_connected(PlayerId(local), peers.iter().map(|p| PlayerId(*p)))
            .unwrap();
        session
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = Session::default();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.local_player_id(), PlayerId::NONE);
        assert!(!session.is_connected());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut session = Session::default();
        session.begin_connect().unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        session.on_connected(PlayerId(2), [PlayerId(1)]).unwrap();
        assert!(session.is_connected());
        assert_eq!(session.local_player_id(), PlayerId(2));

        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.peers().count(), 0);
    }

    #[test]
    fn test_connected_requires_connecting() {
        let mut session = Session::default();
        let err = session.on_connected(PlayerId(1), std::iter::empty()).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                state: SessionState::Disconnected,
                action: "complete connection",
            }
        );
    }

    #[test]
    fn test_double_connect_rejected() {
        let mut session = Session::default();
        session.begin_connect().unwrap();
        assert!(session.begin_connect().is_err());
    }

    #[test]
    fn test_authority_is_longest_connected_member() {
        let mut session = connected(3, &[5, 2]);
        assert_eq!(session.authority(), PlayerId(5));
        assert!(!session.is_authority());

        session.peer_left(PlayerId(5));
        assert_eq!(session.authority(), PlayerId(2));
        session.peer_left(PlayerId(2));
        assert_eq!(session.authority(), PlayerId(3));
        assert!(session.is_authority());
    }

    #[test]
    fn test_lower_id_joiner_does_not_take_over() {
        let mut session = connected(2, &[]);
        assert!(session.is_authority());
        assert!(session.peer_joined(PlayerId(1)));
        assert_eq!(session.authority(), PlayerId(2));
        assert_eq!(session.peers().collect::<Vec<_>>(), vec![PlayerId(1)]);

        // The joiner's own view agrees.
        let joiner = connected(1, &[2]);
        assert_eq!(joiner.authority(), PlayerId(2));
        assert!(!joiner.is_authority());
    }

    #[test]
    fn test_configured_host_wins_while_present() {
        let mut session = Session::new(Some(PlayerId(5)));
        session.begin_connect().unwrap();
        session.on_connected(PlayerId(3), [PlayerId(2), PlayerId(5)]).unwrap();
        assert_eq!(session.authority(), PlayerId(5));

        session.peer_left(PlayerId(5));
        assert_eq!(session.authority(), PlayerId(2));
    }

    #[test]
    fn test_peer_tracking_ignores_self_and_duplicates() {
        let mut session = connected(1, &[]);
        assert!(!session.peer_joined(PlayerId(1)));
        assert!(session.peer_joined(PlayerId(4)));
        assert!(!session.peer_joined(PlayerId(4)));
        assert!(session.is_present(PlayerId(4)));
        assert!(!session.peer_left(PlayerId(9)));
        assert!(!session.peer_left(PlayerId(1)));
        assert!(session.is_present(PlayerId(1)));
    }
}
