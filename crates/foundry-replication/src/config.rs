//! Core-side view of the network configuration.

use std::time::Duration;

use foundry_config::NetworkConfig;
use foundry_net::PlayerId;

/// Messages held per unknown entity id before the oldest is discarded.
pub const MAX_BUFFERED_PER_ENTITY: usize = 64;

/// Settings consumed by [`NetworkManager`](crate::NetworkManager).
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationConfig {
    pub tick_rate_hz: u32,
    /// Default queue bound for new event channels.
    pub max_event_queue_length: usize,
    pub ownership_timeout: Duration,
    /// Ticks a message for an unknown entity is held before it is dropped.
    pub unknown_entity_retry_ticks: u32,
    pub max_buffered_per_entity: usize,
    /// Pins the graph authority; the host should open the session. `None`
    /// elects the longest-connected member.
    pub host_player_id: Option<PlayerId>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for ReplicationConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            tick_rate_hz: config.tick_rate_hz,
            max_event_queue_length: config.max_event_queue_length as usize,
            ownership_timeout: Duration::from_millis(config.ownership_timeout_ms),
            unknown_entity_retry_ticks: config.unknown_entity_retry_ticks,
            max_buffered_per_entity: MAX_BUFFERED_PER_ENTITY,
            host_player_id: config.host_player_id.map(PlayerId),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_network_config() {
        let config = ReplicationConfig::default();
        assert_eq!(config.tick_rate_hz, 20);
        assert_eq!(config.max_event_queue_length, 5);
        assert_eq!(config.ownership_timeout, Duration::from_secs(2));
        assert_eq!(config.unknown_entity_retry_ticks, 10);
        assert_eq!(config.host_player_id, None);
    }

    #[test]
    fn test_host_is_projected() {
        let network = NetworkConfig {
            host_player_id: Some(4),
            ownership_timeout_ms: 250,
            ..NetworkConfig::default()
        };
        let config = ReplicationConfig::from(&network);
        assert_eq!(config.host_player_id, Some(PlayerId(4)));
        assert_eq!(config.ownership_timeout, Duration::from_millis(250));
    }
}
