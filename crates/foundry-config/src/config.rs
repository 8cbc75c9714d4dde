//! Persisted `config.ron` settings and their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name used inside the config directory.
pub(crate) const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration for a Foundry networking process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Replication and transport settings.
    pub network: NetworkConfig,
    /// Logging settings.
    pub debug: DebugConfig,
}

/// Replication and transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Fixed sync cadence in Hz, independent of the render rate.
    pub tick_rate_hz: u32,
    /// Default `MaxQueueLength` for new event channels.
    pub max_event_queue_length: u32,
    /// How long an ownership request may stay unanswered, in milliseconds.
    pub ownership_timeout_ms: u64,
    /// Ticks a message for an unknown entity is held before it is dropped.
    pub unknown_entity_retry_ticks: u32,
    /// Capacity of the network-thread to tick-thread inbound queue.
    pub inbound_queue_capacity: usize,
    /// Largest frame accepted by stream transports, in bytes.
    pub max_payload_size: u32,
    /// Explicit graph authority, expected to open the session. `None` elects
    /// the longest-connected member.
    pub host_player_id: Option<u64>,
}

/// Diagnostics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            max_event_queue_length: 5,
            ownership_timeout_ms: 2_000,
            unknown_entity_retry_ticks: 10,
            inbound_queue_capacity: 1_024,
            max_payload_size: 1_048_576,
            host_player_id: None,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Validation ---

impl NetworkConfig {
    /// Rejects values the replication core cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 {
            return Err(ConfigError::Invalid {
                field: "network.tick_rate_hz",
                reason: "must be at least 1",
            });
        }
        if self.max_event_queue_length == 0 {
            return Err(ConfigError::Invalid {
                field: "network.max_event_queue_length",
                reason: "must be at least 1",
            });
        }
        if self.inbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "network.inbound_queue_capacity",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

// --- Persistence ---

impl Config {
    /// Read `config.ron` from `config_dir`, writing the defaults there first
    /// if the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Write this config to `config_dir/config.ron`, creating the directory.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::Write)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::Write)
    }

    /// Re-read the file. `None` when it still matches `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;

        if &new_config != self {
            log::info!("Network config changed on disk");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: Config = ron::from_str(&contents).map_err(ConfigError::Parse)?;
        config.network.validate()?;
        Ok(config)
    }
}
