//! Networked entity replication: typed properties with dirty tracking,
//! bounded event channels, per-entity ownership arbitration, and the entity
//! directory that drives the fixed-rate sync pass.

pub mod codec;
pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod listener;
pub mod manager;
pub mod ownership;
pub mod prefab;
pub mod property;
pub mod tick;
pub mod wire;

pub use codec::{Codec, CodecRegistry, PostcardCodec, SelfDescribing, SharedCodec, resolve_codec};
pub use config::ReplicationConfig;
pub use entity::{
    DisconnectBehaviour, EntityBuilder, EventSink, NetworkComponent, NetworkEntity, ObjectId,
    OwnerChange, OwnershipValidator, PropertySink,
};
pub use error::{CodecError, ReplicationError};
pub use event::{DEFAULT_MAX_QUEUE_LENGTH, EventKey, NetworkEvent};
pub use listener::{EventSource, ListenerId};
pub use manager::{NetworkManager, RejectedSpawn, TickStats};
pub use ownership::OwnershipTicket;
pub use prefab::PrefabRegistry;
pub use property::{NetworkProperty, PropertyKey};
pub use tick::{NetworkIdAllocator, TickSchedule};
pub use wire::{Record, SpawnRecord, WIRE_VERSION, WireError, decode_records, encode_records};

pub use foundry_net::{NetworkId, PlayerId};
