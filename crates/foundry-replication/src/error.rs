//! Error taxonomy for the replication core.
//!
//! Configuration errors halt setup; protocol and transient errors are logged
//! by the manager and only the offending message or field is dropped.

use foundry_net::{NetworkId, PlayerId, SessionError, TransportError};

use crate::entity::ObjectId;
use crate::wire::WireError;

/// Failures of a single codec operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Neither an explicit, self-describing, nor registered codec exists.
    #[error("no codec registered for `{type_name}`")]
    NotFound {
        /// Rust type name of the value.
        type_name: &'static str,
    },

    /// The value could not be encoded.
    #[error("failed to encode `{type_name}`: {reason}")]
    Encode {
        /// Rust type name of the value.
        type_name: &'static str,
        /// Underlying codec message.
        reason: String,
    },

    /// The bytes do not decode to a value of this type.
    #[error("failed to decode `{type_name}`: {reason}")]
    Decode {
        /// Rust type name of the value.
        type_name: &'static str,
        /// Underlying codec message.
        reason: String,
    },
}

/// Errors raised by entities and the manager.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// A property or event type has no codec. Raised at entity build time.
    #[error("missing codec: {0}")]
    MissingCodec(#[source] CodecError),

    /// Entities need a non-empty object id to survive reconnects.
    #[error("entity object id must not be empty")]
    EmptyObjectId,

    /// Two entities claimed the same network id.
    #[error("duplicate entity id {0}")]
    DuplicateEntity(NetworkId),

    /// Two live entities share an object id.
    #[error("object `{0}` is already registered")]
    DuplicateObject(ObjectId),

    /// [`NetworkId::INVALID`] cannot be registered.
    #[error("cannot register an entity with an invalid network id")]
    InvalidNetworkId,

    /// No pending local entity carries this object id.
    #[error("no pending entity for object `{0}`")]
    UnknownObject(ObjectId),

    /// No prefab factory is registered under this name.
    #[error("no prefab named `{0}`")]
    UnknownPrefab(String),

    /// A non-authority peer cannot ask for an id without a prefab: the
    /// authority would have nothing to build its counterpart from.
    #[error("object `{0}` has no prefab to spawn remotely")]
    MissingPrefab(ObjectId),

    /// No entity is registered under this id.
    #[error("unknown entity {0}")]
    UnknownEntity(NetworkId),

    /// Inbound property index beyond the entity's property list.
    #[error("property index {index} out of range for {entity} ({len} properties)")]
    PropertyIndexOutOfRange {
        /// Target entity.
        entity: NetworkId,
        /// Offending index.
        index: u32,
        /// Number of properties on the entity.
        len: usize,
    },

    /// Inbound event index beyond the entity's event list.
    #[error("event index {index} out of range for {entity} ({len} events)")]
    EventIndexOutOfRange {
        /// Target entity.
        entity: NetworkId,
        /// Offending index.
        index: u32,
        /// Number of events on the entity.
        len: usize,
    },

    /// A typed key was used against a slot holding another type.
    #[error("slot {index} does not hold a `{expected}`")]
    KeyTypeMismatch {
        /// Slot index.
        index: u32,
        /// Type the key expected.
        expected: &'static str,
    },

    /// A guarded write was attempted by a peer that does not own the entity.
    #[error("{player} does not own {entity}")]
    NotOwner {
        /// Target entity.
        entity: NetworkId,
        /// Local player attempting the write.
        player: PlayerId,
    },

    /// A single value failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An inbound payload was not a valid record list.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The transport refused an outbound payload.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A session transition was requested from the wrong state.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ReplicationError {
    /// Setup-time misconfiguration that should halt startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingCodec(_)
                | Self::EmptyObjectId
                | Self::DuplicateEntity(_)
                | Self::DuplicateObject(_)
                | Self::InvalidNetworkId
                | Self::UnknownPrefab(_)
                | Self::MissingPrefab(_)
        )
    }
}
