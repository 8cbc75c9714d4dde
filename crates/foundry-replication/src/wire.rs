//! Per-entity wire payloads.
//!
//! The transport carries the entity id alongside each payload, so a payload
//! is just a version byte followed by a postcard-encoded list of [`Record`]s:
//!
//! `[version: u8] [len: varint] ([record kind: varint] [fields...])*`
//!
//! Property and event records hold `[index: varint] [len: varint] [bytes]`.
//! Records are applied in order, which is how per-entity ordering is kept.

use foundry_net::PlayerId;
use serde::{Deserialize, Serialize};

use crate::entity::{DisconnectBehaviour, ObjectId};

/// Current payload format version.
pub const WIRE_VERSION: u8 = 2;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One item in an entity payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// New value for the property at `index`.
    Property { index: u32, bytes: Vec<u8> },
    /// One queued item for the event at `index`.
    Event { index: u32, bytes: Vec<u8> },
    /// Ask the current owner to hand the entity to `requested_owner`.
    /// The nonce carries the requester's full player id in its high 64 bits.
    OwnershipRequest { requested_owner: PlayerId, nonce: u128 },
    /// The owner's decision, broadcast so every peer applies the same owner.
    OwnershipResponse {
        nonce: u128,
        accepted: bool,
        owner: PlayerId,
    },
    /// Ask the graph authority to assign an id to a locally created entity.
    /// Sent with [`NetworkId::INVALID`](foundry_net::NetworkId::INVALID).
    SpawnRequest(SpawnRecord),
    /// The entity has joined the graph under the payload's entity id.
    Spawn(SpawnRecord),
    /// The entity has left the graph.
    Despawn,
    /// The authority could not build a counterpart for a spawn request.
    /// Sent back to the requester only.
    SpawnRejected { object_id: ObjectId, reason: String },
}

/// What a peer needs to build or re-associate its counterpart of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRecord {
    pub object_id: ObjectId,
    pub prefab: Option<String>,
    pub owner: PlayerId,
    pub disconnect_behaviour: DisconnectBehaviour,
    pub allow_ownership_transfer: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors decoding an entity payload.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The payload had no version byte.
    #[error("empty payload")]
    EmptyPayload,

    /// The version byte does not match [`WIRE_VERSION`].
    #[error("unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    /// The record list could not be encoded or decoded.
    #[error("malformed records: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode `records` into a versioned payload.
pub fn encode_records(records: &[Record]) -> Result<Vec<u8>, WireError> {
    Ok(postcard::to_extend(records, vec![WIRE_VERSION])?)
}

/// Decode a versioned payload into its records.
pub fn decode_records(payload: &[u8]) -> Result<Vec<Record>, WireError> {
    let (&version, body) = payload.split_first().ok_or(WireError::EmptyPayload)?;
    if version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}
