//! Entities: the replicated counterpart of one application object.
//!
//! An entity owns an ordered list of properties and an ordered list of events.
//! Both lists are fixed when the entity is built: components register their
//! slots through [`NetworkComponent::register_properties`] in the order they
//! are attached, so every peer that builds the same entity from the same
//! components agrees on the slot indices used on the wire.

use std::any::type_name;
use std::collections::BTreeMap;
use std::fmt;

use foundry_net::{NetworkId, PlayerId, Session};
use serde::{Deserialize, Serialize};

use crate::codec::{CodecRegistry, SelfDescribing, SharedCodec, resolve_codec};
use crate::error::ReplicationError;
use crate::event::{DEFAULT_MAX_QUEUE_LENGTH, ErasedEvent, EventKey, NetworkEvent};
use crate::listener::{EventSource, ListenerId, Listeners};
use crate::property::{ErasedProperty, NetworkProperty, PropertyKey};

// ---------------------------------------------------------------------------
// Identity and policy
// ---------------------------------------------------------------------------

/// Stable identifier that survives reconnects, unlike [`NetworkId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens to an entity when its owner leaves the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectBehaviour {
    /// Ownership moves to the graph authority.
    #[default]
    TransferOwnership,
    /// The entity is removed on every peer.
    Destroy,
}

/// Decides an ownership request: `(requested_owner, current_owner) -> accept`.
///
/// A plain function pointer, so it cannot capture mutable state. Only the
/// current owner runs it; everyone else applies the broadcast result.
pub type OwnershipValidator = fn(PlayerId, PlayerId) -> bool;

/// An applied change of owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerChange {
    pub entity: NetworkId,
    pub previous: PlayerId,
    pub owner: PlayerId,
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Application-side component contributing networked slots to an entity.
///
/// Implementations add their properties and events to the sinks and keep the
/// returned keys. Registration must not depend on runtime state: the same
/// component registers the same slots, in the same order, on every peer.
pub trait NetworkComponent {
    fn register_properties(
        &mut self,
        properties: &mut PropertySink<'_>,
        events: &mut EventSink<'_>,
    ) -> Result<(), ReplicationError>;
}

/// Collects properties during entity construction.
pub struct PropertySink<'a> {
    registry: &'a CodecRegistry,
    slots: &'a mut Vec<Box<dyn ErasedProperty>>,
}

impl PropertySink<'_> {
    /// Add a property whose codec comes from the registry.
    pub fn add<T: 'static>(&mut self, initial: T) -> Result<PropertyKey<T>, ReplicationError> {
        self.push(initial, None)
    }

    /// Add a property with an explicit codec.
    pub fn add_with_codec<T: 'static>(
        &mut self,
        initial: T,
        codec: SharedCodec<T>,
    ) -> Result<PropertyKey<T>, ReplicationError> {
        self.push(initial, Some(codec))
    }

    /// Add a property of a type that carries its own codec.
    pub fn add_self_describing<T: SelfDescribing>(
        &mut self,
        initial: T,
    ) -> Result<PropertyKey<T>, ReplicationError> {
        self.push(initial, Some(T::codec()))
    }

    fn push<T: 'static>(
        &mut self,
        initial: T,
        explicit: Option<SharedCodec<T>>,
    ) -> Result<PropertyKey<T>, ReplicationError> {
        let codec = resolve_codec(explicit, self.registry).map_err(ReplicationError::MissingCodec)?;
        let key = PropertyKey::at(self.slots.len() as u32);
        self.slots.push(Box::new(NetworkProperty::new(initial, codec)));
        Ok(key)
    }
}

/// Collects events during entity construction.
pub struct EventSink<'a> {
    registry: &'a CodecRegistry,
    max_queue_length: usize,
    slots: &'a mut Vec<Box<dyn ErasedEvent>>,
}

impl EventSink<'_> {
    /// Add an event whose codec comes from the registry.
    pub fn add<T: 'static>(&mut self) -> Result<EventKey<T>, ReplicationError> {
        self.push(None)
    }

    /// Add an event with an explicit codec.
    pub fn add_with_codec<T: 'static>(
        &mut self,
        codec: SharedCodec<T>,
    ) -> Result<EventKey<T>, ReplicationError> {
        self.push(Some(codec))
    }

    /// Add an event whose argument type carries its own codec.
    pub fn add_self_describing<T: SelfDescribing>(
        &mut self,
    ) -> Result<EventKey<T>, ReplicationError> {
        self.push(Some(T::codec()))
    }

    fn push<T: 'static>(
        &mut self,
        explicit: Option<SharedCodec<T>>,
    ) -> Result<EventKey<T>, ReplicationError> {
        let codec = resolve_codec(explicit, self.registry).map_err(ReplicationError::MissingCodec)?;
        let key = EventKey::at(self.slots.len() as u32);
        self.slots
            .push(Box::new(NetworkEvent::new(codec, self.max_queue_length)));
        Ok(key)
    }
}

/// Builds a [`NetworkEntity`] from its components.
pub struct EntityBuilder<'r> {
    registry: &'r CodecRegistry,
    object_id: ObjectId,
    prefab: Option<String>,
    disconnect_behaviour: DisconnectBehaviour,
    allow_ownership_transfer: bool,
    validator: Option<OwnershipValidator>,
    max_event_queue_length: usize,
    properties: Vec<Box<dyn ErasedProperty>>,
    events: Vec<Box<dyn ErasedEvent>>,
}

impl<'r> EntityBuilder<'r> {
    pub fn new(object_id: impl Into<ObjectId>, registry: &'r CodecRegistry) -> Self {
        Self {
            registry,
            object_id: object_id.into(),
            prefab: None,
            disconnect_behaviour: DisconnectBehaviour::default(),
            allow_ownership_transfer: true,
            validator: None,
            max_event_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
            properties: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    /// Prefab name peers use to build their counterpart of this entity.
    pub fn prefab(mut self, name: impl Into<String>) -> Self {
        self.prefab = Some(name.into());
        self
    }

    pub fn disconnect_behaviour(mut self, behaviour: DisconnectBehaviour) -> Self {
        self.disconnect_behaviour = behaviour;
        self
    }

    pub fn allow_ownership_transfer(mut self, allow: bool) -> Self {
        self.allow_ownership_transfer = allow;
        self
    }

    pub fn ownership_validator(mut self, validator: OwnershipValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Queue bound for events added by components attached after this call.
    pub fn max_event_queue_length(mut self, max: usize) -> Self {
        self.max_event_queue_length = max;
        self
    }

    /// Attach a component. Its slots follow those of earlier components.
    pub fn with_component(
        mut self,
        component: &mut dyn NetworkComponent,
    ) -> Result<Self, ReplicationError> {
        let mut properties = PropertySink {
            registry: self.registry,
            slots: &mut self.properties,
        };
        let mut events = EventSink {
            registry: self.registry,
            max_queue_length: self.max_event_queue_length,
            slots: &mut self.events,
        };
        component.register_properties(&mut properties, &mut events)?;
        Ok(self)
    }

    pub fn build(self) -> Result<NetworkEntity, ReplicationError> {
        if self.object_id.is_empty() {
            return Err(ReplicationError::EmptyObjectId);
        }
        tracing::debug!(
            "Built entity `{}` with {} propert(ies) and {} event(s)",
            self.object_id,
            self.properties.len(),
            self.events.len()
        );
        Ok(NetworkEntity {
            id: NetworkId::INVALID,
            object_id: self.object_id,
            prefab: self.prefab,
            owner: PlayerId::NONE,
            provisional_owner: None,
            disconnect_behaviour: self.disconnect_behaviour,
            allow_ownership_transfer: self.allow_ownership_transfer,
            validator: self.validator,
            properties: self.properties,
            events: self.events,
            owner_listeners: Listeners::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// NetworkEntity
// ---------------------------------------------------------------------------

/// One replicated object: identity, ownership, and its property/event slots.
pub struct NetworkEntity {
    id: NetworkId,
    object_id: ObjectId,
    prefab: Option<String>,
    owner: PlayerId,
    provisional_owner: Option<PlayerId>,
    disconnect_behaviour: DisconnectBehaviour,
    allow_ownership_transfer: bool,
    validator: Option<OwnershipValidator>,
    properties: Vec<Box<dyn ErasedProperty>>,
    events: Vec<Box<dyn ErasedEvent>>,
    owner_listeners: Listeners<OwnerChange>,
}

impl NetworkEntity {
    /// [`NetworkId::INVALID`] until the session authority binds the entity.
    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn prefab(&self) -> Option<&str> {
        self.prefab.as_deref()
    }

    /// Confirmed owner, [`PlayerId::NONE`] before the entity joins the graph.
    pub fn owner(&self) -> PlayerId {
        self.owner
    }

    /// The owner to render with: the requested owner while an ownership
    /// request is in flight, otherwise the confirmed owner.
    pub fn effective_owner(&self) -> PlayerId {
        self.provisional_owner.unwrap_or(self.owner)
    }

    /// Whether an ownership request for this entity is awaiting a response.
    pub fn is_provisional(&self) -> bool {
        self.provisional_owner.is_some()
    }

    /// True when the session is not connected, or the local player owns the
    /// entity.
    pub fn is_owner(&self, session: &Session) -> bool {
        !session.is_connected() || self.owner == session.local_player_id()
    }

    pub fn disconnect_behaviour(&self) -> DisconnectBehaviour {
        self.disconnect_behaviour
    }

    pub fn allows_ownership_transfer(&self) -> bool {
        self.allow_ownership_transfer
    }

    pub fn set_allow_ownership_transfer(&mut self, allow: bool) {
        self.allow_ownership_transfer = allow;
    }

    pub fn set_ownership_validator(&mut self, validator: Option<OwnershipValidator>) {
        self.validator = validator;
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    // --- Typed access ---

    pub fn property<T: 'static>(
        &self,
        key: PropertyKey<T>,
    ) -> Result<&NetworkProperty<T>, ReplicationError> {
        let index = key.index();
        self.properties
            .get(index as usize)
            .ok_or(self.property_out_of_range(index))?
            .as_any()
            .downcast_ref::<NetworkProperty<T>>()
            .ok_or(key_mismatch::<NetworkProperty<T>>(index))
    }

    pub fn property_mut<T: 'static>(
        &mut self,
        key: PropertyKey<T>,
    ) -> Result<&mut NetworkProperty<T>, ReplicationError> {
        let index = key.index();
        let out_of_range = self.property_out_of_range(index);
        self.properties
            .get_mut(index as usize)
            .ok_or(out_of_range)?
            .as_any_mut()
            .downcast_mut::<NetworkProperty<T>>()
            .ok_or(key_mismatch::<NetworkProperty<T>>(index))
    }

    /// Set a property only if the local player owns the entity.
    pub fn set_property_checked<T: 'static>(
        &mut self,
        session: &Session,
        key: PropertyKey<T>,
        value: T,
    ) -> Result<(), ReplicationError> {
        if !self.is_owner(session) {
            return Err(ReplicationError::NotOwner {
                entity: self.id,
                player: session.local_player_id(),
            });
        }
        self.property_mut(key)?.set(value);
        Ok(())
    }

    pub fn event<T: 'static>(&self, key: EventKey<T>) -> Result<&NetworkEvent<T>, ReplicationError> {
        let index = key.index();
        self.events
            .get(index as usize)
            .ok_or(self.event_out_of_range(index))?
            .as_any()
            .downcast_ref::<NetworkEvent<T>>()
            .ok_or(key_mismatch::<NetworkEvent<T>>(index))
    }

    pub fn event_mut<T: 'static>(
        &mut self,
        key: EventKey<T>,
    ) -> Result<&mut NetworkEvent<T>, ReplicationError> {
        let index = key.index();
        let out_of_range = self.event_out_of_range(index);
        self.events
            .get_mut(index as usize)
            .ok_or(out_of_range)?
            .as_any_mut()
            .downcast_mut::<NetworkEvent<T>>()
            .ok_or(key_mismatch::<NetworkEvent<T>>(index))
    }

    // --- Sync primitives ---

    /// Encode every dirty property, keyed by slot index, clearing dirty flags.
    /// Properties that fail to encode are logged and left out.
    pub fn collect_dirty_snapshot(&mut self) -> BTreeMap<u32, Vec<u8>> {
        let mut snapshot = BTreeMap::new();
        for (index, property) in self.properties.iter_mut().enumerate() {
            let mut bytes = Vec::new();
            match property.serialize_if_dirty(&mut bytes) {
                Ok(true) => {
                    snapshot.insert(index as u32, bytes);
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("{}: skipping property {index}: {e}", self.id),
            }
        }
        snapshot
    }

    /// Encode every property regardless of dirty flags.
    pub fn collect_full_snapshot(&self) -> BTreeMap<u32, Vec<u8>> {
        let mut snapshot = BTreeMap::new();
        for (index, property) in self.properties.iter().enumerate() {
            let mut bytes = Vec::new();
            match property.serialize(&mut bytes) {
                Ok(()) => {
                    snapshot.insert(index as u32, bytes);
                }
                Err(e) => tracing::warn!("{}: skipping property {index}: {e}", self.id),
            }
        }
        snapshot
    }

    /// Drain every event queue. Only events with pending items appear.
    pub fn collect_pending_events(&mut self) -> BTreeMap<u32, Vec<Vec<u8>>> {
        self.events
            .iter_mut()
            .enumerate()
            .filter(|(_, event)| event.event_count() > 0)
            .map(|(index, event)| (index as u32, event.drain_for_send()))
            .filter(|(_, items)| !items.is_empty())
            .collect()
    }

    /// Route an inbound property value to its slot.
    pub fn apply_property_update(&mut self, index: u32, bytes: &[u8]) -> Result<(), ReplicationError> {
        let out_of_range = self.property_out_of_range(index);
        self.properties
            .get_mut(index as usize)
            .ok_or(out_of_range)?
            .apply(bytes)?;
        Ok(())
    }

    /// Route one inbound event item to its slot.
    pub fn apply_event_update(&mut self, index: u32, bytes: &[u8]) -> Result<(), ReplicationError> {
        let out_of_range = self.event_out_of_range(index);
        self.events
            .get_mut(index as usize)
            .ok_or(out_of_range)?
            .apply(bytes)?;
        Ok(())
    }

    // --- Ownership ---

    /// Decide whether `requested` may take ownership. Runs on the current
    /// owner only; the answer is broadcast to everyone else.
    pub fn request_ownership_change(&self, requested: PlayerId) -> bool {
        if !self.allow_ownership_transfer {
            return false;
        }
        self.validator
            .map_or(true, |validate| validate(requested, self.owner))
    }

    /// Called after every applied change of owner.
    pub fn on_owner_changed(
        &mut self,
        listener: impl FnMut(EventSource, &OwnerChange) + 'static,
    ) -> ListenerId {
        self.owner_listeners.add(listener)
    }

    pub fn remove_owner_listener(&mut self, id: ListenerId) -> bool {
        self.owner_listeners.remove(id)
    }

    // --- Manager hooks ---

    pub(crate) fn bind(&mut self, id: NetworkId, owner: PlayerId) {
        self.id = id;
        self.owner = owner;
        self.provisional_owner = None;
    }

    /// Forget the session-scoped id and owner, keeping slots and listeners.
    pub(crate) fn unbind(&mut self) {
        self.id = NetworkId::INVALID;
        self.owner = PlayerId::NONE;
        self.provisional_owner = None;
    }

    pub(crate) fn set_owner(&mut self, owner: PlayerId, source: EventSource) {
        if owner == self.owner {
            return;
        }
        let change = OwnerChange {
            entity: self.id,
            previous: self.owner,
            owner,
        };
        self.owner = owner;
        tracing::info!("{} owner {} -> {}", self.id, change.previous, owner);
        self.owner_listeners.notify(source, &change);
    }

    pub(crate) fn set_provisional_owner(&mut self, owner: PlayerId) {
        self.provisional_owner = Some(owner);
    }

    pub(crate) fn clear_provisional_owner(&mut self) -> Option<PlayerId> {
        self.provisional_owner.take()
    }

    pub(crate) fn mark_all_dirty(&mut self) {
        for property in &mut self.properties {
            property.mark_dirty();
        }
    }

    fn property_out_of_range(&self, index: u32) -> ReplicationError {
        ReplicationError::PropertyIndexOutOfRange {
            entity: self.id,
            index,
            len: self.properties.len(),
        }
    }

    fn event_out_of_range(&self, index: u32) -> ReplicationError {
        ReplicationError::EventIndexOutOfRange {
            entity: self.id,
            index,
            len: self.events.len(),
        }
    }
}

impl fmt::Debug for NetworkEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let property_types: Vec<_> = self.properties.iter().map(|p| p.value_type()).collect();
        let event_types: Vec<_> = self.events.iter().map(|e| e.value_type()).collect();
        f.debug_struct("NetworkEntity")
            .field("id", &self.id)
            .field("object_id", &self.object_id)
            .field("owner", &self.owner)
            .field("provisional_owner", &self.provisional_owner)
            .field("disconnect_behaviour", &self.disconnect_behaviour)
            .field("properties", &property_types)
            .field("events", &event_types)
            .finish()
    }
}

fn key_mismatch<S>(index: u32) -> ReplicationError {
    ReplicationError::KeyTypeMismatch {
        index,
        expected: type_name::<S>(),
    }
}
