//! The entity directory and sync driver for one peer.
//!
//! [`NetworkManager`] owns every entity this peer knows about, keyed by
//! [`NetworkId`], together with locally created entities still waiting for an
//! id. All mutation happens on the tick thread: inbound payloads are queued by
//! the transport and applied in [`NetworkManager::tick`], which is also the
//! only place property and event state is serialized.
//!
//! Control traffic (spawns, despawns, ownership) is sent as soon as it is
//! produced; per-entity payloads keep records in order, so a receiver always
//! sees a spawn before the properties that follow it.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use bytes::Bytes;
use foundry_net::{Destination, InboundReceiver, NetworkId, PlayerId, Session, Transport};

use crate::codec::CodecRegistry;
use crate::config::ReplicationConfig;
use crate::entity::{DisconnectBehaviour, EntityBuilder, NetworkEntity, ObjectId};
use crate::error::ReplicationError;
use crate::listener::EventSource;
use crate::ownership::{OwnershipTicket, PendingOwnership};
use crate::prefab::PrefabRegistry;
use crate::tick::NetworkIdAllocator;
use crate::wire::{Record, SpawnRecord, decode_records, encode_records};

/// Counters for one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Inbound payloads drained from the transport queue.
    pub inbound_messages: usize,
    /// Entity payloads handed to the transport.
    pub messages_sent: usize,
    pub properties_sent: usize,
    pub events_sent: usize,
    /// Ownership requests that resolved as denied by timing out.
    pub ownership_timeouts: usize,
    /// Messages for unknown entities dropped after the retry window.
    pub unresolved_dropped: usize,
}

/// A locally created entity the authority refused to add to the graph.
#[derive(Debug)]
pub struct RejectedSpawn {
    pub entity: NetworkEntity,
    /// Why the authority could not build its counterpart.
    pub reason: String,
}

struct PendingSpawn {
    entity: NetworkEntity,
    /// A spawn request is in flight to the authority.
    requested: bool,
}

struct Unresolved {
    from: PlayerId,
    records: Vec<Record>,
    age: u32,
}

/// Entity directory, ownership arbiter, and sync driver for one peer.
pub struct NetworkManager<T: Transport> {
    config: ReplicationConfig,
    transport: T,
    inbound: Option<InboundReceiver>,
    session: Session,
    codecs: CodecRegistry,
    prefabs: PrefabRegistry,
    ids: NetworkIdAllocator,
    entities: BTreeMap<NetworkId, NetworkEntity>,
    pending_local: BTreeMap<ObjectId, PendingSpawn>,
    rejected: Vec<RejectedSpawn>,
    unresolved: BTreeMap<NetworkId, VecDeque<Unresolved>>,
    ownership_requests: BTreeMap<u128, PendingOwnership>,
    next_nonce: u64,
}

impl<T: Transport> NetworkManager<T> {
    pub fn new(config: ReplicationConfig, transport: T, codecs: CodecRegistry) -> Self {
        let session = Session::new(config.host_player_id);
        Self {
            config,
            transport,
            inbound: None,
            session,
            codecs,
            prefabs: PrefabRegistry::new(),
            ids: NetworkIdAllocator::new(),
            entities: BTreeMap::new(),
            pending_local: BTreeMap::new(),
            rejected: Vec::new(),
            unresolved: BTreeMap::new(),
            ownership_requests: BTreeMap::new(),
            next_nonce: 0,
        }
    }

    /// Drain `inbound` at the start of every tick.
    pub fn attach_inbound(&mut self, inbound: InboundReceiver) {
        self.inbound = Some(inbound);
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn local_player_id(&self) -> PlayerId {
        self.session.local_player_id()
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn prefabs_mut(&mut self) -> &mut PrefabRegistry {
        &mut self.prefabs
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// A builder using this manager's codecs and default event queue bound.
    pub fn entity_builder(&self, object_id: impl Into<ObjectId>) -> EntityBuilder<'_> {
        EntityBuilder::new(object_id, &self.codecs)
            .max_event_queue_length(self.config.max_event_queue_length)
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    pub fn begin_connect(&mut self) -> Result<(), ReplicationError> {
        self.session.begin_connect()?;
        Ok(())
    }

    /// Complete the connection with the id assigned by the session layer and
    /// announce every entity created while offline.
    ///
    /// `peers` are the members already in the session, oldest first. The
    /// longest-connected member stays authority, so a joiner only allocates
    /// ids when it opens the session itself.
    pub fn on_connected(
        &mut self,
        local_player_id: PlayerId,
        peers: impl IntoIterator<Item = PlayerId>,
    ) -> Result<(), ReplicationError> {
        self.session.on_connected(local_player_id, peers)?;
        self.ids.reset();
        self.announce_pending();
        Ok(())
    }

    /// `begin_connect` followed by `on_connected`.
    pub fn connect(
        &mut self,
        local_player_id: PlayerId,
        peers: impl IntoIterator<Item = PlayerId>,
    ) -> Result<(), ReplicationError> {
        self.begin_connect()?;
        self.on_connected(local_player_id, peers)
    }

    /// Leave the session. Network ids are session-scoped: entities this peer
    /// owns go back to the pending set, to be re-announced (and matched by
    /// object id) on the next connection. Everything else is dropped.
    pub fn disconnect(&mut self) {
        let local = self.session.local_player_id();
        self.session.disconnect();

        for (_, pending) in std::mem::take(&mut self.ownership_requests) {
            pending.resolve(false);
        }
        self.unresolved.clear();

        for (id, mut entity) in std::mem::take(&mut self.entities) {
            if entity.owner() == local {
                entity.unbind();
                self.pending_local.insert(
                    entity.object_id().clone(),
                    PendingSpawn {
                        entity,
                        requested: false,
                    },
                );
            } else {
                tracing::debug!("Dropping {id} on disconnect");
            }
        }
        for pending in self.pending_local.values_mut() {
            pending.requested = false;
        }
    }

    /// A peer joined: send it every entity this peer owns, with full state.
    pub fn on_peer_connected(&mut self, player: PlayerId) {
        if !self.session.peer_joined(player) {
            return;
        }
        tracing::info!("{player} joined the session");
        let local = self.session.local_player_id();
        let mut outbound = Vec::new();
        for (id, entity) in &self.entities {
            if entity.owner() != local {
                continue;
            }
            let mut records = vec![Record::Spawn(spawn_record(entity))];
            records.extend(
                entity
                    .collect_full_snapshot()
                    .into_iter()
                    .map(|(index, bytes)| Record::Property { index, bytes }),
            );
            outbound.push((*id, records));
        }
        for (id, records) in outbound {
            if let Err(e) = self.send_records(Destination::Peer(player), id, &records) {
                tracing::warn!("Failed to send {id} to {player}: {e}");
            }
        }
    }

    /// A peer left: apply each of its entities' disconnect behaviour.
    ///
    /// Every peer runs this with the same membership, so every peer picks the
    /// same new owner without exchanging messages.
    pub fn on_peer_disconnected(&mut self, player: PlayerId) {
        if !self.session.peer_left(player) {
            return;
        }
        tracing::info!("{player} left the session");
        let authority = self.session.authority();

        let orphaned: Vec<NetworkId> = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.owner() == player)
            .map(|(id, _)| *id)
            .collect();
        for id in orphaned {
            let Some(entity) = self.entities.get_mut(&id) else {
                continue;
            };
            match entity.disconnect_behaviour() {
                DisconnectBehaviour::TransferOwnership => {
                    entity.set_owner(authority, EventSource::Remote);
                }
                DisconnectBehaviour::Destroy => {
                    self.remove_entity(id);
                    if self.session.is_authority() {
                        self.broadcast_despawn(id);
                    }
                }
            }
        }

        let stranded: Vec<u128> = self
            .ownership_requests
            .iter()
            .filter(|(_, pending)| pending.target == player)
            .map(|(nonce, _)| *nonce)
            .collect();
        for nonce in stranded {
            self.fail_ownership_request(nonce);
        }

        // The authority may have been the one to leave.
        for pending in self.pending_local.values_mut() {
            pending.requested = false;
        }
        self.announce_pending();
    }

    // -----------------------------------------------------------------------
    // Entity lifecycle
    // -----------------------------------------------------------------------

    /// Add a locally created entity to the graph, owned by this peer.
    ///
    /// The authority assigns the id immediately; any other peer sends a spawn
    /// request and the entity stays pending until the authority's spawn
    /// arrives. Returns the id when it is already known.
    ///
    /// A connected non-authority peer needs a prefab for the authority to
    /// build from. Requests the authority cannot satisfy come back through
    /// [`take_rejected_spawns`](Self::take_rejected_spawns).
    pub fn spawn(&mut self, entity: NetworkEntity) -> Result<Option<NetworkId>, ReplicationError> {
        let object_id = entity.object_id().clone();
        if self.contains_object(&object_id) {
            return Err(ReplicationError::DuplicateObject(object_id));
        }
        if self.session.is_connected()
            && !self.session.is_authority()
            && entity.prefab().is_none()
        {
            return Err(ReplicationError::MissingPrefab(object_id));
        }
        self.pending_local.insert(
            object_id.clone(),
            PendingSpawn {
                entity,
                requested: false,
            },
        );
        self.announce_pending();
        Ok(self
            .entities
            .values()
            .find(|e| e.object_id() == &object_id)
            .map(NetworkEntity::id))
    }

    /// Bind a pending local entity to an id assigned outside the session, for
    /// example by a matchmaking server.
    pub fn bind(
        &mut self,
        object_id: &ObjectId,
        id: NetworkId,
        owner: PlayerId,
    ) -> Result<(), ReplicationError> {
        if !id.is_valid() {
            return Err(ReplicationError::InvalidNetworkId);
        }
        if self.entities.contains_key(&id) {
            return Err(ReplicationError::DuplicateEntity(id));
        }
        let mut pending = self
            .pending_local
            .remove(object_id)
            .ok_or_else(|| ReplicationError::UnknownObject(object_id.clone()))?;
        pending.entity.bind(id, owner);
        if owner == self.session.local_player_id() {
            pending.entity.mark_all_dirty();
        }
        self.insert_entity(pending.entity);
        Ok(())
    }

    /// Insert an entity that already carries its id.
    pub fn register_entity(&mut self, entity: NetworkEntity) -> Result<NetworkId, ReplicationError> {
        let id = entity.id();
        if !id.is_valid() {
            return Err(ReplicationError::InvalidNetworkId);
        }
        if self.entities.contains_key(&id) {
            return Err(ReplicationError::DuplicateEntity(id));
        }
        if self.contains_object(entity.object_id()) {
            return Err(ReplicationError::DuplicateObject(entity.object_id().clone()));
        }
        self.insert_entity(entity);
        Ok(id)
    }

    /// Build an entity from a registered prefab.
    pub fn instantiate(
        &self,
        prefab: &str,
        object_id: impl Into<ObjectId>,
    ) -> Result<NetworkEntity, ReplicationError> {
        self.prefabs.build(prefab, self.entity_builder(object_id))
    }

    /// Remove an entity and tell every peer.
    pub fn destroy(&mut self, id: NetworkId) -> Result<NetworkEntity, ReplicationError> {
        let entity = self
            .remove_entity(id)
            .ok_or(ReplicationError::UnknownEntity(id))?;
        if self.session.is_connected() {
            self.broadcast_despawn(id);
        }
        Ok(entity)
    }

    pub fn entity(&self, id: NetworkId) -> Option<&NetworkEntity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: NetworkId) -> Option<&mut NetworkEntity> {
        self.entities.get_mut(&id)
    }

    /// Look up a bound or pending entity by its stable object id.
    pub fn entity_by_object(&self, object_id: &ObjectId) -> Option<&NetworkEntity> {
        self.entities
            .values()
            .find(|e| e.object_id() == object_id)
            .or_else(|| self.pending_local.get(object_id).map(|p| &p.entity))
    }

    pub fn entity_by_object_mut(&mut self, object_id: &ObjectId) -> Option<&mut NetworkEntity> {
        if let Some(entity) = self
            .entities
            .values_mut()
            .find(|e| e.object_id() == object_id)
        {
            return Some(entity);
        }
        self.pending_local.get_mut(object_id).map(|p| &mut p.entity)
    }

    /// Bound entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &NetworkEntity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Locally created entities not yet bound to an id.
    pub fn pending_count(&self) -> usize {
        self.pending_local.len()
    }

    /// Entities whose spawn request the authority refused since the last call.
    pub fn take_rejected_spawns(&mut self) -> Vec<RejectedSpawn> {
        std::mem::take(&mut self.rejected)
    }

    /// Whether the local peer owns `id`. False for unknown entities.
    pub fn is_owner(&self, id: NetworkId) -> bool {
        self.entities
            .get(&id)
            .is_some_and(|e| e.is_owner(&self.session))
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    /// Ask for ownership of `id` on behalf of the local player.
    ///
    /// The entity shows the local player as provisional owner until the
    /// current owner answers. Denial, timeout, or the owner leaving resolve
    /// the ticket as `false` and roll the provisional owner back. Entities
    /// that disallow transfer are denied without any network traffic.
    pub fn request_object_ownership(&mut self, id: NetworkId) -> OwnershipTicket {
        let local = self.session.local_player_id();
        let authority = self.session.authority();
        let Some(entity) = self.entities.get_mut(&id) else {
            tracing::warn!("Ownership requested for unknown entity {id}");
            return OwnershipTicket::resolved(false);
        };
        if !entity.allows_ownership_transfer() {
            tracing::debug!("{id} does not allow ownership transfer");
            return OwnershipTicket::resolved(false);
        }
        if !self.session.is_connected() {
            return OwnershipTicket::resolved(false);
        }
        let owner = entity.owner();
        if owner == local {
            return OwnershipTicket::resolved(true);
        }

        let target = if self.session.is_present(owner) {
            owner
        } else {
            authority
        };
        if target == local {
            // We arbitrate for an absent owner; no round trip needed.
            let accepted = entity.request_ownership_change(local);
            if accepted {
                entity.set_owner(local, EventSource::Local);
            }
            let nonce = self.next_nonce();
            self.send_ownership_response(Destination::Broadcast, id, nonce, accepted);
            return OwnershipTicket::resolved(accepted);
        }

        let nonce = self.next_nonce();
        let request = [Record::OwnershipRequest {
            requested_owner: local,
            nonce,
        }];
        if let Err(e) = self.send_records(Destination::Peer(target), id, &request) {
            tracing::warn!("Ownership request for {id} not sent: {e}");
            return OwnershipTicket::resolved(false);
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.set_provisional_owner(local);
        }
        let (ticket, reply) = OwnershipTicket::pending();
        let deadline = Instant::now() + self.config.ownership_timeout;
        self.ownership_requests
            .insert(nonce, PendingOwnership::new(id, target, deadline, reply));
        tracing::debug!("Requested ownership of {id} from {target} (nonce {nonce:#x})");
        ticket
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Apply one payload from `from` addressed to `entity`.
    ///
    /// A payload that does not decode is dropped whole. Records for an entity
    /// this peer does not know yet are held for a bounded number of ticks.
    pub fn on_message(&mut self, from: PlayerId, entity: NetworkId, payload: &[u8]) {
        match decode_records(payload) {
            Ok(records) => self.apply_records(from, entity, records),
            Err(e) => tracing::warn!("Dropping payload from {from} for {entity}: {e}"),
        }
    }

    fn apply_records(&mut self, from: PlayerId, id: NetworkId, records: Vec<Record>) {
        let mut records = records.into_iter();
        while let Some(record) = records.next() {
            let needs_entity = !matches!(
                record,
                Record::Spawn(_)
                    | Record::SpawnRequest(_)
                    | Record::SpawnRejected { .. }
                    | Record::Despawn
            );
            if needs_entity && !self.entities.contains_key(&id) {
                let mut rest = vec![record];
                rest.extend(records);
                self.buffer_unresolved(from, id, rest);
                return;
            }

            match record {
                Record::Property { index, bytes } => {
                    let Some(entity) = self.entities.get_mut(&id) else {
                        continue;
                    };
                    if let Err(e) = entity.apply_property_update(index, &bytes) {
                        tracing::warn!("{id}: dropping property {index} from {from}: {e}");
                    }
                }
                Record::Event { index, bytes } => {
                    let Some(entity) = self.entities.get_mut(&id) else {
                        continue;
                    };
                    if let Err(e) = entity.apply_event_update(index, &bytes) {
                        tracing::warn!("{id}: dropping event {index} from {from}: {e}");
                    }
                }
                Record::OwnershipRequest {
                    requested_owner,
                    nonce,
                } => self.handle_ownership_request(from, id, requested_owner, nonce),
                Record::OwnershipResponse {
                    nonce,
                    accepted,
                    owner,
                } => self.handle_ownership_response(id, nonce, accepted, owner),
                Record::SpawnRequest(spawn) => self.handle_spawn_request(from, spawn),
                Record::Spawn(spawn) => self.handle_spawn(from, id, spawn),
                Record::SpawnRejected { object_id, reason } => {
                    self.handle_spawn_rejected(from, object_id, reason);
                }
                Record::Despawn => {
                    if self.remove_entity(id).is_some() {
                        tracing::info!("{id} despawned by {from}");
                    }
                }
            }
        }
    }

    fn handle_ownership_request(
        &mut self,
        from: PlayerId,
        id: NetworkId,
        requested: PlayerId,
        nonce: u128,
    ) {
        let local = self.session.local_player_id();
        let authority = self.session.authority();
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let owner = entity.owner();
        let decider = if self.session.is_present(owner) {
            owner
        } else {
            authority
        };

        if decider != local {
            // The requester's view of the owner is stale.
            tracing::debug!("Denying stale ownership request for {id} from {from}");
            self.send_ownership_response(Destination::Peer(from), id, nonce, false);
            return;
        }

        let accepted =
            self.session.is_present(requested) && entity.request_ownership_change(requested);
        if accepted {
            entity.set_owner(requested, EventSource::Remote);
        }
        tracing::info!(
            "{} ownership of {id} for {requested}",
            if accepted { "Granted" } else { "Denied" }
        );
        self.send_ownership_response(Destination::Broadcast, id, nonce, accepted);
    }

    fn handle_ownership_response(
        &mut self,
        id: NetworkId,
        nonce: u128,
        accepted: bool,
        owner: PlayerId,
    ) {
        let local = self.session.local_player_id();
        let ours = self
            .ownership_requests
            .remove(&nonce)
            .filter(|pending| pending.entity == id);
        if let Some(entity) = self.entities.get_mut(&id) {
            if ours.is_some() {
                entity.clear_provisional_owner();
            }
            if owner.is_some() {
                entity.set_owner(owner, EventSource::Remote);
            }
        }
        if let Some(pending) = ours {
            pending.resolve(accepted && owner == local);
        }
    }

    fn handle_spawn_request(&mut self, from: PlayerId, spawn: SpawnRecord) {
        if !self.session.is_authority() {
            tracing::warn!(
                "Ignoring spawn request for `{}` from {from}: not the authority",
                spawn.object_id
            );
            return;
        }
        if let Some(existing) = self
            .entities
            .values()
            .find(|e| e.object_id() == &spawn.object_id)
        {
            // Reconnect: the object is already in the graph.
            let id = existing.id();
            let records = [Record::Spawn(spawn_record(existing))];
            if let Err(e) = self.send_records(Destination::Peer(from), id, &records) {
                tracing::warn!("Failed to re-announce {id} to {from}: {e}");
            }
            return;
        }

        let mut entity = match self.build_counterpart(&spawn) {
            Ok(entity) => entity,
            Err(e) => {
                tracing::warn!("Rejecting spawn of `{}` from {from}: {e}", spawn.object_id);
                let rejection = [Record::SpawnRejected {
                    object_id: spawn.object_id,
                    reason: e.to_string(),
                }];
                if let Err(e) =
                    self.send_records(Destination::Peer(from), NetworkId::INVALID, &rejection)
                {
                    tracing::warn!("Spawn rejection for {from} not sent: {e}");
                }
                return;
            }
        };
        let id = self.ids.allocate();
        entity.bind(id, from);
        let record = spawn_record(&entity);
        self.insert_entity(entity);
        if let Err(e) = self.send_records(Destination::Broadcast, id, &[Record::Spawn(record)]) {
            tracing::warn!("Failed to announce {id}: {e}");
        }
    }

    fn handle_spawn(&mut self, from: PlayerId, id: NetworkId, spawn: SpawnRecord) {
        if !id.is_valid() {
            tracing::warn!("Ignoring spawn of `{}` from {from} without an id", spawn.object_id);
            return;
        }
        if let Some(existing) = self.entities.get(&id) {
            if existing.object_id() != &spawn.object_id {
                tracing::warn!(
                    "Spawn of `{}` from {from} conflicts with {id} (`{}`)",
                    spawn.object_id,
                    existing.object_id()
                );
            }
            return;
        }
        if self.entities.values().any(|e| e.object_id() == &spawn.object_id) {
            tracing::warn!(
                "Ignoring spawn of `{}` as {id}: already bound",
                spawn.object_id
            );
            return;
        }

        let local = self.session.local_player_id();
        let entity = match self.pending_local.remove(&spawn.object_id) {
            Some(pending) => Ok(pending.entity),
            None => self.build_counterpart(&spawn),
        };
        let mut entity = match entity {
            Ok(entity) => entity,
            Err(e) => {
                tracing::warn!("Cannot build `{}` as {id}: {e}", spawn.object_id);
                return;
            }
        };
        entity.bind(id, spawn.owner);
        if spawn.owner == local {
            entity.mark_all_dirty();
        }
        self.insert_entity(entity);
    }

    fn handle_spawn_rejected(&mut self, from: PlayerId, object_id: ObjectId, reason: String) {
        if from != self.session.authority() {
            tracing::warn!(
                "Ignoring spawn rejection for `{object_id}` from {from}: not the authority"
            );
            return;
        }
        let Some(pending) = self.pending_local.remove(&object_id) else {
            return;
        };
        tracing::warn!("Spawn of `{object_id}` rejected by {from}: {reason}");
        self.rejected.push(RejectedSpawn {
            entity: pending.entity,
            reason,
        });
    }

    fn build_counterpart(&self, spawn: &SpawnRecord) -> Result<NetworkEntity, ReplicationError> {
        let prefab = spawn
            .prefab
            .as_deref()
            .ok_or_else(|| ReplicationError::MissingPrefab(spawn.object_id.clone()))?;
        let builder = self
            .entity_builder(spawn.object_id.clone())
            .disconnect_behaviour(spawn.disconnect_behaviour)
            .allow_ownership_transfer(spawn.allow_ownership_transfer);
        self.prefabs.build(prefab, builder)
    }

    fn buffer_unresolved(&mut self, from: PlayerId, id: NetworkId, records: Vec<Record>) {
        let queue = self.unresolved.entry(id).or_default();
        queue.push_back(Unresolved {
            from,
            records,
            age: 0,
        });
        if queue.len() > self.config.max_buffered_per_entity {
            queue.pop_front();
            tracing::warn!("Too many messages for unknown entity {id}; dropped the oldest");
        }
        tracing::debug!("Buffered message from {from} for unknown entity {id}");
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one sync pass now.
    pub fn tick(&mut self) -> TickStats {
        self.tick_at(Instant::now())
    }

    /// Run one sync pass as of `now`: apply inbound payloads, expire
    /// ownership requests and unresolved messages, then send one broadcast
    /// per entity with its dirty properties (by index) and queued events
    /// (FIFO).
    pub fn tick_at(&mut self, now: Instant) -> TickStats {
        let mut stats = TickStats::default();

        let inbound = self
            .inbound
            .as_mut()
            .map(InboundReceiver::drain)
            .unwrap_or_default();
        stats.inbound_messages = inbound.len();
        for message in inbound {
            self.on_message(message.from, message.entity, &message.payload);
        }

        self.announce_pending();
        stats.ownership_timeouts = self.expire_ownership_requests(now);
        stats.unresolved_dropped = self.expire_unresolved();

        if !self.session.is_connected() {
            return stats;
        }

        let mut outbound = Vec::new();
        for (id, entity) in &mut self.entities {
            let mut records: Vec<Record> = entity
                .collect_dirty_snapshot()
                .into_iter()
                .map(|(index, bytes)| Record::Property { index, bytes })
                .collect();
            stats.properties_sent += records.len();
            for (index, items) in entity.collect_pending_events() {
                stats.events_sent += items.len();
                records.extend(items.into_iter().map(|bytes| Record::Event { index, bytes }));
            }
            if !records.is_empty() {
                outbound.push((*id, records));
            }
        }
        for (id, records) in outbound {
            match self.send_records(Destination::Broadcast, id, &records) {
                Ok(()) => stats.messages_sent += 1,
                Err(e) => tracing::warn!("Sync for {id} not sent: {e}"),
            }
        }
        stats
    }

    fn expire_ownership_requests(&mut self, now: Instant) -> usize {
        let expired: Vec<u128> = self
            .ownership_requests
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(nonce, _)| *nonce)
            .collect();
        for nonce in &expired {
            if let Some(pending) = self.ownership_requests.get(nonce) {
                tracing::warn!(
                    "Ownership request for {} timed out waiting on {}",
                    pending.entity,
                    pending.target
                );
            }
            self.fail_ownership_request(*nonce);
        }
        expired.len()
    }

    fn expire_unresolved(&mut self) -> usize {
        let retry_ticks = self.config.unknown_entity_retry_ticks;
        let mut dropped = 0;
        self.unresolved.retain(|id, queue| {
            for message in queue.iter_mut() {
                message.age += 1;
            }
            while queue.front().is_some_and(|m| m.age > retry_ticks) {
                if let Some(message) = queue.pop_front() {
                    dropped += 1;
                    tracing::warn!(
                        "Dropping message from {} for unknown entity {id} after {retry_ticks} tick(s)",
                        message.from
                    );
                }
            }
            !queue.is_empty()
        });
        dropped
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Bind pending local entities: directly on the authority, otherwise by
    /// asking the authority once.
    fn announce_pending(&mut self) {
        if !self.session.is_connected() || self.pending_local.is_empty() {
            return;
        }
        let local = self.session.local_player_id();

        if self.session.is_authority() {
            for (_, pending) in std::mem::take(&mut self.pending_local) {
                let mut entity = pending.entity;
                let id = self.ids.allocate();
                entity.bind(id, local);
                entity.mark_all_dirty();
                let record = spawn_record(&entity);
                self.insert_entity(entity);
                if let Err(e) =
                    self.send_records(Destination::Broadcast, id, &[Record::Spawn(record)])
                {
                    tracing::warn!("Failed to announce {id}: {e}");
                }
            }
            return;
        }

        let authority = self.session.authority();
        let requests: Vec<(ObjectId, SpawnRecord)> = self
            .pending_local
            .iter()
            .filter(|(_, pending)| !pending.requested)
            .map(|(object_id, pending)| {
                let mut record = spawn_record(&pending.entity);
                record.owner = local;
                (object_id.clone(), record)
            })
            .collect();
        for (object_id, record) in requests {
            let sent = self.send_records(
                Destination::Peer(authority),
                NetworkId::INVALID,
                &[Record::SpawnRequest(record)],
            );
            match sent {
                Ok(()) => {
                    if let Some(pending) = self.pending_local.get_mut(&object_id) {
                        pending.requested = true;
                    }
                }
                Err(e) => tracing::warn!("Spawn request for `{object_id}` not sent: {e}"),
            }
        }
    }

    fn insert_entity(&mut self, entity: NetworkEntity) {
        let id = entity.id();
        self.ids.observe(id);
        tracing::info!(
            "Bound `{}` as {id}, owned by {}",
            entity.object_id(),
            entity.owner()
        );
        self.entities.insert(id, entity);

        if let Some(buffered) = self.unresolved.remove(&id) {
            for message in buffered {
                self.apply_records(message.from, id, message.records);
            }
        }
    }

    fn remove_entity(&mut self, id: NetworkId) -> Option<NetworkEntity> {
        let entity = self.entities.remove(&id)?;
        self.unresolved.remove(&id);
        let stranded: Vec<u128> = self
            .ownership_requests
            .iter()
            .filter(|(_, pending)| pending.entity == id)
            .map(|(nonce, _)| *nonce)
            .collect();
        for nonce in stranded {
            self.fail_ownership_request(nonce);
        }
        Some(entity)
    }

    fn fail_ownership_request(&mut self, nonce: u128) {
        let Some(pending) = self.ownership_requests.remove(&nonce) else {
            return;
        };
        if let Some(entity) = self.entities.get_mut(&pending.entity) {
            entity.clear_provisional_owner();
        }
        pending.resolve(false);
    }

    fn broadcast_despawn(&mut self, id: NetworkId) {
        if let Err(e) = self.send_records(Destination::Broadcast, id, &[Record::Despawn]) {
            tracing::warn!("Despawn of {id} not sent: {e}");
        }
    }

    fn send_ownership_response(
        &mut self,
        destination: Destination,
        id: NetworkId,
        nonce: u128,
        accepted: bool,
    ) {
        let owner = self
            .entities
            .get(&id)
            .map_or(PlayerId::NONE, NetworkEntity::owner);
        let response = [Record::OwnershipResponse {
            nonce,
            accepted,
            owner,
        }];
        if let Err(e) = self.send_records(destination, id, &response) {
            tracing::warn!("Ownership response for {id} not sent: {e}");
        }
    }

    fn send_records(
        &mut self,
        destination: Destination,
        id: NetworkId,
        records: &[Record],
    ) -> Result<(), ReplicationError> {
        let payload = encode_records(records)?;
        self.transport.send(destination, id, Bytes::from(payload))?;
        Ok(())
    }

    fn contains_object(&self, object_id: &ObjectId) -> bool {
        self.pending_local.contains_key(object_id)
            || self.entities.values().any(|e| e.object_id() == object_id)
    }

    /// Nonces are unique per session: the full local player id in the high
    /// 64 bits, a counter in the low 64.
    fn next_nonce(&mut self) -> u128 {
        let counter = self.next_nonce;
        self.next_nonce = self.next_nonce.wrapping_add(1);
        (u128::from(self.session.local_player_id().0) << 64) | u128::from(counter)
    }
}

fn spawn_record(entity: &NetworkEntity) -> SpawnRecord {
    SpawnRecord {
        object_id: entity.object_id().clone(),
        prefab: entity.prefab().map(str::to_owned),
        owner: entity.owner(),
        disconnect_behaviour: entity.disconnect_behaviour(),
        allow_ownership_transfer: entity.allows_ownership_transfer(),
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
