//! End-to-end replication between in-process peers over the loopback hub.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use foundry_net::{LoopbackHub, LoopbackTransport};
use foundry_replication::{
    CodecRegistry, DisconnectBehaviour, EventKey, EventSink, EventSource, NetworkComponent,
    NetworkId, NetworkManager, ObjectId, PlayerId, PropertyKey, PropertySink, ReplicationConfig,
    ReplicationError,
};

const SCORE: PropertyKey<i32> = PropertyKey::at(0);
const SHOUT: EventKey<String> = EventKey::at(0);

/// One `i32` property starting at 5 and one `String` event.
struct Scoreboard;

impl NetworkComponent for Scoreboard {
    fn register_properties(
        &mut self,
        properties: &mut PropertySink<'_>,
        events: &mut EventSink<'_>,
    ) -> Result<(), ReplicationError> {
        properties.add(5i32)?;
        events.add::<String>()?;
        Ok(())
    }
}

type Peer = NetworkManager<LoopbackTransport>;

fn join(hub: &LoopbackHub, player: u64) -> Peer {
    let config = ReplicationConfig::default();
    let (transport, inbound) = hub.join(PlayerId(player), 256);
    let mut peer = NetworkManager::new(config, transport, CodecRegistry::with_defaults());
    peer.attach_inbound(inbound);
    peer.prefabs_mut().register("scoreboard", |builder| {
        builder.with_component(&mut Scoreboard)?.build()
    });
    peer
}

/// Connect peers in the order given, each joining the ones before it.
fn session(players: &[u64]) -> (LoopbackHub, Vec<Peer>) {
    let hub = LoopbackHub::new();
    let mut peers: Vec<Peer> = players.iter().map(|p| join(&hub, *p)).collect();
    for (i, local) in players.iter().enumerate() {
        let earlier = players[..i].iter().map(|p| PlayerId(*p));
        peers[i].connect(PlayerId(*local), earlier).unwrap();
        for peer in &mut peers[..i] {
            peer.on_peer_connected(PlayerId(*local));
        }
    }
    (hub, peers)
}

fn spawn_scoreboard(peer: &mut Peer, object_id: &str) -> Option<NetworkId> {
    let entity = peer
        .entity_builder(object_id)
        .prefab("scoreboard")
        .with_component(&mut Scoreboard)
        .unwrap()
        .build()
        .unwrap();
    peer.spawn(entity).unwrap()
}

fn tick_all(peers: &mut [Peer]) {
    for peer in peers.iter_mut() {
        peer.tick();
    }
}

fn score(peer: &Peer, id: NetworkId) -> i32 {
    *peer.entity(id).unwrap().property(SCORE).unwrap().get()
}

fn record_shouts(peer: &mut Peer, id: NetworkId) -> Rc<RefCell<Vec<(EventSource, String)>>> {
    let heard = Rc::new(RefCell::new(Vec::new()));
    let h = Rc::clone(&heard);
    peer.entity_mut(id)
        .unwrap()
        .event_mut(SHOUT)
        .unwrap()
        .add_listener(move |source, value| h.borrow_mut().push((source, value.clone())));
    heard
}

#[test]
fn test_property_and_event_reach_peer() {
    let (_hub, mut peers) = session(&[1, 2]);
    let id = spawn_scoreboard(&mut peers[0], "board").unwrap();
    tick_all(&mut peers);
    assert_eq!(score(&peers[1], id), 5);
    let heard = record_shouts(&mut peers[1], id);

    let owner = peers[0].entity_mut(id).unwrap();
    owner.property_mut(SCORE).unwrap().set(7);
    owner.event_mut(SHOUT).unwrap().invoke("hi".into());

    let stats = peers[0].tick();
    assert_eq!(stats.messages_sent, 1);
    assert_eq!(stats.properties_sent, 1);
    assert_eq!(stats.events_sent, 1);

    let stats = peers[1].tick();
    assert_eq!(stats.inbound_messages, 1);
    assert_eq!(score(&peers[1], id), 7);
    assert_eq!(
        *heard.borrow(),
        vec![(EventSource::Remote, "hi".to_string())]
    );

    let replica = peers[1].entity_mut(id).unwrap();
    assert!(replica.event_mut(SHOUT).unwrap().drain_for_send().is_empty());
    assert_eq!(peers[1].tick().messages_sent, 0);
}

#[test]
fn test_event_overflow_delivers_last_five() {
    let (_hub, mut peers) = session(&[1, 2]);
    let id = spawn_scoreboard(&mut peers[0], "board").unwrap();
    tick_all(&mut peers);
    let heard = record_shouts(&mut peers[1], id);

    let shout = peers[0].entity_mut(id).unwrap().event_mut(SHOUT).unwrap();
    for i in 0..7 {
        shout.invoke(format!("shout {i}"));
    }
    assert_eq!(shout.dropped_count(), 2);
    tick_all(&mut peers);

    let received: Vec<String> = heard.borrow().iter().map(|(_, v)| v.clone()).collect();
    assert_eq!(
        received,
        vec!["shout 2", "shout 3", "shout 4", "shout 5", "shout 6"]
    );
}

#[test]
fn test_non_authority_spawn_round_trip() {
    let (_hub, mut peers) = session(&[1, 2]);
    assert_eq!(spawn_scoreboard(&mut peers[1], "late-board"), None);
    peers[1]
        .entity_by_object_mut(&ObjectId::new("late-board"))
        .unwrap()
        .property_mut(SCORE)
        .unwrap()
        .set(40);

    // Authority assigns the id, the requester binds and pushes its state.
    tick_all(&mut peers);
    tick_all(&mut peers);

    let id = peers[1]
        .entity_by_object(&ObjectId::new("late-board"))
        .unwrap()
        .id();
    assert!(id.is_valid());
    assert!(peers[1].is_owner(id));
    assert_eq!(peers[0].entity(id).unwrap().owner(), PlayerId(2));
    assert_eq!(score(&peers[0], id), 40);
}

#[test]
fn test_spawn_with_prefab_unknown_to_authority_is_rejected() {
    let (_hub, mut peers) = session(&[1, 2]);
    peers[1].prefabs_mut().register("lantern", |builder| {
        builder.with_component(&mut Scoreboard)?.build()
    });
    let lamp = peers[1].instantiate("lantern", "lamp").unwrap();
    assert_eq!(peers[1].spawn(lamp).unwrap(), None);

    tick_all(&mut peers);

    let rejected = peers[1].take_rejected_spawns();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].entity.object_id().as_str(), "lamp");
    assert!(rejected[0].reason.contains("lantern"));
    assert_eq!(peers[1].pending_count(), 0);
    assert_eq!(peers[0].entity_count(), 0);
}

#[test]
fn test_lower_id_late_joiner_spawns() {
    let hub = LoopbackHub::new();
    let mut two = join(&hub, 2);
    two.connect(PlayerId(2), std::iter::empty()).unwrap();
    assert_eq!(spawn_scoreboard(&mut two, "a"), Some(NetworkId(1)));

    // "b" is created offline and announced on connect, "c" after.
    let mut one = join(&hub, 1);
    assert_eq!(spawn_scoreboard(&mut one, "b"), None);
    one.connect(PlayerId(1), [PlayerId(2)]).unwrap();
    two.on_peer_connected(PlayerId(1));
    assert!(two.session().is_authority());
    assert!(!one.session().is_authority());
    assert_eq!(spawn_scoreboard(&mut one, "c"), None);

    let mut peers = [two, one];
    for _ in 0..3 {
        tick_all(&mut peers);
    }

    for peer in &peers {
        assert_eq!(peer.entity_count(), 3);
        assert_eq!(peer.pending_count(), 0);
        for (id, object_id, owner) in [(1, "a", 2), (2, "b", 1), (3, "c", 1)] {
            let entity = peer.entity(NetworkId(id)).unwrap();
            assert_eq!(entity.object_id().as_str(), object_id);
            assert_eq!(entity.owner(), PlayerId(owner));
        }
    }
    assert_eq!(score(&peers[0], NetworkId(2)), 5);
}

#[test]
fn test_ownership_transfer_is_agreed_by_all_peers() {
    let (_hub, mut peers) = session(&[1, 2, 3]);
    let id = spawn_scoreboard(&mut peers[0], "ball").unwrap();
    tick_all(&mut peers);

    let mut ticket = peers[1].request_object_ownership(id);
    assert_eq!(ticket.try_result(), None);
    assert_eq!(peers[1].entity(id).unwrap().effective_owner(), PlayerId(2));

    tick_all(&mut peers);
    assert_eq!(ticket.try_result(), Some(true));
    for peer in &peers {
        assert_eq!(peer.entity(id).unwrap().owner(), PlayerId(2));
    }
}

#[test]
fn test_concurrent_requests_have_one_winner() {
    let (_hub, mut peers) = session(&[1, 2, 3]);
    let id = spawn_scoreboard(&mut peers[0], "ball").unwrap();
    tick_all(&mut peers);

    let mut first = peers[1].request_object_ownership(id);
    let mut second = peers[2].request_object_ownership(id);
    // Owner decides both in arrival order.
    peers[0].tick();
    peers[1].tick();
    peers[2].tick();

    assert_eq!(first.try_result(), Some(true));
    assert_eq!(second.try_result(), Some(false));
    for peer in &peers {
        assert_eq!(peer.entity(id).unwrap().owner(), PlayerId(2));
    }
    assert!(!peers[2].entity(id).unwrap().is_provisional());
}

#[test]
fn test_transfer_disallowed_is_denied_locally() {
    let (_hub, mut peers) = session(&[1, 2]);
    let entity = peers[0]
        .entity_builder("statue")
        .prefab("scoreboard")
        .allow_ownership_transfer(false)
        .with_component(&mut Scoreboard)
        .unwrap()
        .build()
        .unwrap();
    let id = peers[0].spawn(entity).unwrap().unwrap();
    tick_all(&mut peers);
    assert!(!peers[1].entity(id).unwrap().allows_ownership_transfer());

    let mut ticket = peers[1].request_object_ownership(id);
    assert_eq!(ticket.try_result(), Some(false));
    assert_eq!(peers[0].tick().inbound_messages, 0);
}

#[test]
fn test_unanswered_request_times_out() {
    let (_hub, mut peers) = session(&[1, 2]);
    let id = spawn_scoreboard(&mut peers[0], "ball").unwrap();
    tick_all(&mut peers);

    let mut ticket = peers[1].request_object_ownership(id);
    let timeout = peers[1].config().ownership_timeout;
    let stats = peers[1].tick_at(Instant::now() + timeout + Duration::from_millis(10));
    assert_eq!(stats.ownership_timeouts, 1);
    assert_eq!(ticket.try_result(), Some(false));
    assert_eq!(peers[1].entity(id).unwrap().effective_owner(), PlayerId(1));
}

#[tokio::test]
async fn test_ownership_ticket_can_be_awaited() {
    let (_hub, mut peers) = session(&[1, 2]);
    let id = spawn_scoreboard(&mut peers[0], "ball").unwrap();
    tick_all(&mut peers);

    let ticket = peers[1].request_object_ownership(id);
    tick_all(&mut peers);
    assert!(ticket.await);
}

#[test]
fn test_owner_leaving_applies_disconnect_behaviour() {
    let (hub, mut peers) = session(&[1, 2, 3]);
    let kept = spawn_scoreboard(&mut peers[2], "kept");
    let doomed = peers[2]
        .entity_builder("doomed")
        .prefab("scoreboard")
        .disconnect_behaviour(DisconnectBehaviour::Destroy)
        .with_component(&mut Scoreboard)
        .unwrap()
        .build()
        .unwrap();
    peers[2].spawn(doomed).unwrap();
    assert_eq!(kept, None);
    tick_all(&mut peers);
    tick_all(&mut peers);
    assert_eq!(peers[0].entity_count(), 2);
    assert_eq!(peers[1].entity_count(), 2);

    let kept_id = peers[0]
        .entity_by_object(&ObjectId::new("kept"))
        .unwrap()
        .id();
    hub.leave(PlayerId(3));
    for peer in &mut peers[..2] {
        peer.on_peer_disconnected(PlayerId(3));
    }
    tick_all(&mut peers[..2]);

    for peer in &peers[..2] {
        assert_eq!(peer.entity_count(), 1);
        assert_eq!(peer.entity(kept_id).unwrap().owner(), PlayerId(1));
    }
}

#[test]
fn test_late_joiner_receives_current_state() {
    let hub = LoopbackHub::new();
    let mut first = join(&hub, 1);
    first.connect(PlayerId(1), std::iter::empty()).unwrap();
    let id = spawn_scoreboard(&mut first, "board").unwrap();
    first
        .entity_mut(id)
        .unwrap()
        .property_mut(SCORE)
        .unwrap()
        .set(12);
    first.tick();

    let mut second = join(&hub, 2);
    second.connect(PlayerId(2), [PlayerId(1)]).unwrap();
    first.on_peer_connected(PlayerId(2));
    second.tick();

    assert_eq!(score(&second, id), 12);
    assert_eq!(second.entity(id).unwrap().owner(), PlayerId(1));
}
