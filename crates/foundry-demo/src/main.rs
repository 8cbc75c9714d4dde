//! Demo binary that runs a two-peer replication session in one process.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p foundry-demo` to watch a ball move between peers.
//! Run with `cargo run -p foundry-demo -- --tick-rate 60 --ticks 120` to override the cadence.

use std::time::Instant;

use clap::Parser;
use foundry_config::{CliArgs, Config};
use foundry_net::{LoopbackHub, LoopbackTransport};
use foundry_replication::{
    CodecRegistry, EventKey, EventSink, EventSource, NetworkComponent, NetworkId, NetworkManager,
    OwnershipTicket, PlayerId, PostcardCodec, PropertyKey, PropertySink, ReplicationConfig,
    ReplicationError, SelfDescribing, SharedCodec, TickSchedule,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const HOST: PlayerId = PlayerId(1);
const GUEST: PlayerId = PlayerId(2);
/// Frames per sync tick, standing in for a render loop that outpaces the sync rate.
const FRAMES_PER_TICK: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Position {
    x: f32,
    y: f32,
}

impl SelfDescribing for Position {
    fn codec() -> SharedCodec<Self> {
        PostcardCodec::shared()
    }
}

const POSITION: PropertyKey<Position> = PropertyKey::at(0);
const BOUNCES: PropertyKey<u32> = PropertyKey::at(1);
const BOUNCED: EventKey<String> = EventKey::at(0);

/// A ball with a position, a bounce counter and a bounce event.
struct Ball;

impl NetworkComponent for Ball {
    fn register_properties(
        &mut self,
        properties: &mut PropertySink<'_>,
        events: &mut EventSink<'_>,
    ) -> Result<(), ReplicationError> {
        properties.add_self_describing(Position { x: 0.0, y: 0.0 })?;
        properties.add(0u32)?;
        events.add::<String>()?;
        Ok(())
    }
}

type Peer = NetworkManager<LoopbackTransport>;

fn join(hub: &LoopbackHub, player: PlayerId, config: &Config) -> Peer {
    let (transport, inbound) = hub.join(player, config.network.inbound_queue_capacity);
    let mut peer = NetworkManager::new(
        ReplicationConfig::from(&config.network),
        transport,
        CodecRegistry::with_defaults(),
    );
    peer.attach_inbound(inbound);
    peer.prefabs_mut()
        .register("ball", |builder| builder.with_component(&mut Ball)?.build());
    peer
}

fn spawn_ball(host: &mut Peer) -> Result<NetworkId, ReplicationError> {
    let ball = host.instantiate("ball", "ball-1")?;
    host.spawn(ball)?
        .ok_or_else(|| ReplicationError::UnknownObject("ball-1".into()))
}

/// Move the ball one step, bouncing off the unit square.
fn step(peer: &mut Peer, id: NetworkId, velocity: &mut (f32, f32)) -> Result<(), ReplicationError> {
    let Some(ball) = peer.entity_mut(id) else {
        return Err(ReplicationError::UnknownEntity(id));
    };
    let mut position = *ball.property(POSITION)?.get();
    position.x += velocity.0;
    position.y += velocity.1;
    let mut bounced = None;
    if !(0.0..=1.0).contains(&position.x) {
        velocity.0 = -velocity.0;
        position.x = position.x.clamp(0.0, 1.0);
        bounced = Some("wall");
    }
    if !(0.0..=1.0).contains(&position.y) {
        velocity.1 = -velocity.1;
        position.y = position.y.clamp(0.0, 1.0);
        bounced = Some("floor");
    }
    ball.property_mut(POSITION)?.set(position);
    if let Some(surface) = bounced {
        let count = *ball.property(BOUNCES)?.get() + 1;
        ball.property_mut(BOUNCES)?.set(count);
        ball.event_mut(BOUNCED)?.invoke(surface.to_string());
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("foundry")
    });

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    foundry_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = run(&config, args.ticks).await {
        warn!("Demo session failed: {e}");
    }
}

async fn run(config: &Config, ticks: u32) -> Result<(), ReplicationError> {
    let hub = LoopbackHub::new();
    let mut host = join(&hub, HOST, config);
    let mut guest = join(&hub, GUEST, config);
    host.connect(HOST, std::iter::empty())?;
    guest.connect(GUEST, [HOST])?;
    host.on_peer_connected(GUEST);

    let id = spawn_ball(&mut host)?;
    info!("Host spawned the ball as {id}");

    // Ticks before the guest asks to take the ball over.
    let handover = ticks / 2;
    let mut velocity = (0.07, 0.045);
    let mut ticket: Option<OwnershipTicket> = None;

    let mut schedule = TickSchedule::new(host.config().tick_rate_hz);
    let mut frames = tokio::time::interval(schedule.interval() / FRAMES_PER_TICK);
    let mut last_frame = Instant::now();
    let mut tick = 0;

    while tick < ticks {
        frames.tick().await;
        let now = Instant::now();
        let due = schedule.accumulate(now - last_frame);
        last_frame = now;

        for _ in 0..due.min(ticks - tick) {
            if tick == handover {
                ticket = Some(guest.request_object_ownership(id));
            }
            if let Some(pending) = ticket.as_mut() {
                match pending.try_result() {
                    Some(true) => {
                        info!("Guest took ownership of {id} at tick {tick}");
                        watch_bounces(&mut host, id)?;
                        ticket = None;
                    }
                    Some(false) => {
                        warn!("Guest was denied ownership of {id}");
                        ticket = None;
                    }
                    None => {}
                }
            }
            if tick == 1 {
                watch_bounces(&mut guest, id)?;
            }

            for peer in [&mut host, &mut guest] {
                if peer.is_owner(id) {
                    step(peer, id, &mut velocity)?;
                }
            }

            let host_stats = host.tick();
            let guest_stats = guest.tick();
            tracing::debug!(?host_stats, ?guest_stats, "tick {tick}");
            tick += 1;
        }
    }
    info!("Ran {tick} sync tick(s)");

    for (name, peer) in [("host", &host), ("guest", &guest)] {
        if let Some(ball) = peer.entity(id) {
            let position = ball.property(POSITION)?.get();
            info!(
                "{name} sees {id} at ({:.2}, {:.2}) owned by {} after {} bounce(s)",
                position.x,
                position.y,
                ball.owner(),
                ball.property(BOUNCES)?.get()
            );
        }
    }
    Ok(())
}

fn watch_bounces(peer: &mut Peer, id: NetworkId) -> Result<(), ReplicationError> {
    let player = peer.local_player_id();
    let ball = peer
        .entity_mut(id)
        .ok_or(ReplicationError::UnknownEntity(id))?;
    ball.event_mut(BOUNCED)?
        .add_listener(move |source, surface| {
            if source == EventSource::Remote {
                info!("{player} heard the ball bounce off the {surface}");
            }
        });
    Ok(())
}
