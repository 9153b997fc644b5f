//! Delve Relay Server
//!
//! `delve-server` serves relay rooms over WebSockets.
//! `delve-server demo` runs a short in-process co-op session instead.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use delve::{
    core::hash::short_hex,
    game::{entity::PlayerClass, events::GameEventData, skills::unlocked_slots, PeerId},
    network::{protocol::PeerProperties, GameServer, PlayerInput, ServerConfig},
    save::SaveStore,
    GameConfig, Loopback, TICK_RATE, VERSION,
};

/// Ticks the demo runs for.
const DEMO_TICKS: u32 = 20 * TICK_RATE;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Delve v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);

    let config = GameConfig::from_env().context("loading game config")?;
    config.validate().context("validating game config")?;

    match std::env::args().nth(1).as_deref() {
        Some("demo") => demo(config),
        _ => {
            let server_config = ServerConfig::from_env().context("reading server config")?;
            let server = GameServer::new(server_config);
            server.run().await.context("relay server failed")
        }
    }
}

/// Two peers clear rooms together over an in-process relay.
fn demo(config: GameConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Session ===");

    let mut net = Loopback::new(config);
    let host = net.join("warrior", PeerProperties { class: Some(PlayerClass::Warrior), ready: true })?;
    let guest = net.join("archer", PeerProperties { class: Some(PlayerClass::Archer), ready: true })?;

    net.session_mut(host)
        .context("host session")?
        .start_game()
        .context("starting game")?;
    net.pump();

    if let Some(layout) = net.session(host).and_then(|s| s.world().layout.as_ref()) {
        info!("Layout: {} rooms, digest {}", layout.room_count(), short_hex(&layout.digest()));
    }

    for t in 0..DEMO_TICKS {
        steer_towards_exit(&mut net, host);
        if let Some(session) = net.session_mut(guest) {
            let aim = session
                .local_player()
                .and_then(|p| session.world().entity(p))
                .map(|p| p.forward());
            let skill = unlocked_slots(session.world().kill_count, &session.context().config.skills).pop();
            session.set_input(PlayerInput { movement: delve::core::Vec3::ZERO, attack: aim, skill });
        }
        net.tick();

        for peer in [host, guest] {
            let Some(session) = net.session_mut(peer) else {
                continue;
            };
            for event in session.take_events() {
                if peer != host {
                    continue;
                }
                match event.data {
                    GameEventData::Teleported { from, to, .. } => info!("Tick {}: teleported {:?} -> {:?}", t, from, to),
                    GameEventData::DoorsLocked { room } => info!("Tick {}: doors locked in {:?}", t, room),
                    GameEventData::RoomCleared { room } => info!("Tick {}: {:?} cleared", t, room),
                    GameEventData::KillCountChanged { kills } => info!("Tick {}: {} kills", t, kills),
                    GameEventData::SkillUnlocked { slot } => info!("Tick {}: {:?} unlocked", t, slot),
                    _ => {}
                }
            }
        }
    }

    info!("=== Demo Results ===");
    let mut kills = 0;
    for peer in net.peers() {
        if let Some(session) = net.session(peer) {
            let world = session.world();
            kills = world.kill_count;
            info!(
                "Peer {}: {} entities, {} kills, state {}",
                peer,
                world.entity_count(),
                world.kill_count,
                short_hex(&world.state_digest())
            );
        }
    }

    if let Ok(dir) = std::env::var("DELVE_SAVE_DIR") {
        let coins = SaveStore::new(dir).add_coins(u64::from(kills)).context("saving coins")?;
        info!("Coins: {}", coins);
    }

    Ok(())
}

/// Walk the peer's avatar towards the first open door of its room.
fn steer_towards_exit(net: &mut Loopback, peer: PeerId) {
    let Some(session) = net.session_mut(peer) else {
        return;
    };
    let world = session.world();
    let target = session
        .local_player()
        .and_then(|p| world.entity(p))
        .and_then(|player| {
            let room = world.room_at(player.position)?;
            let dir = world.layout.as_ref()?.cell(room)?.doors.iter().next()?;
            Some(world.geometry.door_position(room, dir) - player.position)
        });

    if let Some(movement) = target {
        session.set_input(PlayerInput { movement, ..Default::default() });
    }
}
