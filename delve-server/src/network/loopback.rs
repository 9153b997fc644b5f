//! In-Process Loopback
//!
//! Runs a relay room and several peer sessions in one process, delivering
//! every message synchronously. Used by the demo binary and by tests that
//! exercise the whole replication path without sockets.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::entity::PeerId;
use crate::game::physics::ProximityPhysics;
use crate::network::protocol::{PeerMessage, PeerProperties};
use crate::network::relay::{Outgoing, RelayError, RelayRoom};
use crate::network::session::PeerSession;

/// Rounds of message exchange before `pump` gives up.
const MAX_PUMP_ROUNDS: usize = 1_000;

/// A relay room and its peers in one process.
pub struct Loopback {
    config: Arc<GameConfig>,
    relay: RelayRoom,
    peers: BTreeMap<PeerId, PeerSession>,
    physics: ProximityPhysics,
}

impl Loopback {
    /// Empty room.
    pub fn new(config: GameConfig) -> Self {
        Self::with_room_id(config, Uuid::new_v4())
    }

    /// Empty room with a fixed id (the id feeds the session seed).
    pub fn with_room_id(config: GameConfig, room_id: Uuid) -> Self {
        let physics = ProximityPhysics::from_config(&config);
        let max_peers = config.max_peers as usize;
        Self {
            config: Arc::new(config),
            relay: RelayRoom::with_id(room_id, "loopback", max_peers),
            peers: BTreeMap::new(),
            physics,
        }
    }

    /// Connect a new peer.
    pub fn join(&mut self, nickname: &str, properties: PeerProperties) -> Result<PeerId, RelayError> {
        let session = PeerSession::new(Arc::clone(&self.config), nickname, properties.clone());
        let (peer, out) = self.relay.join(nickname, properties)?;
        self.peers.insert(peer, session);
        self.deliver(out);
        self.pump();
        Ok(peer)
    }

    /// Disconnect a peer.
    pub fn leave(&mut self, peer: PeerId) {
        self.peers.remove(&peer);
        match self.relay.leave(peer) {
            Ok(out) => self.deliver(out),
            Err(err) => warn!(%peer, %err, "leave failed"),
        }
        self.pump();
    }

    /// Peers in actor order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Session of a peer.
    pub fn session(&self, peer: PeerId) -> Option<&PeerSession> {
        self.peers.get(&peer)
    }

    /// Mutable session of a peer. Call `pump` after driving it.
    pub fn session_mut(&mut self, peer: PeerId) -> Option<&mut PeerSession> {
        self.peers.get_mut(&peer)
    }

    /// The relay room.
    pub fn relay(&self) -> &RelayRoom {
        &self.relay
    }

    /// Tick every session once, then exchange messages.
    pub fn tick(&mut self) {
        for session in self.peers.values_mut() {
            session.tick(&self.physics);
        }
        self.pump();
    }

    /// Tick `ticks` times.
    pub fn run(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Exchange messages until every outbox is empty.
    pub fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let batches: Vec<(PeerId, Vec<PeerMessage>)> = self
                .peers
                .iter_mut()
                .map(|(&peer, session)| (peer, session.drain_outgoing()))
                .filter(|(_, msgs)| !msgs.is_empty())
                .collect();
            if batches.is_empty() {
                return;
            }

            for (peer, messages) in batches {
                for msg in messages {
                    self.route(peer, msg);
                }
            }
        }
        warn!("Loopback pump did not settle");
    }

    fn route(&mut self, peer: PeerId, msg: PeerMessage) {
        let result = match msg {
            PeerMessage::Join { .. } => {
                debug!(%peer, "already joined");
                return;
            }
            PeerMessage::SetProperties { properties } => self.relay.set_properties(peer, properties),
            PeerMessage::Send { target, payload } => self.relay.route(peer, target, payload),
            PeerMessage::Leave => {
                self.peers.remove(&peer);
                self.relay.leave(peer)
            }
        };

        match result {
            Ok(out) => self.deliver(out),
            Err(err) => debug!(%peer, %err, "relay rejected message"),
        }
    }

    fn deliver(&mut self, out: Outgoing) {
        for (peer, msg) in out {
            if let Some(session) = self.peers.get_mut(&peer) {
                session.handle_relay(msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HazardTypeConfig;
    use crate::core::{secs_to_ticks, Vec3};
    use crate::game::entity::{EntityId, EntityKind, EntityState, PlayerClass};
    use crate::game::events::GameEventData;
    use crate::game::hazards::HazardKind;
    use crate::game::layout::{GridPos, RoomKind};
    use crate::game::skills::{BuffKind, SkillSlot};
    use crate::network::protocol::{Operation, Target};
    use crate::network::session::PlayerInput;

    /// Ticks a room may take to clear before a test gives up.
    const CLEAR_TIMEOUT: u32 = 60 * 60;

    fn props(class: PlayerClass) -> PeerProperties {
        PeerProperties { class: Some(class), ready: true }
    }

    fn started(classes: &[PlayerClass]) -> (Loopback, Vec<PeerId>) {
        started_with(GameConfig::default(), classes)
    }

    fn started_with(config: GameConfig, classes: &[PlayerClass]) -> (Loopback, Vec<PeerId>) {
        let mut net = Loopback::with_room_id(config, Uuid::from_u128(7));
        let peers: Vec<PeerId> = classes.iter().map(|&c| net.join("p", props(c)).unwrap()).collect();
        net.session_mut(peers[0]).unwrap().start_game().unwrap();
        net.pump();
        (net, peers)
    }

    fn normal_rooms(net: &Loopback, peer: PeerId) -> Vec<GridPos> {
        let layout = net.session(peer).unwrap().world().layout.as_ref().unwrap();
        layout.rooms().filter(|(_, r)| r.kind == RoomKind::Normal).map(|(pos, _)| pos).collect()
    }

    fn enter(net: &mut Loopback, peer: PeerId, room: GridPos) {
        let session = net.session_mut(peer).unwrap();
        let center = session.world().geometry.room_center(room);
        session.place_local_player(center);
        net.pump();
    }

    fn living_enemies(net: &Loopback, peer: PeerId, room: GridPos) -> Vec<EntityId> {
        net.session(peer)
            .unwrap()
            .world()
            .entities()
            .filter(|e| matches!(&e.state, EntityState::Enemy(enemy) if !enemy.dead && enemy.room == Some(room)))
            .map(|e| e.id)
            .collect()
    }

    fn strike(net: &mut Loopback, by: PeerId, target: EntityId, amount: f32) {
        net.session_mut(by)
            .unwrap()
            .invoke(Target::All, target, Operation::TakeDamage { amount });
        net.pump();
    }

    /// Kill every enemy of `room` as it spawns until the room clears.
    fn clear_room(net: &mut Loopback, by: PeerId, room: GridPos) -> bool {
        for _ in 0..CLEAR_TIMEOUT {
            for enemy in living_enemies(net, by, room) {
                strike(net, by, enemy, 1.0e6);
            }
            if net.session(by).unwrap().world().room(room).is_some_and(|r| r.cleared) {
                return true;
            }
            net.tick();
        }
        false
    }

    fn player_state(net: &Loopback, peer: PeerId, player: EntityId) -> crate::game::entity::PlayerState {
        net.session(peer).unwrap().world().entity(player).and_then(|e| e.as_player()).cloned().unwrap()
    }

    #[test]
    fn test_layout_identical_on_every_peer() {
        let (net, peers) = started(&[PlayerClass::Warrior, PlayerClass::Archer, PlayerClass::Warrior]);

        let digests: Vec<_> = peers
            .iter()
            .map(|&p| net.session(p).unwrap().world().layout.as_ref().map(|l| l.digest()))
            .collect();
        assert!(digests[0].is_some());
        assert!(digests.iter().all(|d| *d == digests[0]));

        for &p in &peers {
            let world = net.session(p).unwrap().world();
            assert_eq!(world.players().count(), 3);
            assert!(world.layout.as_ref().unwrap().find_kind(RoomKind::Boss).is_some());
        }
    }

    #[test]
    fn test_late_joiner_receives_buffered_state() {
        let (mut net, peers) = started(&[PlayerClass::Warrior]);
        let late = net.join("late", props(PlayerClass::Archer)).unwrap();

        let session = net.session(late).unwrap();
        assert!(session.is_started());
        assert_eq!(session.world().players().count(), 2);
        assert_eq!(
            session.world().layout.as_ref().map(|l| l.digest()),
            net.session(peers[0]).unwrap().world().layout.as_ref().map(|l| l.digest())
        );
        // The host sees the late joiner's avatar
        assert!(net.session(peers[0]).unwrap().world().player_of(late).is_some());
    }

    #[test]
    fn test_projectile_spawns_on_every_peer() {
        let (mut net, peers) = started(&[PlayerClass::Warrior, PlayerClass::Archer]);
        let archer = peers[1];

        net.session_mut(archer)
            .unwrap()
            .set_input(PlayerInput { attack: Some(Vec3::FORWARD), ..Default::default() });
        net.tick();

        let projectiles = |net: &Loopback, peer: PeerId| {
            net.session(peer)
                .unwrap()
                .world()
                .entities()
                .filter(|e| e.kind == EntityKind::Projectile)
                .map(|e| (e.id, e.owner, e.position))
                .collect::<Vec<_>>()
        };
        let on_host = projectiles(&net, peers[0]);
        let on_archer = projectiles(&net, archer);
        assert_eq!(on_host.len(), 1);
        assert_eq!(on_host[0].1, archer);
        assert_eq!(on_host[0].0, on_archer[0].0);

        // Both peers advance the projectile by themselves
        net.tick();
        let moved = projectiles(&net, peers[0]);
        assert!(moved[0].2.z > on_host[0].2.z);
    }

    #[test]
    fn test_damage_resolved_by_owner_only() {
        let (mut net, peers) = started(&[PlayerClass::Warrior, PlayerClass::Archer]);
        let (host, guest) = (peers[0], peers[1]);
        let guest_player = net.session(guest).unwrap().local_player().unwrap();
        let health = |net: &Loopback, peer: PeerId| {
            net.session(peer).unwrap().world().entity(guest_player).and_then(|e| e.vitals()).map(|v| v.current)
        };
        let full = health(&net, guest).unwrap();

        // Addressed to a peer that does not own the avatar: discarded
        net.session_mut(host)
            .unwrap()
            .invoke(Target::Peer(host), guest_player, Operation::TakeDamage { amount: 10.0 });
        net.pump();
        assert_eq!(health(&net, guest), Some(full));
        assert_eq!(health(&net, host), Some(full));

        // Addressed to everyone: the owner resolves it and mirrors the result
        net.session_mut(host)
            .unwrap()
            .invoke(Target::All, guest_player, Operation::TakeDamage { amount: 10.0 });
        net.pump();
        let after = health(&net, guest).unwrap();
        assert!(after < full);
        assert_eq!(health(&net, host), Some(after));
    }

    #[test]
    fn test_master_leaves_and_next_peer_takes_over() {
        let (mut net, peers) = started(&[PlayerClass::Warrior, PlayerClass::Archer, PlayerClass::Warrior]);
        let (host, next) = (peers[0], peers[1]);
        let host_player = net.session(host).unwrap().local_player().unwrap();
        net.session_mut(next).unwrap().take_events();

        net.leave(host);

        let session = net.session_mut(next).unwrap();
        assert!(session.is_authority());
        assert!(session.world().entity(host_player).is_none());
        assert!(session
            .take_events()
            .iter()
            .any(|e| matches!(e.data, GameEventData::AuthorityChanged { local: true, .. })));
        assert!(!net.session(peers[2]).unwrap().is_authority());
        assert_eq!(net.relay().master(), Some(next));

        // The world keeps running under the new master
        net.run(5);
        assert_eq!(net.session(next).unwrap().world().players().count(), 2);
    }

    #[test]
    fn test_door_teleports_player() {
        let (mut net, peers) = started(&[PlayerClass::Warrior]);
        let host = peers[0];

        let (spawn_room, dir, neighbor, door_at, single) = {
            let world = net.session(host).unwrap().world();
            let layout = world.layout.as_ref().unwrap();
            let spawn_room = layout.spawn_room();
            let dir = layout.cell(spawn_room).unwrap().doors.iter().next().unwrap();
            let neighbor = layout.neighbor(spawn_room, dir).unwrap();
            (spawn_room, dir, neighbor, world.geometry.door_position(spawn_room, dir), world.door_timing.single)
        };

        net.session_mut(host).unwrap().place_local_player(door_at);
        net.pump();
        net.run(single + 10);

        let session = net.session_mut(host).unwrap();
        let player = session.local_player().unwrap();
        let position = session.world().entity(player).unwrap().position;
        assert_eq!(session.world().room_at(position), Some(neighbor));
        assert!(session
            .take_events()
            .iter()
            .any(|e| matches!(e.data, GameEventData::Teleported { from, to, .. } if from == spawn_room && to == neighbor)));
    }

    #[test]
    fn test_rooms_clear_independently() {
        let (mut net, peers) = started(&[PlayerClass::Warrior, PlayerClass::Archer]);
        let (host, guest) = (peers[0], peers[1]);
        let rooms = normal_rooms(&net, host);
        assert!(rooms.len() >= 2);
        let (first, second) = (rooms[0], rooms[1]);

        enter(&mut net, host, first);
        enter(&mut net, guest, second);
        net.tick();
        for &peer in &peers {
            let spawner = &net.session(peer).unwrap().world().spawner;
            assert!(spawner.is_active(first));
            assert!(spawner.is_active(second));
        }

        assert!(clear_room(&mut net, host, first));
        for &peer in &peers {
            let world = net.session(peer).unwrap().world();
            assert!(world.room(first).is_some_and(|r| r.cleared && !r.locked));
            assert!(world.room(second).is_some_and(|r| !r.cleared && r.locked));
            assert!(world.spawner.is_active(second));
        }

        assert!(clear_room(&mut net, host, second));
        assert!(net.session(guest).unwrap().world().room(second).is_some_and(|r| r.cleared && !r.locked));
    }

    #[test]
    fn test_room_flow_unlocks_revives_and_unlocks_skills() {
        let mut config = GameConfig::default();
        config.skills.dash = 2;
        let (mut net, peers) = started_with(config, &[PlayerClass::Warrior, PlayerClass::Archer]);
        let (host, guest) = (peers[0], peers[1]);
        let room = normal_rooms(&net, host)[0];

        enter(&mut net, host, room);
        enter(&mut net, guest, room);
        net.tick();
        for &peer in &peers {
            assert!(net.session(peer).unwrap().world().room(room).is_some_and(|r| r.locked));
        }

        let guest_player = net.session(guest).unwrap().local_player().unwrap();
        strike(&mut net, host, guest_player, 1.0e6);
        assert!(player_state(&net, host, guest_player).fallen);

        assert!(clear_room(&mut net, host, room));
        net.tick();

        let kills = net.session(host).unwrap().world().kill_count;
        assert!(kills >= 2);
        for &peer in &peers {
            let session = net.session_mut(peer).unwrap();
            assert_eq!(session.world().kill_count, kills);
            assert!(session.world().room(room).is_some_and(|r| r.cleared && !r.locked));
            assert!(!session.world().spawner.is_active(room));
            let events = session.take_events();
            assert!(events.iter().any(|e| matches!(e.data, GameEventData::RoomCleared { room: r } if r == room)));
            assert!(events
                .iter()
                .any(|e| matches!(e.data, GameEventData::SkillUnlocked { slot: SkillSlot::Dash })));
            assert!(!player_state(&net, peer, guest_player).fallen);
        }
    }

    #[test]
    fn test_new_master_finishes_batch() {
        let (mut net, peers) = started(&[PlayerClass::Warrior, PlayerClass::Archer]);
        let (host, guest) = (peers[0], peers[1]);
        let room = normal_rooms(&net, host)[0];

        enter(&mut net, host, room);
        enter(&mut net, guest, room);
        net.tick();
        assert_eq!(living_enemies(&net, guest, room).len(), 1);

        net.leave(host);
        let session = net.session(guest).unwrap();
        assert!(session.is_authority());
        assert!(session.world().spawner.is_active(room));
        let local = session.local_peer().unwrap();
        for enemy in living_enemies(&net, guest, room) {
            assert_eq!(net.session(guest).unwrap().world().entity(enemy).map(|e| e.owner), Some(local));
        }

        assert!(clear_room(&mut net, guest, room));
        let world = net.session(guest).unwrap().world();
        assert!(!world.spawner.is_active(room));
        assert!(world.room(room).is_some_and(|r| !r.locked));
    }

    #[test]
    fn test_late_joiner_catches_up_on_unbuffered_state() {
        let mut config = GameConfig::default();
        config.spawner.spawn_interval = 0.5;
        let (mut net, peers) = started_with(config, &[PlayerClass::Warrior]);
        let host = peers[0];
        let room = normal_rooms(&net, host)[0];

        enter(&mut net, host, room);
        net.tick();
        let wounded = living_enemies(&net, host, room)[0];
        strike(&mut net, host, wounded, 5.0);

        // Kill the next spawn so the kill count moves
        for _ in 0..CLEAR_TIMEOUT {
            if living_enemies(&net, host, room).len() > 1 {
                break;
            }
            net.tick();
        }
        let victim = living_enemies(&net, host, room).into_iter().find(|&e| e != wounded).unwrap();
        strike(&mut net, host, victim, 1.0e6);

        let late = net.join("late", props(PlayerClass::Archer)).unwrap();

        let host_world = net.session(host).unwrap().world();
        let late_world = net.session(late).unwrap().world();
        assert!(host_world.kill_count >= 1);
        assert_eq!(late_world.kill_count, host_world.kill_count);
        assert_eq!(late_world.spawner.snapshot(), host_world.spawner.snapshot());

        let on_host = host_world.entity(wounded).unwrap();
        let on_late = late_world.entity(wounded).unwrap();
        match (&on_host.state, &on_late.state) {
            (EntityState::Enemy(expected), EntityState::Enemy(mirrored)) => {
                assert!(mirrored.initialized);
                assert_eq!(mirrored.attributes, expected.attributes);
                assert_eq!(mirrored.room, Some(room));
                assert_eq!(mirrored.vitals.current, expected.vitals.current);
                assert!(mirrored.vitals.current < mirrored.vitals.max);
            }
            _ => panic!("wounded entity is not an enemy"),
        }
        assert_eq!(on_late.position, on_host.position);
        assert!(late_world.entity(victim).map_or(true, |e| e.is_down()));

        let host_player = net.session(host).unwrap().local_player().unwrap();
        assert_eq!(
            late_world.entity(host_player).and_then(|e| e.vitals()).map(|v| v.current),
            host_world.entity(host_player).and_then(|e| e.vitals()).map(|v| v.current)
        );
    }

    #[test]
    fn test_health_pickup_heals_collector() {
        let mut config = GameConfig::default();
        config.pickups.drop_chance = 1.0;
        config.hazards.types = Vec::new();
        let heal = config.pickups.heal;
        let (mut net, peers) = started_with(config, &[PlayerClass::Warrior]);
        let host = peers[0];
        let room = normal_rooms(&net, host)[0];

        enter(&mut net, host, room);
        net.tick();
        let enemy = living_enemies(&net, host, room)[0];
        strike(&mut net, host, enemy, 1.0e6);

        let pickup = net
            .session(host)
            .unwrap()
            .world()
            .entities()
            .find(|e| e.kind == EntityKind::HealthPickup)
            .map(|e| (e.id, e.position));
        let (pickup, at) = pickup.unwrap();

        let player = net.session(host).unwrap().local_player().unwrap();
        strike(&mut net, host, player, 40.0);
        let wounded = player_state(&net, host, player).vitals.current;

        net.session_mut(host).unwrap().place_local_player(at);
        net.tick();

        let healed = player_state(&net, host, player).vitals.current;
        assert!(healed > wounded);
        assert!(healed <= wounded + heal);
        assert!(net.session(host).unwrap().world().entity(pickup).is_none());
    }

    #[test]
    fn test_swamp_slows_until_player_leaves() {
        let mut config = GameConfig::default();
        config.hazards.types = vec![HazardTypeConfig { kind: HazardKind::Swamp, amount: 1 }];
        config.hazards.spawn_points = vec![Vec3::ZERO];
        let linger = secs_to_ticks(config.hazards.slow_linger);
        let multiplier = config.hazards.slow_multiplier;
        let (mut net, peers) = started_with(config, &[PlayerClass::Archer]);
        let host = peers[0];
        let room = normal_rooms(&net, host)[0];
        let player = net.session(host).unwrap().local_player().unwrap();

        enter(&mut net, host, room);
        net.run(2);

        let world = net.session(host).unwrap().world();
        assert!(world.entities().any(|e| e.kind == EntityKind::Hazard(HazardKind::Swamp)));
        let slow = player_state(&net, host, player).slow.unwrap();
        assert_eq!(slow.multiplier, multiplier);
        let aura = slow.aura.unwrap();
        assert_eq!(world.entity(aura).map(|e| e.kind), Some(EntityKind::SlowAura));

        let spawn_room = world.layout.as_ref().unwrap().spawn_room();
        enter(&mut net, host, spawn_room);
        net.run(linger + 2);

        assert!(player_state(&net, host, player).slow.is_none());
        assert!(net.session(host).unwrap().world().entity(aura).is_none());
    }

    #[test]
    fn test_skill_cast_replicates_buff_aura() {
        let mut config = GameConfig::default();
        config.skills.dash = 0;
        let (mut net, peers) = started_with(config, &[PlayerClass::Warrior, PlayerClass::Archer]);
        let (host, guest) = (peers[0], peers[1]);
        let guest_player = net.session(guest).unwrap().local_player().unwrap();
        let base_speed = player_state(&net, guest, guest_player).speed();
        net.session_mut(host).unwrap().take_events();

        net.session_mut(guest)
            .unwrap()
            .set_input(PlayerInput { skill: Some(SkillSlot::Dash), ..Default::default() });
        net.tick();

        let state = player_state(&net, guest, guest_player);
        assert!(state.buffs.is_active(BuffKind::Haste));
        assert!(state.speed() > base_speed);
        assert!(state.vitals.shield > 0.0);
        // Barrier shows up in the host's mirror
        assert_eq!(player_state(&net, host, guest_player).vitals.shield, state.vitals.shield);

        let session = net.session_mut(host).unwrap();
        assert!(session
            .take_events()
            .iter()
            .any(|e| matches!(e.data, GameEventData::SkillActivated { player, slot: SkillSlot::Dash } if player == guest_player)));
        let auras = session
            .world()
            .entities()
            .filter(|e| matches!(e.kind, EntityKind::BuffAura(_)) && e.parent == Some(guest_player))
            .count();
        assert_eq!(auras, 2);
    }
}
