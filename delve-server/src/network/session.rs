//! Peer Session
//!
//! One participant's side of a co-op run: it mirrors the relay's roster
//! and master, applies delivered spawns and calls through the handler
//! registry, and advances its copy of the world once per tick. World
//! decisions (room entry, enemy batches) are taken only while this peer
//! is the master; per-entity decisions only for entities it owns.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::core::rng::derive_session_seed;
use crate::core::{secs_to_ticks, DeterministicRng, Quat, Vec3};
use crate::game::ai::{aim, facing, per_tick, step_towards};
use crate::game::boss::{summon_points, BossAttack, FIREBALL_LEAD};
use crate::game::door::DoorStatus;
use crate::game::effects::EffectEvent;
use crate::game::entity::{
    EnemyType, EntityId, EntityKind, EntityState, Faction, InitPayload, NetworkedEntity, PeerId,
    PlayerClass,
};
use crate::game::hazards::{plan_hazards, HazardEffect};
use crate::game::events::{GameEvent, GameEventData};
use crate::game::layout::{generate_layout, GridPos};
use crate::game::physics::{body_radius, circles_overlap, PhysicsQuery, Trigger};
use crate::game::room::RoomEntryAction;
use crate::game::skills::SkillSlot;
use crate::game::world::World;
use crate::network::authority::AuthorityResolver;
use crate::network::casting;
use crate::network::handlers::HandlerRegistry;
use crate::network::protocol::{
    Operation, Payload, PeerMessage, PeerProperties, RelayMessage, Target,
};
use crate::network::replication::{Invocation, ReplicationError, Replicator};

/// Upper bound on locally queued invocations run per flush.
const MAX_LOCAL_DISPATCH: usize = 10_000;

/// Owners stream moving transforms every this many ticks.
const TRANSFORM_SYNC_INTERVAL: u64 = 6;

/// Reach of a warrior's swing.
const MELEE_REACH: f32 = 2.5;

/// Projectiles start this far in front of the shooter.
pub(crate) const MUZZLE_OFFSET: f32 = 0.8;

/// Session errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No `Joined` received yet.
    #[error("Not joined to a room")]
    NotJoined,

    /// Only the master may do this.
    #[error("Only the master can start the game")]
    NotAuthority,

    /// Some peer is not ready.
    #[error("Players not ready")]
    PlayersNotReady,

    /// The layout was already generated.
    #[error("Game already started")]
    AlreadyStarted,
}

/// Input for the local player, consumed by the next tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerInput {
    /// Desired movement direction on the ground plane.
    pub movement: Vec3,
    /// Attack in this direction (one shot).
    pub attack: Option<Vec3>,
    /// Use a skill, aimed like the attack (one shot).
    pub skill: Option<SkillSlot>,
}

// =============================================================================
// SESSION CONTEXT
// =============================================================================

/// Everything a handler may touch.
pub struct SessionContext {
    /// Shared configuration.
    pub config: Arc<GameConfig>,
    /// Roster and master.
    pub authority: AuthorityResolver,
    /// Local copy of the world.
    pub world: World,
    /// Outgoing replication.
    pub replicator: Replicator,
    /// Authority randomness (spawner, boss).
    pub rng: DeterministicRng,
    /// Events since the last `take_events`.
    pub events: Vec<GameEvent>,
    /// Owned entities to destroy at the end of the tick.
    pub pending_destroy: Vec<EntityId>,
    /// Layout applied.
    pub started: bool,
}

impl SessionContext {
    fn new(config: Arc<GameConfig>) -> Self {
        Self {
            world: World::new(&config),
            authority: AuthorityResolver::new(),
            replicator: Replicator::new(PeerId::default()),
            rng: DeterministicRng::default(),
            events: Vec::new(),
            pending_destroy: Vec::new(),
            started: false,
            config,
        }
    }

    /// Local actor number.
    pub fn local(&self) -> PeerId {
        self.replicator.local()
    }

    /// Is the local peer the master?
    pub fn is_authority(&self) -> bool {
        self.authority.is_authority()
    }

    /// Record a local event.
    pub fn emit(&mut self, data: GameEventData) {
        self.events.push(GameEvent::new(self.world.now(), data));
    }

    /// Spawn an entity owned by the local peer. Failures are logged.
    pub fn spawn(
        &mut self,
        kind: EntityKind,
        position: Vec3,
        rotation: Quat,
        payload: Option<InitPayload>,
    ) -> Option<EntityId> {
        match self.replicator.spawn(&mut self.world, &self.config, kind, position, rotation, payload) {
            Ok(entity) => {
                let owner = self.local();
                self.emit(GameEventData::EntitySpawned { entity, kind, owner });
                Some(entity)
            }
            Err(err) => {
                warn!(%err, kind = kind.prefab_name(), "Spawn failed");
                None
            }
        }
    }

    /// Ask `target` to run `op` on `entity`.
    pub fn invoke(&mut self, target: Target, entity: EntityId, op: Operation) {
        self.replicator.invoke(target, entity, op);
    }

    /// Destroy an owned entity once the current tick's handlers ran.
    pub fn destroy_later(&mut self, entity: EntityId) {
        if !self.pending_destroy.contains(&entity) {
            self.pending_destroy.push(entity);
        }
    }

    /// Does the local peer own `entity`?
    pub fn is_owner(&self, entity: EntityId) -> bool {
        self.world.entity(entity).is_some_and(|e| e.owner == self.local())
    }
}

// =============================================================================
// PEER SESSION
// =============================================================================

/// One peer's session.
pub struct PeerSession {
    ctx: SessionContext,
    registry: HandlerRegistry,
    outgoing: Vec<PeerMessage>,
    room_id: Option<Uuid>,
    nickname: String,
    properties: PeerProperties,
    input: PlayerInput,
}

impl PeerSession {
    /// Create a session that has not joined yet.
    pub fn new(config: Arc<GameConfig>, nickname: impl Into<String>, properties: PeerProperties) -> Self {
        Self {
            ctx: SessionContext::new(config),
            registry: HandlerRegistry::default_registry(),
            outgoing: Vec::new(),
            room_id: None,
            nickname: nickname.into(),
            properties,
            input: PlayerInput::default(),
        }
    }

    /// Message asking the relay to join `room`.
    pub fn join_message(&self, room: &str) -> PeerMessage {
        PeerMessage::Join {
            room: room.to_string(),
            nickname: self.nickname.clone(),
            properties: self.properties.clone(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Local copy of the world.
    pub fn world(&self) -> &World {
        &self.ctx.world
    }

    /// Handler context.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    #[cfg(test)]
    pub(crate) fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.ctx
    }

    /// Local actor number, once joined.
    pub fn local_peer(&self) -> Option<PeerId> {
        self.ctx.authority.local()
    }

    /// Is this peer the master?
    pub fn is_authority(&self) -> bool {
        self.ctx.is_authority()
    }

    /// Roster and master.
    pub fn authority(&self) -> &AuthorityResolver {
        &self.ctx.authority
    }

    /// The local player's entity.
    pub fn local_player(&self) -> Option<EntityId> {
        self.local_peer().and_then(|peer| self.ctx.world.player_of(peer))
    }

    /// Has the layout been applied?
    pub fn is_started(&self) -> bool {
        self.ctx.started
    }

    /// Messages for the relay since the last call.
    pub fn drain_outgoing(&mut self) -> Vec<PeerMessage> {
        std::mem::take(&mut self.outgoing)
    }

    /// Events since the last call.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.ctx.events)
    }

    // =========================================================================
    // Lobby
    // =========================================================================

    /// Publish the ready flag.
    pub fn set_ready(&mut self, ready: bool) {
        self.properties.ready = ready;
        self.publish_properties();
    }

    /// Publish the chosen class.
    pub fn set_class(&mut self, class: PlayerClass) {
        self.properties.class = Some(class);
        self.publish_properties();
    }

    fn publish_properties(&mut self) {
        if let Some(local) = self.local_peer() {
            self.ctx.authority.set_properties(local, self.properties.clone());
            self.outgoing.push(PeerMessage::SetProperties { properties: self.properties.clone() });
        }
    }

    /// Generate and broadcast the dungeon. Master only, once, with every
    /// peer ready.
    pub fn start_game(&mut self) -> Result<(), SessionError> {
        let room_id = self.room_id.ok_or(SessionError::NotJoined)?;
        if !self.ctx.is_authority() {
            return Err(SessionError::NotAuthority);
        }
        if self.ctx.started || self.ctx.world.layout.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        if !self.ctx.authority.all_ready() {
            return Err(SessionError::PlayersNotReady);
        }

        let seed = derive_session_seed(room_id.as_bytes(), &self.ctx.authority.peer_ids());
        let mut rng = DeterministicRng::new(seed);
        let layout = generate_layout(&self.ctx.config.dungeon, &mut rng);
        self.ctx.rng = rng;

        let digest = layout.digest();
        info!(seed, rooms = layout.room_count(), "Starting game");

        self.ctx.invoke(Target::AllBuffered, EntityId::SCENE, Operation::ApplyLayout { layout, digest });
        self.flush();
        Ok(())
    }

    /// Leave the room.
    pub fn leave(&mut self) {
        self.outgoing.push(PeerMessage::Leave);
    }

    // =========================================================================
    // Local control
    // =========================================================================

    /// Input for the next tick.
    pub fn set_input(&mut self, input: PlayerInput) {
        self.input = input;
    }

    /// Move the local player and stream the transform.
    pub fn place_local_player(&mut self, position: Vec3) {
        let Some(id) = self.local_player() else {
            return;
        };
        if let Some(entity) = self.ctx.world.entity_mut(id) {
            entity.position = position;
            let rotation = entity.rotation;
            self.ctx.invoke(Target::Others, id, Operation::SyncTransform { position, rotation });
        }
        self.flush();
    }

    /// Invoke an operation from outside the tick (UI, tests).
    pub fn invoke(&mut self, target: Target, entity: EntityId, op: Operation) {
        self.ctx.invoke(target, entity, op);
        self.flush();
    }

    // =========================================================================
    // Relay messages
    // =========================================================================

    /// Apply a message from the relay.
    pub fn handle_relay(&mut self, msg: RelayMessage) {
        match msg {
            RelayMessage::Joined { you, room_id, master, peers } => {
                self.ctx.replicator = Replicator::new(you);
                self.ctx.replicator.set_master(Some(master));
                self.ctx.authority.on_joined(you, master, peers);
                self.room_id = Some(room_id);
                self.ctx.emit(GameEventData::AuthorityChanged { master, local: master == you });
            }

            RelayMessage::PeerJoined { peer } => {
                let joined = peer.id;
                self.ctx.authority.add_peer(peer);
                self.catch_up(joined);
            }

            RelayMessage::PeerLeft { peer } => {
                self.on_peer_left(peer);
            }

            RelayMessage::MasterSwitched { master } => {
                self.on_master_switched(master);
            }

            RelayMessage::PropertiesChanged { peer, properties } => {
                self.ctx.authority.set_properties(peer, properties);
            }

            RelayMessage::Deliver { sender, payload } => {
                self.apply_payload(sender, payload);
            }

            RelayMessage::Error { message } => {
                warn!(%message, "Relay error");
            }
        }

        self.flush();
    }

    fn apply_payload(&mut self, sender: PeerId, payload: Payload) {
        match payload {
            Payload::Spawn(request) => {
                if self.ctx.world.contains(request.entity) {
                    debug!(entity = %request.entity, "duplicate spawn ignored");
                    return;
                }
                let entity = NetworkedEntity::from_spawn(&request, &self.ctx.config, self.ctx.world.now());
                self.ctx.world.insert_entity(entity);
                self.ctx.emit(GameEventData::EntitySpawned {
                    entity: request.entity,
                    kind: request.kind,
                    owner: request.owner,
                });
            }

            Payload::Call(call) => {
                self.ctx.replicator.push_remote(Invocation::from_call(sender, call));
            }

            Payload::Destroy { entity } => {
                self.remove_local(entity);
            }
        }
    }

    fn remove_local(&mut self, entity: EntityId) {
        if self.ctx.world.remove_entity(entity).is_some() {
            self.ctx.emit(GameEventData::EntityDestroyed { entity });
        }
        for aura in self.ctx.world.effects.remove_target(entity) {
            self.ctx.destroy_later(aura);
        }
    }

    /// Send a late joiner the state that is not buffered on the relay:
    /// kill count and batches from the master, enemy stats, health and
    /// transforms from each owner.
    fn catch_up(&mut self, peer: PeerId) {
        if !self.ctx.started {
            return;
        }

        if self.ctx.is_authority() {
            let kills = self.ctx.world.kill_count;
            if kills > 0 {
                self.ctx.invoke(Target::Peer(peer), EntityId::SCENE, Operation::KillCountChanged { kills });
            }
            let snapshot = self.ctx.world.spawner.snapshot();
            if !snapshot.batches.is_empty() {
                self.ctx.invoke(Target::Peer(peer), EntityId::SCENE, Operation::BatchProgress(snapshot));
            }
        }

        let local = self.ctx.local();
        let mut calls = Vec::new();
        for entity in self.ctx.world.entities().filter(|e| e.owner == local) {
            let id = entity.id;
            match &entity.state {
                EntityState::Enemy(enemy) if enemy.initialized => {
                    calls.push((id, Operation::InitializeEnemy {
                        attributes: enemy.attributes,
                        minion: enemy.minion,
                        room: enemy.room,
                    }));
                }
                EntityState::Player(_) | EntityState::Enemy(_) | EntityState::Boss(_) => {}
                _ => continue,
            }
            calls.push((id, Operation::SyncTransform { position: entity.position, rotation: entity.rotation }));
            if let Some(vitals) = entity.vitals() {
                calls.push((id, Operation::HealthChanged {
                    current: vitals.current,
                    max: vitals.max,
                    shield: vitals.shield,
                }));
            }
            match &entity.state {
                EntityState::Player(player) if player.fallen => calls.push((id, Operation::Fallen)),
                EntityState::Enemy(enemy) if enemy.dead => calls.push((id, Operation::Defeated)),
                EntityState::Boss(boss) if boss.dead => calls.push((id, Operation::BossDefeated)),
                _ => {}
            }
        }

        debug!(%peer, calls = calls.len(), "Catching up late joiner");
        for (id, op) in calls {
            self.ctx.invoke(Target::Peer(peer), id, op);
        }
    }

    fn on_peer_left(&mut self, peer: PeerId) {
        let was_master = self.ctx.authority.master() == Some(peer);
        if self.ctx.authority.remove_peer(peer).is_some() {
            info!(%peer, "Peer left");
        }

        // Avatars and effects leave with their owner; enemies stay
        let owned = self.ctx.world.owned_by(peer);
        for id in owned {
            let Some(kind) = self.ctx.world.entity(id).map(|e| e.kind) else {
                continue;
            };
            if kind.is_room_owned() {
                if !was_master {
                    if let Some(master) = self.ctx.authority.master() {
                        if let Some(entity) = self.ctx.world.entity_mut(id) {
                            entity.owner = master;
                        }
                    }
                }
            } else {
                self.remove_local(id);
            }
        }

        if self.ctx.world.all_players_fallen() && !self.ctx.world.game_over {
            self.ctx.world.game_over = true;
            self.ctx.emit(GameEventData::GameOver);
        }
    }

    fn on_master_switched(&mut self, master: PeerId) {
        self.ctx.authority.set_master(master);
        self.ctx.replicator.set_master(Some(master));

        // Room-owned entities of departed peers move to the new master
        let orphans: Vec<EntityId> = self
            .ctx
            .world
            .entities()
            .filter(|e| e.kind.is_room_owned() && self.ctx.authority.peer(e.owner).is_none())
            .map(|e| e.id)
            .collect();
        for id in orphans {
            if let Some(entity) = self.ctx.world.entity_mut(id) {
                entity.owner = master;
            }
        }

        let local = self.local_peer() == Some(master);
        info!(%master, local, "Master switched");
        self.ctx.emit(GameEventData::AuthorityChanged { master, local });

        if local {
            self.rearm_authority();
        }
    }

    /// Resume authority-only processes on a newly elected master.
    fn rearm_authority(&mut self) {
        let now = self.ctx.world.now();
        let local = self.ctx.local();

        let snapshot = self.ctx.world.spawner.snapshot();
        for batch in &snapshot.batches {
            info!(room = ?batch.room, remaining = batch.remaining, traps = batch.hazards.len(), "Resuming room batch");
        }
        self.ctx.world.spawner.restore(snapshot, now);

        let despawn = secs_to_ticks(self.ctx.config.despawn_delay);
        let boss_despawn = secs_to_ticks(self.ctx.config.boss.despawn_delay);
        for id in self.ctx.world.owned_by(local) {
            let Some(entity) = self.ctx.world.entity_mut(id) else {
                continue;
            };
            match &mut entity.state {
                EntityState::Boss(boss) if boss.dead => {
                    if !boss.despawn.is_running() {
                        boss.despawn.start(boss_despawn);
                    }
                }
                EntityState::Boss(boss) => boss.rearm(now),
                EntityState::Enemy(enemy) if enemy.dead => {
                    if !enemy.despawn.is_running() {
                        enemy.despawn.start(despawn);
                    }
                }
                EntityState::Enemy(enemy) => enemy.target = None,
                _ => {}
            }
        }

        // Re-evaluate room entry for every player on the next tick
        self.ctx.world.player_rooms.clear();
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn flush(&mut self) {
        self.flush_local();
        self.collect_outbox();
    }

    fn flush_local(&mut self) {
        let mut dispatched = 0;
        while let Some(invocation) = self.ctx.replicator.pop_local() {
            #[cfg(feature = "debug-tracing")]
            trace!(entity = %invocation.entity, sender = %invocation.sender, op = ?invocation.op.code(), "dispatch");
            if let Err(err) = self.registry.dispatch(&mut self.ctx, &invocation) {
                log_dropped(&invocation, &err);
            }
            dispatched += 1;
            if dispatched >= MAX_LOCAL_DISPATCH {
                warn!(pending = self.ctx.replicator.pending(), "Local dispatch limit reached");
                break;
            }
        }
    }

    fn collect_outbox(&mut self) {
        for (target, payload) in self.ctx.replicator.take_outbox() {
            self.outgoing.push(PeerMessage::Send { target, payload });
        }
    }

    fn process_pending_destroys(&mut self) {
        while !self.ctx.pending_destroy.is_empty() {
            for id in std::mem::take(&mut self.ctx.pending_destroy) {
                if !self.ctx.is_owner(id) {
                    trace!(entity = %id, "not destroying unowned entity");
                    continue;
                }
                if self.ctx.replicator.destroy(&mut self.ctx.world, id).is_some() {
                    self.ctx.emit(GameEventData::EntityDestroyed { entity: id });
                }
                for aura in self.ctx.world.effects.remove_target(id) {
                    self.ctx.destroy_later(aura);
                }
            }
        }
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advance the session by one tick.
    pub fn tick(&mut self, physics: &dyn PhysicsQuery) {
        if !self.ctx.started {
            self.flush();
            return;
        }

        self.ctx.world.advance();

        self.step_local_player();
        self.step_doors(physics);
        if self.ctx.is_authority() {
            self.step_room_entry(physics);
            self.step_spawner();
        }
        self.step_enemies();
        self.step_bosses();
        self.step_projectiles(physics);
        self.step_meteors();
        self.step_pickups();
        self.step_hazards();
        casting::step_buffs(&mut self.ctx);
        self.step_effects();
        self.step_timers();

        self.flush_local();
        self.process_pending_destroys();
        self.flush();
    }

    fn step_local_player(&mut self) {
        let Some(id) = self.local_player() else {
            return;
        };
        let input = std::mem::take(&mut self.input);
        let now = self.ctx.world.now();

        let Some(entity) = self.ctx.world.entity_mut(id) else {
            return;
        };
        let Some(player) = entity.as_player() else {
            return;
        };
        if !player.can_act() {
            return;
        }
        let speed = player.speed();

        let movement = input.movement.flat();
        if movement.length_squared() > f32::EPSILON {
            let direction = movement.normalize();
            entity.position = entity.position + direction * per_tick(speed);
            entity.rotation = Quat::look_rotation(direction);
            if now % TRANSFORM_SYNC_INTERVAL == 0 {
                let (position, rotation) = (entity.position, entity.rotation);
                self.ctx.invoke(Target::Others, id, Operation::SyncTransform { position, rotation });
            }
        }

        if let Some(direction) = input.attack {
            self.player_attack(id, direction, now);
        }
        if let Some(slot) = input.skill {
            if let Err(err) = casting::cast(&mut self.ctx, id, slot, input.attack) {
                debug!(%err, "Skill refused");
            }
        }
    }

    fn player_attack(&mut self, id: EntityId, direction: Vec3, now: u64) {
        let Some(entity) = self.ctx.world.entity_mut(id) else {
            return;
        };
        let position = entity.position;
        let Some(player) = entity.as_player_mut() else {
            return;
        };
        if !player.attack.is_ready(now) {
            return;
        }
        player.attack.trigger(now, player.attack_period);
        let (class, damage) = (player.class, player.damage);

        let direction = direction.flat().normalize();
        let direction = if direction == Vec3::ZERO { entity.forward() } else { direction };

        match class {
            PlayerClass::Archer => {
                let payload = casting::arrow_payload(&self.ctx, id, direction, damage);
                self.ctx.spawn(
                    EntityKind::Projectile,
                    position + direction * MUZZLE_OFFSET,
                    Quat::look_rotation(direction),
                    Some(payload),
                );
            }
            PlayerClass::Warrior => {
                let targets: Vec<EntityId> = self
                    .ctx
                    .world
                    .entities()
                    .filter(|e| e.kind.faction() == Some(Faction::Monsters) && !e.is_down())
                    .filter(|e| circles_overlap(position, MELEE_REACH, e.position, body_radius(e.kind)))
                    .map(|e| e.id)
                    .collect();
                for target in targets {
                    self.ctx.invoke(Target::All, target, Operation::TakeDamage { amount: damage });
                }
            }
        }
    }

    fn step_doors(&mut self, physics: &dyn PhysicsQuery) {
        let timing = self.ctx.world.door_timing;
        let is_authority = self.ctx.is_authority();
        let doors: Vec<_> = self.ctx.world.doors.keys().copied().collect();

        for (room, dir) in doors {
            let locked = self.ctx.world.room(room).map_or(true, |r| r.locked);
            let occupants = if locked {
                Vec::new()
            } else {
                physics.overlaps(&self.ctx.world, Trigger::Door(room, dir))
            };

            let Some(door) = self.ctx.world.doors.get_mut(&(room, dir)) else {
                continue;
            };
            door.set_occupants(occupants);

            if door.tick(timing) == DoorStatus::Expired && is_authority {
                let players: Vec<EntityId> = door.occupants().iter().copied().collect();
                debug!(?room, door = ?dir, players = players.len(), "Door countdown expired");
                self.ctx.invoke(Target::All, EntityId::SCENE, Operation::Teleport { room, door: dir, players });
            }
        }
    }

    fn step_room_entry(&mut self, physics: &dyn PhysicsQuery) {
        let rooms: Vec<GridPos> = self.ctx.world.rooms.keys().copied().collect();
        let mut entered: Vec<GridPos> = Vec::new();

        for room in rooms {
            for player in physics.overlaps(&self.ctx.world, Trigger::Room(room)) {
                if self.ctx.world.player_rooms.get(&player) == Some(&room) {
                    continue;
                }
                self.ctx.world.player_rooms.insert(player, room);
                if !entered.contains(&room) {
                    entered.push(room);
                }
            }
        }

        for room in entered {
            self.enter_room(room);
        }
    }

    fn enter_room(&mut self, room: GridPos) {
        let Some(state) = self.ctx.world.room_mut(room) else {
            return;
        };
        let action = state.on_room_entered();
        debug!(?room, ?action, "Room entered");

        match action {
            RoomEntryAction::Unlock => {
                self.ctx.invoke(Target::All, EntityId::SCENE, Operation::UnlockDoors { room });
            }
            RoomEntryAction::Lock => {
                self.ctx.invoke(Target::All, EntityId::SCENE, Operation::LockDoors { room });
            }
            RoomEntryAction::StartBatch => {
                let now = self.ctx.world.now();
                let traps = plan_hazards(&self.ctx.config.hazards, &mut self.ctx.rng);
                let total = self.ctx.world.spawner.start_batch(room, now, traps);
                self.ctx.invoke(Target::AllBuffered, EntityId::SCENE, Operation::RoomActivated { room });

                let snapshot = self.ctx.world.spawner.snapshot();
                self.ctx.invoke(Target::Others, EntityId::SCENE, Operation::BatchProgress(snapshot));

                if total == 0 {
                    info!(?room, "Empty batch, clearing room");
                    self.ctx.invoke(Target::AllBuffered, EntityId::SCENE, Operation::RoomCleared { room });
                }
            }
            RoomEntryAction::SpawnBoss => {
                self.ctx.invoke(Target::AllBuffered, EntityId::SCENE, Operation::RoomActivated { room });
                self.ctx.invoke(Target::All, EntityId::SCENE, Operation::BossIntro { room });

                let center = self.ctx.world.geometry.room_center(room);
                if let Some(boss) = self.ctx.spawn(EntityKind::Boss, center, Quat::IDENTITY, None) {
                    info!(?room, %boss, "Boss spawned");
                }
            }
        }
    }

    fn step_spawner(&mut self) {
        let now = self.ctx.world.now();
        let mut changed = false;

        for room in self.ctx.world.spawner.rooms() {
            let center = self.ctx.world.geometry.room_center(room);
            let ctx = &mut self.ctx;

            if let Some(plan) = ctx.world.spawner.poll_spawn(room, now, center, &mut ctx.rng) {
                changed = true;
                let rotation = facing(plan.position, center).unwrap_or(Quat::IDENTITY);
                if let Some(enemy) = ctx.spawn(EntityKind::Enemy(plan.enemy_type), plan.position, rotation, None) {
                    ctx.invoke(
                        Target::All,
                        enemy,
                        Operation::InitializeEnemy { attributes: plan.attributes, minion: false, room: Some(room) },
                    );
                }
            }

            if let Some(trap) = ctx.world.spawner.poll_hazard(room, now) {
                changed = true;
                let position = (center + trap.offset).flat();
                if let Some(hazard) = ctx.spawn(EntityKind::Hazard(trap.kind), position, Quat::IDENTITY, None) {
                    debug!(?room, %hazard, kind = ?trap.kind, "Trap placed");
                }
            }
        }

        if changed {
            let snapshot = self.ctx.world.spawner.snapshot();
            self.ctx.invoke(Target::Others, EntityId::SCENE, Operation::BatchProgress(snapshot));
        }
    }

    fn step_enemies(&mut self) {
        let local = self.ctx.local();
        let now = self.ctx.world.now();

        for id in self.ctx.world.entity_ids() {
            let Some(entity) = self.ctx.world.entity(id) else {
                continue;
            };
            if entity.owner != local {
                continue;
            }
            let EntityState::Enemy(enemy) = &entity.state else {
                continue;
            };
            if enemy.dead {
                continue;
            }

            let position = entity.position;
            let attributes = enemy.attributes;
            let enemy_type = enemy.enemy_type;
            let Some((target, target_position)) = self.ctx.world.nearest_living_player(position) else {
                continue;
            };

            let next = step_towards(
                position,
                target_position,
                per_tick(attributes.movement_speed),
                attributes.attack_range * 0.8,
            );
            let in_range = next.distance_squared(target_position.flat()) <= attributes.attack_range.powi(2);

            let Some(entity) = self.ctx.world.entity_mut(id) else {
                continue;
            };
            let moved = next != entity.position;
            entity.position = next;
            if let Some(rotation) = facing(next, target_position) {
                entity.rotation = rotation;
            }
            let rotation = entity.rotation;

            let Some(enemy) = entity.as_enemy_mut() else {
                continue;
            };
            enemy.target = Some(target);

            let attack = in_range && enemy.attack.is_ready(now);
            if attack {
                let period = enemy.attack_period();
                enemy.attack.trigger(now, period);
            }

            if moved && now % TRANSFORM_SYNC_INTERVAL == 0 {
                self.ctx.invoke(Target::Others, id, Operation::SyncTransform { position: next, rotation });
            }

            if !attack {
                continue;
            }
            match enemy_type {
                EnemyType::Melee => {
                    self.ctx.invoke(
                        Target::All,
                        target,
                        Operation::TakeDamage { amount: attributes.attack_damage },
                    );
                }
                EnemyType::Ranged => {
                    let direction = aim(next, target_position);
                    let payload = InitPayload::projectile(direction, attributes.attack_damage, Some(id));
                    self.ctx.spawn(
                        EntityKind::Projectile,
                        next + direction * MUZZLE_OFFSET,
                        Quat::look_rotation(direction),
                        Some(payload),
                    );
                }
            }
        }
    }

    fn step_bosses(&mut self) {
        let local = self.ctx.local();
        let now = self.ctx.world.now();
        let config = Arc::clone(&self.ctx.config);
        let boss_config = &config.boss;

        for id in self.ctx.world.entity_ids() {
            let Some(entity) = self.ctx.world.entity(id) else {
                continue;
            };
            if entity.owner != local || !matches!(&entity.state, EntityState::Boss(b) if !b.dead) {
                continue;
            }
            let position = entity.position;
            let nearest = self.ctx.world.nearest_living_player(position).map(|p| p.0);

            // Resolve the target before borrowing the boss mutably
            let current_target = match &entity.state {
                EntityState::Boss(b) => b.target,
                _ => None,
            };
            let target_alive = |world: &World, target: Option<EntityId>| {
                target
                    .and_then(|t| world.entity(t))
                    .filter(|t| !t.is_down())
                    .map(|t| (t.id, t.position, t.forward()))
            };

            let Some(boss) = self.ctx.world.entity_mut(id).and_then(|e| e.as_boss_mut()) else {
                continue;
            };
            if boss.casting.is_running() {
                boss.casting.tick();
                continue;
            }
            let mut target = current_target;
            if boss.retarget.is_ready(now) {
                boss.retarget.trigger(now, secs_to_ticks(boss_config.target_check_interval));
                target = nearest;
                boss.target = nearest;
            }

            let Some((target, target_position, target_forward)) = target_alive(&self.ctx.world, target) else {
                continue;
            };

            let Some(boss) = self.ctx.world.entity_mut(id).and_then(|e| e.as_boss_mut()) else {
                continue;
            };
            let attack = boss.next_attack(now);
            if let Some(attack) = attack {
                boss.commit_attack(attack, now, boss_config);
            }
            let (damage, move_speed) = (boss.damage, boss.move_speed);

            match attack {
                Some(BossAttack::Fireball) => {
                    let lead = target_position + target_forward * FIREBALL_LEAD;
                    let direction = aim(position, lead);
                    let payload = InitPayload::projectile(direction, damage, Some(id));
                    debug!(%target, "Boss fireball");
                    self.ctx.spawn(
                        EntityKind::Projectile,
                        position + direction * (body_radius(EntityKind::Boss) + MUZZLE_OFFSET),
                        Quat::look_rotation(direction),
                        Some(payload),
                    );
                }
                Some(BossAttack::MeteorShower) => {
                    let seed = self.ctx.rng.next_u64();
                    debug!(%target, seed, "Boss meteor shower");
                    self.ctx.spawn(
                        EntityKind::MeteorShower,
                        target_position.flat(),
                        Quat::IDENTITY,
                        Some(InitPayload::seeded(seed)),
                    );
                }
                Some(BossAttack::Summon) => {
                    debug!(count = boss_config.minion_count, "Boss summons minions");
                    for point in summon_points(position, boss_config.summon_radius, boss_config.minion_count) {
                        let rotation = facing(point, target_position).unwrap_or(Quat::IDENTITY);
                        if let Some(minion) = self.ctx.spawn(EntityKind::Enemy(EnemyType::Melee), point, rotation, None) {
                            self.ctx.invoke(
                                Target::All,
                                minion,
                                Operation::InitializeEnemy { attributes: boss_config.minion, minion: true, room: None },
                            );
                        }
                    }
                }
                None => {
                    let stop_at = body_radius(EntityKind::Boss) + MELEE_REACH;
                    let next = step_towards(position, target_position, per_tick(move_speed), stop_at);
                    if let Some(entity) = self.ctx.world.entity_mut(id) {
                        entity.position = next;
                        if let Some(rotation) = facing(next, target_position) {
                            entity.rotation = rotation;
                        }
                        if now % TRANSFORM_SYNC_INTERVAL == 0 {
                            let rotation = entity.rotation;
                            self.ctx.invoke(Target::Others, id, Operation::SyncTransform { position: next, rotation });
                        }
                    }
                }
            }
        }
    }

    fn step_projectiles(&mut self, physics: &dyn PhysicsQuery) {
        let local = self.ctx.local();

        for id in self.ctx.world.entity_ids() {
            let Some(entity) = self.ctx.world.entity_mut(id) else {
                continue;
            };
            let owner = entity.owner;
            let EntityState::Projectile(projectile) = &mut entity.state else {
                continue;
            };
            if projectile.spent {
                continue;
            }

            let step = projectile.direction * per_tick(projectile.speed);
            let expired = projectile.lifetime.tick();
            entity.position = entity.position + step;

            if owner != local {
                continue;
            }
            if expired {
                self.ctx.destroy_later(id);
                continue;
            }

            self.projectile_hits(id, physics);
        }
    }

    fn projectile_hits(&mut self, id: EntityId, physics: &dyn PhysicsQuery) {
        let hits = physics.overlaps(&self.ctx.world, Trigger::Projectile(id));
        let Some(entity) = self.ctx.world.entity(id) else {
            return;
        };
        let Some(projectile) = entity.as_projectile() else {
            return;
        };
        let (position, shooter, faction) = (entity.position, projectile.shooter, projectile.faction);
        let (damage, effect) = (projectile.damage, projectile.effect);

        let victim = hits.into_iter().find(|&hit| {
            Some(hit) != shooter
                && self
                    .ctx
                    .world
                    .entity(hit)
                    .is_some_and(|e| faction.is_none() || e.kind.faction() != faction)
        });
        let Some(victim) = victim else {
            return;
        };

        if let Some(EntityState::Projectile(projectile)) = self.ctx.world.entity_mut(id).map(|e| &mut e.state) {
            projectile.spent = true;
        }

        trace!(projectile = %id, %victim, damage, "Projectile hit");
        self.ctx.invoke(Target::All, id, Operation::HitEffect { position });
        self.ctx.invoke(Target::All, victim, Operation::TakeDamage { amount: damage });
        if let Some(spec) = effect {
            self.ctx.invoke(Target::All, victim, Operation::ApplyStatusEffect(spec));
        }
        self.ctx.destroy_later(id);
    }

    fn step_meteors(&mut self) {
        let local = self.ctx.local();
        let config = Arc::clone(&self.ctx.config);

        for id in self.ctx.world.entity_ids() {
            let Some(entity) = self.ctx.world.entity_mut(id) else {
                continue;
            };
            let owner = entity.owner;
            let EntityState::Meteor(shower) = &mut entity.state else {
                continue;
            };
            let impacts = shower.tick();
            let finished = shower.is_finished();

            for impact in impacts {
                self.ctx.emit(GameEventData::MeteorImpact { position: impact.position });
                if owner != local {
                    continue;
                }
                let struck: Vec<EntityId> = self
                    .ctx
                    .world
                    .players()
                    .filter(|p| !p.is_down())
                    .filter(|p| {
                        circles_overlap(impact.position, config.boss.meteor_impact_radius, p.position, body_radius(p.kind))
                    })
                    .map(|p| p.id)
                    .collect();
                for player in struck {
                    self.ctx.invoke(Target::All, player, Operation::TakeDamage { amount: config.boss.meteor_damage });
                }
            }

            if finished && owner == local {
                self.ctx.destroy_later(id);
            }
        }
    }

    fn step_pickups(&mut self) {
        let local = self.ctx.local();
        let pickups = self.ctx.config.pickups;
        let owned: Vec<(EntityId, Vec3)> = self
            .ctx
            .world
            .entities()
            .filter(|e| e.owner == local && matches!(e.state, EntityState::Pickup))
            .map(|e| (e.id, e.position))
            .collect();

        for (id, position) in owned {
            let collector = self
                .ctx
                .world
                .players()
                .filter(|p| !p.is_down())
                .find(|p| circles_overlap(position, pickups.radius, p.position, body_radius(p.kind)))
                .map(|p| p.id);
            let Some(player) = collector else {
                continue;
            };
            debug!(pickup = %id, %player, "Health pickup collected");
            self.ctx.invoke(Target::All, player, Operation::Heal { amount: pickups.heal });
            self.ctx.destroy_later(id);
        }
    }

    fn step_hazards(&mut self) {
        let local = self.ctx.local();
        let now = self.ctx.world.now();
        let config = Arc::clone(&self.ctx.config);
        let hazards = &config.hazards;
        let check = secs_to_ticks(hazards.check_interval);

        for id in self.ctx.world.entity_ids() {
            let Some(entity) = self.ctx.world.entity_mut(id) else {
                continue;
            };
            if entity.owner != local {
                continue;
            }
            let position = entity.position;
            let EntityState::Hazard(hazard) = &mut entity.state else {
                continue;
            };
            if !hazard.check.is_ready(now) {
                continue;
            }
            hazard.check.trigger(now, check);
            let effect = hazard.kind.effect(hazards);

            let victims: Vec<EntityId> = self
                .ctx
                .world
                .players()
                .filter(|p| !p.is_down())
                .filter(|p| circles_overlap(position, hazards.radius, p.position, body_radius(p.kind)))
                .map(|p| p.id)
                .collect();
            for player in victims {
                let op = match effect {
                    HazardEffect::Status(spec) => Operation::ApplyStatusEffect(spec),
                    HazardEffect::Slow { multiplier, duration } => Operation::ApplySlow { multiplier, duration },
                };
                self.ctx.invoke(Target::All, player, op);
            }
        }
    }

    fn step_effects(&mut self) {
        let local = self.ctx.local();
        for event in self.ctx.world.effects.tick() {
            match event {
                EffectEvent::Damage { target, kind, amount } => {
                    trace!(%target, ?kind, amount, "Effect damage");
                    self.ctx.invoke(Target::Peer(local), target, Operation::TakeDamage { amount });
                }
                EffectEvent::Expired { target, kind, aura } => {
                    trace!(%target, ?kind, "Effect expired");
                    if let Some(aura) = aura {
                        self.ctx.destroy_later(aura);
                    }
                }
            }
        }
    }

    fn step_timers(&mut self) {
        let local = self.ctx.local();

        for id in self.ctx.world.entity_ids() {
            let parent_position = self
                .ctx
                .world
                .entity(id)
                .and_then(|e| e.parent)
                .and_then(|parent| self.ctx.world.entity(parent))
                .map(|parent| parent.position);

            let Some(entity) = self.ctx.world.entity_mut(id) else {
                continue;
            };
            if let Some(position) = parent_position {
                entity.position = position;
            }
            let owned = entity.owner == local;
            let mut slow_aura = None;

            let despawned = match &mut entity.state {
                EntityState::Player(player) => {
                    player.rising.tick();
                    if let Some(slow) = &mut player.slow {
                        if slow.timer.tick() {
                            slow_aura = slow.aura;
                            player.slow = None;
                        }
                    }
                    false
                }
                EntityState::Enemy(enemy) => enemy.despawn.tick(),
                EntityState::Boss(boss) => boss.despawn.tick(),
                _ => false,
            };

            if despawned && owned {
                self.ctx.destroy_later(id);
            }
            if let Some(aura) = slow_aura.filter(|_| owned) {
                self.ctx.destroy_later(aura);
            }
        }
    }
}

fn log_dropped(invocation: &Invocation, err: &ReplicationError) {
    match err {
        ReplicationError::NotOwner { .. } => {
            trace!(entity = %invocation.entity, op = ?invocation.op.code(), "discarded: {}", err);
        }
        ReplicationError::UnknownHandler { .. } | ReplicationError::StaleTarget(_) => {
            debug!(entity = %invocation.entity, sender = %invocation.sender, "dropped: {}", err);
        }
        _ => {
            warn!(entity = %invocation.entity, sender = %invocation.sender, "dropped: {}", err);
        }
    }
}
