//! Networked Entities
//!
//! Identifiers, kinds and per-kind state of everything the replication
//! channel creates. Every peer builds an entity from the same
//! [`SpawnRequest`] with [`NetworkedEntity::from_spawn`], so anything
//! carried in the init payload is known everywhere without a further
//! message.

use std::fmt;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::config::{EnemyAttributes, GameConfig};
use crate::core::{secs_to_ticks, Cooldown, Quat, Timer, Vec3};
use crate::game::boss::{BossState, MeteorShower};
use crate::game::effects::{EffectSpec, SlowState, StatusEffectKind};
use crate::game::hazards::{HazardKind, HazardState};
use crate::game::layout::GridPos;
use crate::game::skills::{BuffKind, Buffs, SkillCooldowns};
use crate::game::vitals::Vitals;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Actor number assigned by the relay. Starts at 1, never reused in a room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Network-unique entity id: `creator * 1000 + sequence`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// The shared scene object (dungeon, rooms, doors).
    pub const SCENE: Self = Self(0);

    /// Ids available to one peer.
    pub const PER_PEER: u32 = 1000;

    /// Is this the scene object?
    #[inline]
    pub fn is_scene(self) -> bool {
        self == Self::SCENE
    }

    /// Peer that allocated the id.
    pub fn creator(self) -> Option<PeerId> {
        match self.0 / Self::PER_PEER {
            0 => None,
            actor => Some(PeerId(actor)),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Per-peer id allocator. Skips ids still in use after wrapping.
#[derive(Clone, Debug)]
pub struct EntityIdAllocator {
    actor: PeerId,
    next: u32,
}

impl EntityIdAllocator {
    /// Allocator for a peer.
    pub fn new(actor: PeerId) -> Self {
        Self { actor, next: 1 }
    }

    /// Next free id, or `None` when all 999 are live (or the actor
    /// number is too large to encode).
    pub fn allocate(&mut self, in_use: impl Fn(EntityId) -> bool) -> Option<EntityId> {
        let base = self.actor.0.checked_mul(EntityId::PER_PEER)?;
        base.checked_add(EntityId::PER_PEER - 1)?;

        for _ in 1..EntityId::PER_PEER {
            let sequence = self.next;
            self.next = if self.next + 1 >= EntityId::PER_PEER { 1 } else { self.next + 1 };

            let id = EntityId(base + sequence);
            if !in_use(id) {
                return Some(id);
            }
        }
        None
    }
}

// =============================================================================
// KINDS
// =============================================================================

/// Playable class, chosen in the lobby.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerClass {
    /// Melee, higher health.
    Warrior,
    /// Ranged, fires arrows.
    Archer,
}

/// Enemy archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnemyType {
    /// Chases and strikes.
    Melee,
    /// Keeps distance and shoots.
    Ranged,
}

/// What a spawn request creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Player avatar.
    Player(PlayerClass),
    /// Enemy (batch or minion).
    Enemy(EnemyType),
    /// The boss.
    Boss,
    /// Arrow or fireball.
    Projectile,
    /// Boss meteor shower.
    MeteorShower,
    /// Visual aura of a status effect.
    Aura(StatusEffectKind),
    /// Visual aura of a buff.
    BuffAura(BuffKind),
    /// Visual aura of a slow.
    SlowAura,
    /// Heals the first player to touch it.
    HealthPickup,
    /// Room trap.
    Hazard(HazardKind),
}

/// Handler-registry grouping of entity kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    /// The scene object.
    Scene,
    /// Players.
    Player,
    /// Enemies and minions.
    Enemy,
    /// The boss.
    Boss,
    /// Projectiles.
    Projectile,
    /// Meteor showers and auras.
    Effect,
    /// Health pickups.
    Pickup,
    /// Room traps.
    Hazard,
}

/// Side of a fight; projectiles skip their own side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Faction {
    /// Players.
    Heroes,
    /// Enemies and the boss.
    Monsters,
}

impl EntityKind {
    /// Registry class.
    pub fn class(self) -> EntityClass {
        match self {
            EntityKind::Player(_) => EntityClass::Player,
            EntityKind::Enemy(_) => EntityClass::Enemy,
            EntityKind::Boss => EntityClass::Boss,
            EntityKind::Projectile => EntityClass::Projectile,
            EntityKind::MeteorShower
            | EntityKind::Aura(_)
            | EntityKind::BuffAura(_)
            | EntityKind::SlowAura => EntityClass::Effect,
            EntityKind::HealthPickup => EntityClass::Pickup,
            EntityKind::Hazard(_) => EntityClass::Hazard,
        }
    }

    /// Entities that belong to the session rather than to their creator.
    /// They move to the new authority when the old one leaves.
    pub fn is_room_owned(self) -> bool {
        matches!(
            self,
            EntityKind::Enemy(_) | EntityKind::Boss | EntityKind::HealthPickup | EntityKind::Hazard(_)
        )
    }

    /// Faction, for damage dealers and targets.
    pub fn faction(self) -> Option<Faction> {
        match self {
            EntityKind::Player(_) => Some(Faction::Heroes),
            EntityKind::Enemy(_) | EntityKind::Boss => Some(Faction::Monsters),
            _ => None,
        }
    }

    /// Resource-style name, for logs.
    pub fn prefab_name(self) -> &'static str {
        match self {
            EntityKind::Player(PlayerClass::Warrior) => "Players/Warrior",
            EntityKind::Player(PlayerClass::Archer) => "Players/Archer",
            EntityKind::Enemy(EnemyType::Melee) => "Enemies/Melee",
            EntityKind::Enemy(EnemyType::Ranged) => "Enemies/Ranged",
            EntityKind::Boss => "Boss/RedDragon",
            EntityKind::Projectile => "Projectiles/Projectile",
            EntityKind::MeteorShower => "Boss/MeteorShower",
            EntityKind::Aura(_) => "Effects/Aura",
            EntityKind::BuffAura(_) => "Effects/Buff",
            EntityKind::SlowAura => "Effects/SlowEffect",
            EntityKind::HealthPickup => "Pickups/HealthPickup",
            EntityKind::Hazard(HazardKind::AcidPuddle) => "Traps/AcidPuddle",
            EntityKind::Hazard(HazardKind::Swamp) => "Traps/Swamp",
        }
    }
}

// =============================================================================
// SPAWN REQUEST AND PAYLOAD
// =============================================================================

/// Creation parameters fixed at spawn time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    /// Flight direction.
    pub direction: Vec3,
    /// Damage on hit.
    pub damage: f32,
    /// Effect applied on hit.
    pub effect: StatusEffectKind,
    /// Entity that fired it.
    pub owner_entity: Option<EntityId>,
    /// Effect damage per tick.
    pub damage_per_tick: f32,
    /// Effect duration in seconds.
    pub effect_duration: f32,
    /// Seconds between effect ticks.
    pub tick_interval: f32,
    /// Seed for effects with local randomness.
    pub seed: Option<u64>,
}

impl InitPayload {
    /// Projectile payload.
    pub fn projectile(direction: Vec3, damage: f32, owner_entity: Option<EntityId>) -> Self {
        Self {
            direction,
            damage,
            owner_entity,
            ..Default::default()
        }
    }

    /// Builder: attach a damage-over-time effect.
    pub fn with_effect(mut self, spec: EffectSpec) -> Self {
        self.effect = spec.kind;
        self.damage_per_tick = spec.damage_per_tick;
        self.effect_duration = spec.duration;
        self.tick_interval = spec.tick_interval;
        self
    }

    /// Payload carrying only a seed.
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed), ..Default::default() }
    }

    /// Effect to apply on hit, if any.
    pub fn effect_spec(&self) -> Option<EffectSpec> {
        match self.effect {
            StatusEffectKind::None => None,
            kind => Some(EffectSpec {
                kind,
                damage_per_tick: self.damage_per_tick,
                duration: self.effect_duration,
                tick_interval: self.tick_interval,
            }),
        }
    }
}

/// A spawn as it travels over the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// Allocated by the creator.
    pub entity: EntityId,
    /// What to create.
    pub kind: EntityKind,
    /// World position.
    pub position: Vec3,
    /// World rotation.
    pub rotation: Quat,
    /// Creating peer.
    pub owner: PeerId,
    /// Init payload; `None` means catalog defaults.
    pub payload: Option<InitPayload>,
}

// =============================================================================
// PER-KIND STATE
// =============================================================================

/// Player avatar state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Class.
    pub class: PlayerClass,
    /// Health pool.
    pub vitals: Vitals,
    /// Speed without slows.
    pub base_speed: f32,
    /// Damage per attack.
    pub damage: f32,
    /// Ticks between attacks.
    pub attack_period: u32,
    /// Next attack.
    pub attack: Cooldown,
    /// Health reached zero; spectating until revived.
    pub fallen: bool,
    /// Running while a revived player stands up.
    pub rising: Timer,
    /// Active slow.
    pub slow: Option<SlowState>,
    /// Class damage reduction, restored when a guard ends.
    pub base_damage_reduction: f32,
    /// Running buffs (owner only).
    pub buffs: Buffs,
    /// Per-slot skill cooldowns (owner only).
    pub skills: SkillCooldowns,
}

impl PlayerState {
    /// Fresh player with class stats.
    pub fn new(class: PlayerClass, config: &GameConfig) -> Self {
        let stats = config.classes.stats(class);
        let attack_period = if stats.attack_speed > 0.0 {
            secs_to_ticks(1.0 / stats.attack_speed)
        } else {
            0
        };
        Self {
            class,
            vitals: Vitals::new(stats.health).with_damage_reduction(stats.damage_reduction),
            base_speed: stats.speed,
            damage: stats.damage,
            attack_period,
            attack: Cooldown::default(),
            fallen: false,
            rising: Timer::idle(),
            slow: None,
            base_damage_reduction: stats.damage_reduction,
            buffs: Buffs::default(),
            skills: SkillCooldowns::default(),
        }
    }

    /// Current movement speed.
    pub fn speed(&self) -> f32 {
        let slow = self.slow.map_or(1.0, |s| s.multiplier);
        let haste = self.buffs.magnitude(BuffKind::Haste).unwrap_or(1.0);
        self.base_speed * slow * haste
    }

    /// May the player move and attack?
    pub fn can_act(&self) -> bool {
        !self.fallen && !self.rising.is_running()
    }
}

/// Enemy state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnemyState {
    /// Archetype.
    pub enemy_type: EnemyType,
    /// Health pool.
    pub vitals: Vitals,
    /// Current attributes.
    pub attributes: EnemyAttributes,
    /// `InitializeEnemy` received?
    pub initialized: bool,
    /// Summoned by the boss (not part of a room batch).
    pub minion: bool,
    /// Room whose batch this enemy belongs to.
    pub room: Option<GridPos>,
    /// Next attack.
    pub attack: Cooldown,
    /// Player being chased.
    pub target: Option<EntityId>,
    /// Defeated?
    pub dead: bool,
    /// Runs after defeat; the owner destroys the enemy when it fires.
    pub despawn: Timer,
}

impl EnemyState {
    /// Catalog defaults for a type, used until `InitializeEnemy` arrives.
    pub fn new(enemy_type: EnemyType, config: &GameConfig) -> Self {
        let attributes = config
            .spawner
            .types
            .iter()
            .find(|t| t.enemy_type == enemy_type)
            .map(|t| t.attributes)
            .unwrap_or(config.boss.minion);
        Self {
            enemy_type,
            vitals: Vitals::new(attributes.max_health),
            attributes,
            initialized: false,
            minion: false,
            room: None,
            attack: Cooldown::default(),
            target: None,
            dead: false,
            despawn: Timer::idle(),
        }
    }

    /// Apply replicated attributes (full health).
    pub fn initialize(&mut self, attributes: EnemyAttributes, minion: bool, room: Option<GridPos>) {
        self.attributes = attributes;
        self.vitals = Vitals::new(attributes.max_health);
        self.minion = minion;
        self.room = room;
        self.initialized = true;
    }

    /// Ticks between attacks.
    pub fn attack_period(&self) -> u32 {
        secs_to_ticks(self.attributes.attack_rate)
    }
}

/// Projectile flight state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectileState {
    /// Unit flight direction.
    pub direction: Vec3,
    /// Units per second.
    pub speed: f32,
    /// Damage on hit.
    pub damage: f32,
    /// Effect applied on hit.
    pub effect: Option<EffectSpec>,
    /// Entity that fired it.
    pub shooter: Option<EntityId>,
    /// Side of the shooter, resolved when inserted into the world.
    pub faction: Option<Faction>,
    /// Owner destroys the projectile when this fires.
    pub lifetime: Timer,
    /// Already hit something.
    pub spent: bool,
}

/// State carried by each entity kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntityState {
    /// Player avatar.
    Player(PlayerState),
    /// Enemy or minion.
    Enemy(EnemyState),
    /// The boss.
    Boss(Box<BossState>),
    /// Projectile.
    Projectile(ProjectileState),
    /// Meteor shower.
    Meteor(MeteorShower),
    /// Status, buff or slow aura; purely visual.
    Aura,
    /// Health pickup.
    Pickup,
    /// Room trap.
    Hazard(HazardState),
}

// =============================================================================
// NETWORKED ENTITY
// =============================================================================

/// An entity as every peer holds it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkedEntity {
    /// Network id.
    pub id: EntityId,
    /// Kind.
    pub kind: EntityKind,
    /// Peer whose computations are authoritative for this entity.
    pub owner: PeerId,
    /// World position (local to `parent` when parented).
    pub position: Vec3,
    /// World rotation.
    pub rotation: Quat,
    /// Payload it was created with.
    pub payload: Option<InitPayload>,
    /// Entity this one follows.
    pub parent: Option<EntityId>,
    /// Scale relative to the parent.
    pub local_scale: Vec3,
    /// Kind-specific state.
    pub state: EntityState,
}

impl NetworkedEntity {
    /// Build and self-configure an entity from its spawn request.
    ///
    /// A missing payload falls back to configured defaults.
    pub fn from_spawn(request: &SpawnRequest, config: &GameConfig, now: u64) -> Self {
        let mut rotation = request.rotation;

        let state = match request.kind {
            EntityKind::Player(class) => EntityState::Player(PlayerState::new(class, config)),
            EntityKind::Enemy(enemy_type) => EntityState::Enemy(EnemyState::new(enemy_type, config)),
            EntityKind::Boss => EntityState::Boss(Box::new(BossState::new(&config.boss, now))),
            EntityKind::Projectile => {
                let projectile = match &request.payload {
                    Some(payload) => {
                        let direction = payload.direction.normalize();
                        rotation = Quat::look_rotation(direction);
                        ProjectileState {
                            direction,
                            speed: config.projectile.speed,
                            damage: payload.damage,
                            effect: payload.effect_spec(),
                            shooter: payload.owner_entity,
                            faction: None,
                            lifetime: Timer::started(secs_to_ticks(config.projectile.lifetime)),
                            spent: false,
                        }
                    }
                    None => {
                        debug!(entity = %request.entity, "projectile without payload, using defaults");
                        let yaw = rotation.yaw();
                        ProjectileState {
                            direction: Vec3::new(yaw.sin(), 0.0, yaw.cos()),
                            speed: config.projectile.speed,
                            damage: config.projectile.default_damage,
                            effect: None,
                            shooter: None,
                            faction: None,
                            lifetime: Timer::started(secs_to_ticks(config.projectile.lifetime)),
                            spent: false,
                        }
                    }
                };
                EntityState::Projectile(projectile)
            }
            EntityKind::MeteorShower => {
                let seed = request.payload.and_then(|p| p.seed).unwrap_or_else(|| {
                    debug!(entity = %request.entity, "meteor shower without seed");
                    0
                });
                EntityState::Meteor(MeteorShower::new(seed, request.position, &config.boss))
            }
            EntityKind::Aura(_) | EntityKind::BuffAura(_) | EntityKind::SlowAura => EntityState::Aura,
            EntityKind::HealthPickup => EntityState::Pickup,
            EntityKind::Hazard(kind) => EntityState::Hazard(HazardState::new(kind, now)),
        };

        Self {
            id: request.entity,
            kind: request.kind,
            owner: request.owner,
            position: request.position,
            rotation,
            payload: request.payload,
            parent: None,
            local_scale: Vec3::ONE,
            state,
        }
    }

    /// Vitals of a damageable entity.
    pub fn vitals(&self) -> Option<&Vitals> {
        match &self.state {
            EntityState::Player(p) => Some(&p.vitals),
            EntityState::Enemy(e) => Some(&e.vitals),
            EntityState::Boss(b) => Some(&b.vitals),
            _ => None,
        }
    }

    /// Mutable vitals of a damageable entity.
    pub fn vitals_mut(&mut self) -> Option<&mut Vitals> {
        match &mut self.state {
            EntityState::Player(p) => Some(&mut p.vitals),
            EntityState::Enemy(e) => Some(&mut e.vitals),
            EntityState::Boss(b) => Some(&mut b.vitals),
            _ => None,
        }
    }

    /// Fallen player, defeated enemy or dead boss.
    pub fn is_down(&self) -> bool {
        match &self.state {
            EntityState::Player(p) => p.fallen,
            EntityState::Enemy(e) => e.dead,
            EntityState::Boss(b) => b.dead,
            _ => false,
        }
    }

    /// Player state, if this is a player.
    pub fn as_player(&self) -> Option<&PlayerState> {
        match &self.state {
            EntityState::Player(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable player state.
    pub fn as_player_mut(&mut self) -> Option<&mut PlayerState> {
        match &mut self.state {
            EntityState::Player(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable enemy state.
    pub fn as_enemy_mut(&mut self) -> Option<&mut EnemyState> {
        match &mut self.state {
            EntityState::Enemy(e) => Some(e),
            _ => None,
        }
    }

    /// Mutable boss state.
    pub fn as_boss_mut(&mut self) -> Option<&mut BossState> {
        match &mut self.state {
            EntityState::Boss(b) => Some(b),
            _ => None,
        }
    }

    /// Projectile state, if this is a projectile.
    pub fn as_projectile(&self) -> Option<&ProjectileState> {
        match &self.state {
            EntityState::Projectile(p) => Some(p),
            _ => None,
        }
    }

    /// Horizontal forward vector from the rotation.
    pub fn forward(&self) -> Vec3 {
        let yaw = self.rotation.yaw();
        Vec3::new(yaw.sin(), 0.0, yaw.cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(kind: EntityKind, payload: Option<InitPayload>) -> NetworkedEntity {
        let request = SpawnRequest {
            entity: EntityId(2001),
            kind,
            position: Vec3::new(1.0, 0.0, 2.0),
            rotation: Quat::IDENTITY,
            owner: PeerId(2),
            payload,
        };
        NetworkedEntity::from_spawn(&request, &GameConfig::default(), 0)
    }

    #[test]
    fn test_entity_id_creator() {
        assert_eq!(EntityId(3007).creator(), Some(PeerId(3)));
        assert_eq!(EntityId::SCENE.creator(), None);
        assert!(EntityId::SCENE.is_scene());
    }

    #[test]
    fn test_allocator_skips_live_ids() {
        let mut alloc = EntityIdAllocator::new(PeerId(2));
        assert_eq!(alloc.allocate(|_| false), Some(EntityId(2001)));
        assert_eq!(alloc.allocate(|id| id == EntityId(2002)), Some(EntityId(2003)));
    }

    #[test]
    fn test_allocator_exhaustion() {
        let mut alloc = EntityIdAllocator::new(PeerId(2));
        assert_eq!(alloc.allocate(|_| true), None);

        let mut huge = EntityIdAllocator::new(PeerId(u32::MAX));
        assert_eq!(huge.allocate(|_| false), None);
    }

    #[test]
    fn test_projectile_reads_payload() {
        let payload = InitPayload::projectile(Vec3::new(1.0, 0.0, 0.0), 10.0, Some(EntityId(7)));
        let entity = spawn(EntityKind::Projectile, Some(payload));

        let projectile = entity.as_projectile().unwrap();
        assert_eq!(projectile.direction, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(projectile.damage, 10.0);
        assert_eq!(projectile.shooter, Some(EntityId(7)));
        assert_eq!(projectile.effect, None);
    }

    #[test]
    fn test_projectile_defaults_without_payload() {
        let entity = spawn(EntityKind::Projectile, None);
        let projectile = entity.as_projectile().unwrap();
        assert_eq!(projectile.damage, GameConfig::default().projectile.default_damage);
        assert!((projectile.direction.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_payload_effect_spec() {
        let spec = EffectSpec {
            kind: StatusEffectKind::Poison,
            damage_per_tick: 2.0,
            duration: 4.0,
            tick_interval: 1.0,
        };
        let payload = InitPayload::projectile(Vec3::FORWARD, 5.0, None).with_effect(spec);
        assert_eq!(payload.effect_spec(), Some(spec));
        assert_eq!(InitPayload::default().effect_spec(), None);
    }

    #[test]
    fn test_player_uses_class_stats() {
        let entity = spawn(EntityKind::Player(PlayerClass::Warrior), None);
        let player = entity.as_player().unwrap();
        assert_eq!(player.vitals.max, 150.0);
        assert_eq!(player.vitals.damage_reduction, 10.0);
        assert!(player.can_act());
    }

    #[test]
    fn test_kind_classes() {
        assert_eq!(EntityKind::Boss.class(), EntityClass::Boss);
        assert_eq!(EntityKind::Aura(StatusEffectKind::Burn).class(), EntityClass::Effect);
        assert_eq!(EntityKind::SlowAura.class(), EntityClass::Effect);
        assert_eq!(EntityKind::Hazard(HazardKind::Swamp).class(), EntityClass::Hazard);
        assert!(EntityKind::Enemy(EnemyType::Melee).is_room_owned());
        assert!(EntityKind::HealthPickup.is_room_owned());
        assert!(!EntityKind::Projectile.is_room_owned());
        assert!(!EntityKind::BuffAura(BuffKind::Haste).is_room_owned());
    }

    #[test]
    fn test_speed_combines_slow_and_haste() {
        let mut entity = spawn(EntityKind::Player(PlayerClass::Archer), None);
        let player = entity.as_player_mut().unwrap();
        let base = player.base_speed;

        player.slow = Some(SlowState::new(0.5, 1.0));
        assert_eq!(player.speed(), base * 0.5);

        player.buffs.apply(BuffKind::Haste, 3.0, 30);
        assert_eq!(player.speed(), base * 1.5);
    }

    #[test]
    fn test_hazard_spawns_with_state() {
        let entity = spawn(EntityKind::Hazard(HazardKind::AcidPuddle), None);
        assert!(matches!(entity.state, EntityState::Hazard(HazardState { kind: HazardKind::AcidPuddle, .. })));
        assert!(entity.vitals().is_none());
    }
}
