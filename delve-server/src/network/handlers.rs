//! Operation Handlers
//!
//! Local handlers for every remote operation, keyed by the class of the
//! addressed entity and the operation code. Handlers that resolve state
//! (damage, heals, effects, slows, revives) run on the owner only and
//! broadcast the result; everything else mirrors what it receives.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::core::hash::short_hex;
use crate::core::{secs_to_ticks, Quat, Vec3};
use crate::game::effects::SlowState;
use crate::game::entity::{EntityClass, EntityId, EntityKind, EntityState, PlayerClass};
use crate::game::vitals::Vitals;
use crate::game::events::GameEventData;
use crate::game::layout::{GridPos, RoomKind};
use crate::game::room::RoomState;
use crate::game::skills::newly_unlocked;
use crate::network::protocol::{OpCode, Operation, Target};
use crate::network::replication::{Invocation, ReplicationError};
use crate::network::session::SessionContext;

/// Damage sent to every minion when the boss dies.
pub const KILL_ALL_DAMAGE: f32 = 9999.0;

/// A local operation handler.
pub type Handler = fn(&mut SessionContext, &Invocation) -> Result<(), ReplicationError>;

/// Handlers by entity class and operation.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<(EntityClass, OpCode), Handler>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a handler.
    pub fn register(&mut self, class: EntityClass, op: OpCode, handler: Handler) {
        self.handlers.insert((class, op), handler);
    }

    /// Is a handler registered?
    pub fn contains(&self, class: EntityClass, op: OpCode) -> bool {
        self.handlers.contains_key(&(class, op))
    }

    /// Run the handler for an invocation.
    pub fn dispatch(&self, ctx: &mut SessionContext, invocation: &Invocation) -> Result<(), ReplicationError> {
        let class = if invocation.entity.is_scene() {
            EntityClass::Scene
        } else {
            ctx.world
                .entity(invocation.entity)
                .map(|e| e.kind.class())
                .ok_or(ReplicationError::StaleTarget(invocation.entity))?
        };

        let op = invocation.op.code();
        let handler = self
            .handlers
            .get(&(class, op))
            .ok_or(ReplicationError::UnknownHandler { class, op })?;

        handler(ctx, invocation)
    }

    /// Registry with every built-in handler.
    pub fn default_registry() -> Self {
        use EntityClass::*;

        let mut registry = Self::new();

        // Scene
        registry.register(Scene, OpCode::ApplyLayout, apply_layout);
        registry.register(Scene, OpCode::RoomActivated, room_activated);
        registry.register(Scene, OpCode::LockDoors, lock_doors);
        registry.register(Scene, OpCode::UnlockDoors, unlock_doors);
        registry.register(Scene, OpCode::RoomCleared, room_cleared);
        registry.register(Scene, OpCode::Teleport, teleport);
        registry.register(Scene, OpCode::BossIntro, boss_intro);
        registry.register(Scene, OpCode::KillCountChanged, kill_count_changed);
        registry.register(Scene, OpCode::BatchProgress, batch_progress);

        // Anything with vitals
        for class in [Player, Enemy, Boss] {
            registry.register(class, OpCode::HealthChanged, health_changed);
            registry.register(class, OpCode::ApplyStatusEffect, apply_status_effect);
            registry.register(class, OpCode::SyncTransform, sync_transform);
        }

        // Players
        registry.register(Player, OpCode::TakeDamage, player_take_damage);
        registry.register(Player, OpCode::Fallen, player_fallen);
        registry.register(Player, OpCode::ReviveCheck, revive_check);
        registry.register(Player, OpCode::Revived, player_revived);
        registry.register(Player, OpCode::ApplySlow, apply_slow);
        registry.register(Player, OpCode::Heal, player_heal);
        registry.register(Player, OpCode::SkillCast, skill_cast);

        // Enemies
        registry.register(Enemy, OpCode::InitializeEnemy, initialize_enemy);
        registry.register(Enemy, OpCode::TakeDamage, enemy_take_damage);
        registry.register(Enemy, OpCode::Defeated, enemy_defeated);

        // Boss
        registry.register(Boss, OpCode::TakeDamage, boss_take_damage);
        registry.register(Boss, OpCode::BossPhaseChanged, boss_phase_changed);
        registry.register(Boss, OpCode::BossDefeated, boss_defeated);

        // Projectiles and effects
        registry.register(Projectile, OpCode::HitEffect, hit_effect);
        registry.register(Effect, OpCode::SetParent, set_parent);

        registry
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn owned(ctx: &SessionContext, entity: EntityId) -> Result<(), ReplicationError> {
    match ctx.world.entity(entity) {
        Some(e) if e.owner == ctx.local() => Ok(()),
        Some(_) => Err(ReplicationError::NotOwner { entity, local: ctx.local() }),
        None => Err(ReplicationError::StaleTarget(entity)),
    }
}

fn unexpected(op: &Operation) -> ReplicationError {
    ReplicationError::InvalidPayload(format!("unexpected {:?}", op.code()))
}

fn room_mut(ctx: &mut SessionContext, room: GridPos) -> Result<&mut RoomState, ReplicationError> {
    ctx.world
        .room_mut(room)
        .ok_or_else(|| ReplicationError::MissingReference(format!("room {:?}", room)))
}

/// Apply a kill count and announce newly unlocked skill slots.
pub(crate) fn apply_kill_count(ctx: &mut SessionContext, kills: u32) {
    let before = ctx.world.kill_count;
    ctx.world.kill_count = kills;
    ctx.emit(GameEventData::KillCountChanged { kills });
    for slot in newly_unlocked(before, kills, &ctx.config.skills) {
        info!(?slot, kills, "Skill unlocked");
        ctx.emit(GameEventData::SkillUnlocked { slot });
    }
}

/// Mirror an owner's resolved vitals to the other peers.
pub(crate) fn broadcast_vitals(ctx: &mut SessionContext, entity: EntityId, vitals: Vitals) {
    ctx.invoke(
        Target::Others,
        entity,
        Operation::HealthChanged { current: vitals.current, max: vitals.max, shield: vitals.shield },
    );
    ctx.emit(GameEventData::HealthChanged { entity, current: vitals.current, max: vitals.max });
}

/// Heal a locally owned player that is still standing.
pub(crate) fn heal_player(ctx: &mut SessionContext, player: EntityId, amount: f32) {
    let Some(state) = ctx.world.entity_mut(player).and_then(|e| e.as_player_mut()) else {
        return;
    };
    if state.fallen {
        return;
    }
    state.vitals.heal(amount);
    let vitals = state.vitals;
    broadcast_vitals(ctx, player, vitals);
}

/// Spawn a visual aura on `parent`. Buffered so late joiners see it attached.
pub(crate) fn spawn_aura(ctx: &mut SessionContext, kind: EntityKind, parent: EntityId) -> Option<EntityId> {
    let position = ctx.world.entity(parent)?.position;
    let aura = ctx.spawn(kind, position, Quat::IDENTITY, None)?;
    ctx.invoke(Target::AllBuffered, aura, Operation::SetParent { parent, local_scale: Vec3::ONE });
    Some(aura)
}

/// Spawn the local player in the spawn room, once.
fn spawn_local_player(ctx: &mut SessionContext, room: GridPos) {
    let local = ctx.local();
    if ctx.world.player_of(local).is_some() {
        return;
    }

    let class = ctx
        .authority
        .peer(local)
        .and_then(|p| p.properties.class)
        .unwrap_or(PlayerClass::Warrior);

    // Spread players across the room so they do not stack
    let slot = (local.0 % 4) as f32;
    let position = ctx.world.geometry.room_center(room) + Vec3::new(slot * 1.5 - 2.25, 0.0, 0.0);

    ctx.spawn(EntityKind::Player(class), position, Quat::IDENTITY, None);
}

// =============================================================================
// SCENE
// =============================================================================

fn apply_layout(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::ApplyLayout { layout, digest } = &inv.op else {
        return Err(unexpected(&inv.op));
    };

    if !layout.is_well_formed() {
        ctx.emit(GameEventData::LayoutRejected);
        return Err(ReplicationError::InvalidPayload("malformed layout".to_string()));
    }

    let actual = layout.digest();
    if actual != *digest {
        warn!(expected = %short_hex(digest), actual = %short_hex(&actual), "Layout digest mismatch");
        ctx.emit(GameEventData::LayoutRejected);
        return Err(ReplicationError::InvalidPayload("layout digest mismatch".to_string()));
    }

    if ctx.world.layout.is_some() {
        debug!("layout already applied");
        return Ok(());
    }

    let unreachable = layout.unreachable_rooms();
    if !unreachable.is_empty() {
        warn!(?unreachable, "Layout has unreachable rooms");
    }

    let rooms = layout.room_count();
    let spawn_room = layout.spawn_room();
    ctx.world.apply_layout(layout.clone());
    ctx.started = true;

    info!(rooms, digest = %short_hex(digest), "Layout applied");
    ctx.emit(GameEventData::LayoutApplied { rooms, digest: short_hex(digest) });

    spawn_local_player(ctx, spawn_room);
    Ok(())
}

fn room_activated(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::RoomActivated { room } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    room_mut(ctx, room)?.activate();
    ctx.emit(GameEventData::DoorsLocked { room });
    Ok(())
}

fn lock_doors(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::LockDoors { room } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    room_mut(ctx, room)?.lock();
    ctx.emit(GameEventData::DoorsLocked { room });
    Ok(())
}

fn unlock_doors(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::UnlockDoors { room } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    room_mut(ctx, room)?.unlock();
    ctx.emit(GameEventData::DoorsUnlocked { room });
    Ok(())
}

fn room_cleared(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::RoomCleared { room } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    let state = room_mut(ctx, room)?;
    if state.cleared && !state.locked {
        return Ok(());
    }
    state.mark_cleared();

    info!(?room, "Room cleared");
    ctx.emit(GameEventData::RoomCleared { room });
    ctx.emit(GameEventData::DoorsUnlocked { room });
    Ok(())
}

fn teleport(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::Teleport { room, door, players } = &inv.op else {
        return Err(unexpected(&inv.op));
    };
    let (room, door) = (*room, *door);

    let to = ctx
        .world
        .layout
        .as_ref()
        .and_then(|layout| layout.neighbor(room, door))
        .ok_or_else(|| ReplicationError::MissingReference(format!("no room behind {:?} of {:?}", door, room)))?;

    let arrival = door.opposite();
    let entry = ctx.world.geometry.entry_point(to, arrival);
    let normal = crate::game::physics::RoomGeometry::door_normal(arrival);
    let sideways = Vec3::new(normal.z, 0.0, -normal.x);
    let facing = Quat::look_rotation(-normal);

    let local = ctx.local();
    let mut placed = 0;
    for &player in players {
        let Some(entity) = ctx.world.entity_mut(player) else {
            continue;
        };
        if entity.owner != local {
            continue;
        }

        entity.position = entry + sideways * (placed as f32 * 1.0);
        entity.rotation = facing;
        placed += 1;

        let (position, rotation) = (entity.position, entity.rotation);
        ctx.invoke(Target::Others, player, Operation::SyncTransform { position, rotation });
        ctx.emit(GameEventData::Teleported { player, from: room, to });
    }

    if let Some(countdown) = ctx.world.doors.get_mut(&(room, door)) {
        countdown.set_occupants(std::iter::empty());
        countdown.reset();
    }
    Ok(())
}

fn boss_intro(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::BossIntro { room } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    ctx.emit(GameEventData::BossIntro { room });
    Ok(())
}

fn kill_count_changed(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::KillCountChanged { kills } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    apply_kill_count(ctx, kills);
    Ok(())
}

fn batch_progress(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::BatchProgress(snapshot) = &inv.op else {
        return Err(unexpected(&inv.op));
    };
    // The authority's spawner is the source of the mirror
    if !ctx.is_authority() {
        let now = ctx.world.now();
        ctx.world.spawner.restore(snapshot.clone(), now);
    }
    Ok(())
}

// =============================================================================
// SHARED ENTITY OPERATIONS
// =============================================================================

fn health_changed(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::HealthChanged { current, max, shield } = inv.op else {
        return Err(unexpected(&inv.op));
    };

    let local = ctx.local();
    let entity = ctx
        .world
        .entity_mut(inv.entity)
        .ok_or(ReplicationError::StaleTarget(inv.entity))?;

    // The owner already holds the resolved value
    if entity.owner == local {
        return Ok(());
    }

    if let Some(vitals) = entity.vitals_mut() {
        vitals.mirror(current, max, shield);
    }
    ctx.emit(GameEventData::HealthChanged { entity: inv.entity, current, max });
    Ok(())
}

fn apply_status_effect(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::ApplyStatusEffect(spec) = inv.op else {
        return Err(unexpected(&inv.op));
    };
    owned(ctx, inv.entity)?;

    let Some(target) = ctx.world.entity(inv.entity) else {
        return Err(ReplicationError::StaleTarget(inv.entity));
    };
    if target.is_down() {
        return Ok(());
    }

    if !ctx.world.effects.apply(inv.entity, spec) {
        debug!(entity = %inv.entity, kind = ?spec.kind, "effect not applied");
        return Ok(());
    }

    if let Some(aura) = spawn_aura(ctx, EntityKind::Aura(spec.kind), inv.entity) {
        ctx.world.effects.attach_aura(inv.entity, spec.kind, aura);
    }
    Ok(())
}

fn sync_transform(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::SyncTransform { position, rotation } = inv.op else {
        return Err(unexpected(&inv.op));
    };

    let local = ctx.local();
    let entity = ctx
        .world
        .entity_mut(inv.entity)
        .ok_or(ReplicationError::StaleTarget(inv.entity))?;
    if entity.owner != local {
        entity.position = position;
        entity.rotation = rotation;
    }
    Ok(())
}

// =============================================================================
// PLAYERS
// =============================================================================

fn player_take_damage(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::TakeDamage { amount } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    owned(ctx, inv.entity)?;

    let Some(player) = ctx.world.entity_mut(inv.entity).and_then(|e| e.as_player_mut()) else {
        return Err(ReplicationError::StaleTarget(inv.entity));
    };
    if player.fallen || player.vitals.is_depleted() {
        return Ok(());
    }

    let outcome = player.vitals.resolve_damage(amount);
    let vitals = player.vitals;
    broadcast_vitals(ctx, inv.entity, vitals);

    if outcome.fatal {
        ctx.invoke(Target::All, inv.entity, Operation::Fallen);
    }
    Ok(())
}

fn player_fallen(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let local = ctx.local();
    let entity = ctx
        .world
        .entity_mut(inv.entity)
        .ok_or(ReplicationError::StaleTarget(inv.entity))?;
    let is_owner = entity.owner == local;
    let Some(player) = entity.as_player_mut() else {
        return Err(unexpected(&inv.op));
    };
    if player.fallen {
        return Ok(());
    }

    player.fallen = true;
    player.vitals.current = 0.0;
    player.vitals.shield = 0.0;
    player.vitals.damage_reduction = player.base_damage_reduction;
    let mut auras: Vec<EntityId> = player.slow.take().and_then(|slow| slow.aura).into_iter().collect();
    auras.extend(player.buffs.clear().into_iter().filter_map(|buff| buff.aura));

    info!(player = %inv.entity, "Player fallen");
    ctx.emit(GameEventData::PlayerFallen { player: inv.entity });

    if is_owner {
        auras.extend(ctx.world.effects.remove_target(inv.entity));
        for aura in auras {
            ctx.destroy_later(aura);
        }
    }

    if ctx.world.all_players_fallen() && !ctx.world.game_over {
        ctx.world.game_over = true;
        info!("Every player has fallen");
        ctx.emit(GameEventData::GameOver);
    }
    Ok(())
}

fn revive_check(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    owned(ctx, inv.entity)?;

    let Some(player) = ctx.world.entity(inv.entity).and_then(|e| e.as_player()) else {
        return Err(ReplicationError::StaleTarget(inv.entity));
    };
    if !player.fallen {
        return Ok(());
    }

    let ally_standing = ctx.world.players().any(|p| p.id != inv.entity && !p.is_down());
    if !ally_standing {
        debug!(player = %inv.entity, "no ally standing, not reviving");
        return Ok(());
    }

    let health = player.vitals.max * ctx.config.revive.health_fraction;
    ctx.invoke(Target::All, inv.entity, Operation::Revived { health });
    Ok(())
}

fn player_revived(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::Revived { health } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    let rise = secs_to_ticks(ctx.config.revive.rise_delay);

    let Some(player) = ctx.world.entity_mut(inv.entity).and_then(|e| e.as_player_mut()) else {
        return Err(ReplicationError::StaleTarget(inv.entity));
    };
    if !player.fallen {
        return Ok(());
    }

    player.fallen = false;
    player.vitals.current = health.clamp(0.0, player.vitals.max);
    if rise > 0 {
        player.rising.start(rise);
    }
    let (current, max) = (player.vitals.current, player.vitals.max);

    if ctx.world.game_over && !ctx.world.all_players_fallen() {
        ctx.world.game_over = false;
    }

    info!(player = %inv.entity, health = current, "Player revived");
    ctx.emit(GameEventData::PlayerRevived { player: inv.entity });
    ctx.emit(GameEventData::HealthChanged { entity: inv.entity, current, max });
    Ok(())
}

fn apply_slow(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::ApplySlow { multiplier, duration } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    owned(ctx, inv.entity)?;

    let Some(player) = ctx.world.entity_mut(inv.entity).and_then(|e| e.as_player_mut()) else {
        return Err(ReplicationError::StaleTarget(inv.entity));
    };
    if player.fallen {
        return Ok(());
    }
    if let Some(slow) = &mut player.slow {
        slow.refresh(multiplier, duration);
        return Ok(());
    }
    player.slow = Some(SlowState::new(multiplier, duration));

    let aura = spawn_aura(ctx, EntityKind::SlowAura, inv.entity);
    if let Some(slow) = ctx
        .world
        .entity_mut(inv.entity)
        .and_then(|e| e.as_player_mut())
        .and_then(|p| p.slow.as_mut())
    {
        slow.aura = aura;
    }
    Ok(())
}

fn player_heal(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::Heal { amount } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    owned(ctx, inv.entity)?;
    heal_player(ctx, inv.entity, amount);
    Ok(())
}

fn skill_cast(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::SkillCast { slot } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    ctx.emit(GameEventData::SkillActivated { player: inv.entity, slot });
    Ok(())
}

// =============================================================================
// ENEMIES
// =============================================================================

fn initialize_enemy(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::InitializeEnemy { attributes, minion, room } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    let Some(enemy) = ctx.world.entity_mut(inv.entity).and_then(|e| e.as_enemy_mut()) else {
        return Err(ReplicationError::StaleTarget(inv.entity));
    };
    enemy.initialize(attributes, minion, room);
    Ok(())
}

fn enemy_take_damage(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::TakeDamage { amount } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    owned(ctx, inv.entity)?;

    let Some(enemy) = ctx.world.entity_mut(inv.entity).and_then(|e| e.as_enemy_mut()) else {
        return Err(ReplicationError::StaleTarget(inv.entity));
    };
    if enemy.dead || enemy.vitals.is_depleted() {
        return Ok(());
    }

    let outcome = enemy.vitals.resolve_damage(amount);
    let vitals = enemy.vitals;
    broadcast_vitals(ctx, inv.entity, vitals);

    if outcome.fatal {
        ctx.invoke(Target::All, inv.entity, Operation::Defeated);
    }
    Ok(())
}

fn enemy_defeated(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let local = ctx.local();
    let despawn = secs_to_ticks(ctx.config.despawn_delay);

    let entity = ctx
        .world
        .entity_mut(inv.entity)
        .ok_or(ReplicationError::StaleTarget(inv.entity))?;
    let is_owner = entity.owner == local;
    let position = entity.position;
    let Some(enemy) = entity.as_enemy_mut() else {
        return Err(unexpected(&inv.op));
    };
    if enemy.dead {
        return Ok(());
    }

    enemy.dead = true;
    enemy.target = None;
    enemy.vitals.current = 0.0;
    let (minion, room) = (enemy.minion, enemy.room);
    if is_owner {
        enemy.despawn.start(despawn);
    }

    ctx.emit(GameEventData::EnemyDefeated { entity: inv.entity });

    if is_owner {
        for aura in ctx.world.effects.remove_target(inv.entity) {
            ctx.destroy_later(aura);
        }
    }

    if !ctx.is_authority() || minion {
        return Ok(());
    }

    // Batch bookkeeping (authority only)
    let kills = ctx.world.kill_count + 1;
    apply_kill_count(ctx, kills);
    ctx.invoke(Target::Others, EntityId::SCENE, Operation::KillCountChanged { kills });
    drop_pickup(ctx, position);

    let Some(room) = room else {
        debug!(enemy = %inv.entity, "defeated enemy has no batch room");
        return Ok(());
    };
    let cleared = ctx.world.spawner.on_defeated(room);
    let snapshot = ctx.world.spawner.snapshot();
    ctx.invoke(Target::Others, EntityId::SCENE, Operation::BatchProgress(snapshot));

    if cleared {
        ctx.invoke(Target::AllBuffered, EntityId::SCENE, Operation::RoomCleared { room });

        let players: Vec<_> = ctx.world.players().map(|p| (p.id, p.owner)).collect();
        for (player, owner) in players {
            ctx.invoke(Target::Peer(owner), player, Operation::ReviveCheck);
        }
    }
    Ok(())
}

/// Roll the drop chance and leave a health pickup where an enemy fell.
fn drop_pickup(ctx: &mut SessionContext, position: Vec3) {
    if ctx.rng.next_f32() >= ctx.config.pickups.drop_chance {
        return;
    }
    if let Some(pickup) = ctx.spawn(EntityKind::HealthPickup, position.flat(), Quat::IDENTITY, None) {
        debug!(%pickup, "Health pickup dropped");
    }
}

// =============================================================================
// BOSS
// =============================================================================

fn boss_take_damage(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::TakeDamage { amount } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    owned(ctx, inv.entity)?;

    let Some(boss) = ctx.world.entity_mut(inv.entity).and_then(|e| e.as_boss_mut()) else {
        return Err(ReplicationError::StaleTarget(inv.entity));
    };
    if boss.dead || boss.vitals.is_depleted() {
        return Ok(());
    }

    let outcome = boss.vitals.resolve_damage(amount);
    let vitals = boss.vitals;
    let phase = boss
        .check_phase()
        .map(|index| (index, boss.phases[index].name.clone()));

    broadcast_vitals(ctx, inv.entity, vitals);

    if let Some((index, name)) = phase {
        ctx.invoke(Target::All, inv.entity, Operation::BossPhaseChanged { index: index as u32, name });
    }
    if outcome.fatal {
        ctx.invoke(Target::All, inv.entity, Operation::BossDefeated);
    }
    Ok(())
}

fn boss_phase_changed(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::BossPhaseChanged { index, name } = &inv.op else {
        return Err(unexpected(&inv.op));
    };

    let Some(boss) = ctx.world.entity_mut(inv.entity).and_then(|e| e.as_boss_mut()) else {
        return Err(ReplicationError::StaleTarget(inv.entity));
    };
    let index = *index as usize;
    if let Some(phase) = boss.phases.get_mut(index) {
        phase.triggered = true;
        boss.phase_index = boss.phase_index.max(index);
        boss.current_phase = Some(index);
    }

    info!(index, name = %name, "Boss phase");
    ctx.emit(GameEventData::BossPhaseEntered { index: index as u32, name: name.clone() });
    Ok(())
}

fn boss_defeated(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let local = ctx.local();
    let despawn = secs_to_ticks(ctx.config.boss.despawn_delay);

    let entity = ctx
        .world
        .entity_mut(inv.entity)
        .ok_or(ReplicationError::StaleTarget(inv.entity))?;
    let is_owner = entity.owner == local;
    let Some(boss) = entity.as_boss_mut() else {
        return Err(unexpected(&inv.op));
    };
    if boss.dead {
        return Ok(());
    }

    boss.dead = true;
    boss.target = None;
    boss.casting.cancel();
    boss.vitals.current = 0.0;
    if is_owner {
        boss.despawn.start(despawn);
    }

    if !ctx.world.victory {
        ctx.world.victory = true;
        info!("Boss defeated");
        ctx.emit(GameEventData::Victory);
    }

    if !is_owner {
        return Ok(());
    }

    let minions: Vec<EntityId> = ctx
        .world
        .entities()
        .filter(|e| matches!(&e.state, EntityState::Enemy(enemy) if enemy.minion && !enemy.dead))
        .map(|e| e.id)
        .collect();
    for minion in minions {
        ctx.invoke(Target::All, minion, Operation::TakeDamage { amount: KILL_ALL_DAMAGE });
    }

    let boss_room = ctx
        .world
        .rooms
        .values()
        .find(|r| r.kind == RoomKind::Boss)
        .map(|r| r.pos);
    if let Some(room) = boss_room {
        ctx.invoke(Target::AllBuffered, EntityId::SCENE, Operation::RoomCleared { room });
    }
    Ok(())
}

// =============================================================================
// PROJECTILES AND EFFECTS
// =============================================================================

fn hit_effect(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::HitEffect { position } = inv.op else {
        return Err(unexpected(&inv.op));
    };
    ctx.emit(GameEventData::HitEffect { position });
    Ok(())
}

fn set_parent(ctx: &mut SessionContext, inv: &Invocation) -> Result<(), ReplicationError> {
    let Operation::SetParent { parent, local_scale } = inv.op else {
        return Err(unexpected(&inv.op));
    };

    let parent_position = ctx
        .world
        .entity(parent)
        .map(|p| p.position)
        .ok_or_else(|| ReplicationError::MissingReference(format!("parent {}", parent)))?;

    let entity = ctx
        .world
        .entity_mut(inv.entity)
        .ok_or(ReplicationError::StaleTarget(inv.entity))?;
    entity.parent = Some(parent);
    entity.local_scale = local_scale;
    entity.position = parent_position;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_covers_damage_and_scene() {
        let registry = HandlerRegistry::default_registry();
        assert!(registry.contains(EntityClass::Scene, OpCode::ApplyLayout));
        assert!(registry.contains(EntityClass::Player, OpCode::TakeDamage));
        assert!(registry.contains(EntityClass::Enemy, OpCode::TakeDamage));
        assert!(registry.contains(EntityClass::Boss, OpCode::TakeDamage));
        assert!(registry.contains(EntityClass::Effect, OpCode::SetParent));
        // Projectiles cannot be damaged
        assert!(!registry.contains(EntityClass::Projectile, OpCode::TakeDamage));
    }

    #[test]
    fn test_players_take_heals_and_skill_notices() {
        let registry = HandlerRegistry::default_registry();
        assert!(registry.contains(EntityClass::Player, OpCode::Heal));
        assert!(registry.contains(EntityClass::Player, OpCode::SkillCast));
        assert!(!registry.contains(EntityClass::Enemy, OpCode::Heal));
        // Pickups and traps only exist; nothing is called on them
        assert!(!registry.contains(EntityClass::Pickup, OpCode::TakeDamage));
        assert!(!registry.contains(EntityClass::Hazard, OpCode::TakeDamage));
    }
}
