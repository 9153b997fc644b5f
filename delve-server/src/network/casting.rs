//! Skill Casting
//!
//! Skills are resolved by the player's owner. The owner checks the unlock
//! and the slot cooldown, applies buffs to its own avatar and sends
//! damage, effects and projectiles the same way a basic attack does.
//! Other peers only see the results and a `SkillCast` notice.

use tracing::{debug, info, trace};

use crate::core::{secs_to_ticks, Quat, Vec3};
use crate::game::entity::{EntityId, EntityKind, Faction, InitPayload, PlayerClass, PlayerState};
use crate::game::physics::body_radius;
use crate::game::skills::{fan_directions, in_cone, BuffEvent, BuffKind, SkillError, SkillSlot};
use crate::network::handlers::{broadcast_vitals, heal_player, spawn_aura};
use crate::network::protocol::{Operation, Target};
use crate::network::session::{SessionContext, MUZZLE_OFFSET};

fn player_state(ctx: &mut SessionContext, player: EntityId) -> Option<&mut PlayerState> {
    ctx.world.entity_mut(player).and_then(|e| e.as_player_mut())
}

/// Use `slot` with the locally owned `player`, aimed along `aim` (or the
/// player's facing).
pub(crate) fn cast(
    ctx: &mut SessionContext,
    player: EntityId,
    slot: SkillSlot,
    aim: Option<Vec3>,
) -> Result<(), SkillError> {
    let now = ctx.world.now();
    let required = slot.requirement(&ctx.config.skills);
    if ctx.world.kill_count < required {
        return Err(SkillError::Locked { slot, required });
    }

    let Some(entity) = ctx.world.entity_mut(player) else {
        return Err(SkillError::Incapacitated);
    };
    let forward = entity.forward();
    let Some(state) = entity.as_player_mut() else {
        return Err(SkillError::Incapacitated);
    };
    if !state.can_act() {
        return Err(SkillError::Incapacitated);
    }
    state.skills.check(slot, now)?;
    let class = state.class;
    state.skills.trigger(slot, now, secs_to_ticks(ctx.config.abilities.cooldown(class, slot)));

    let direction = aim
        .map(|d| d.flat().normalize())
        .filter(|d| *d != Vec3::ZERO)
        .unwrap_or(forward);

    info!(%player, ?slot, ?class, "Skill cast");
    ctx.invoke(Target::All, player, Operation::SkillCast { slot });

    match (slot, class) {
        (SkillSlot::Dash, _) => dash(ctx, player, class),
        (SkillSlot::Primary, PlayerClass::Warrior) => mend(ctx, player),
        (SkillSlot::Primary, PlayerClass::Archer) => {
            let duration = ctx.config.abilities.hemorrhage.duration;
            start_buff(ctx, player, BuffKind::Hemorrhage, 1.0, duration);
        }
        (SkillSlot::Secondary, PlayerClass::Warrior) => front_spike(ctx, player, direction),
        (SkillSlot::Secondary, PlayerClass::Archer) => shock_blast(ctx, player, direction),
    }
    Ok(())
}

/// Arrow fired by `shooter`; carries a bleed while hemorrhage runs.
pub(crate) fn arrow_payload(ctx: &SessionContext, shooter: EntityId, direction: Vec3, damage: f32) -> InitPayload {
    let payload = InitPayload::projectile(direction, damage, Some(shooter));
    let bleeding = ctx
        .world
        .entity(shooter)
        .and_then(|e| e.as_player())
        .is_some_and(|p| p.buffs.is_active(BuffKind::Hemorrhage));
    if bleeding {
        payload.with_effect(ctx.config.abilities.hemorrhage.bleed)
    } else {
        payload
    }
}

/// Start or refresh a buff; a new buff gets an aura.
fn start_buff(ctx: &mut SessionContext, player: EntityId, kind: BuffKind, magnitude: f32, secs: f32) {
    let ticks = secs_to_ticks(secs);
    let Some(state) = player_state(ctx, player) else {
        return;
    };
    if !state.buffs.apply(kind, magnitude, ticks) {
        return;
    }
    if let Some(aura) = spawn_aura(ctx, EntityKind::BuffAura(kind), player) {
        if let Some(state) = player_state(ctx, player) {
            state.buffs.attach_aura(kind, aura);
        }
    }
}

fn dash(ctx: &mut SessionContext, player: EntityId, class: PlayerClass) {
    let dash = ctx.config.abilities.dash;
    start_buff(ctx, player, BuffKind::Haste, dash.speed_multiplier, dash.duration);

    match class {
        PlayerClass::Warrior => {
            start_buff(ctx, player, BuffKind::Guard, dash.guard, dash.duration);
            if let Some(state) = player_state(ctx, player) {
                state.vitals.damage_reduction = state.base_damage_reduction.max(dash.guard);
            }
        }
        PlayerClass::Archer => {
            start_buff(ctx, player, BuffKind::Barrier, dash.barrier, dash.duration);
            let Some(state) = player_state(ctx, player) else {
                return;
            };
            state.vitals.shield = dash.barrier;
            let vitals = state.vitals;
            broadcast_vitals(ctx, player, vitals);
        }
    }
}

fn mend(ctx: &mut SessionContext, player: EntityId) {
    let mend = ctx.config.abilities.mend;
    let Some(max) = player_state(ctx, player).map(|p| p.vitals.max) else {
        return;
    };
    heal_player(ctx, player, max * mend.instant_fraction);
    start_buff(ctx, player, BuffKind::Regeneration, max * mend.regen_fraction, mend.duration);
}

fn front_spike(ctx: &mut SessionContext, player: EntityId, direction: Vec3) {
    let spike = ctx.config.abilities.front_spike;
    let Some(entity) = ctx.world.entity(player) else {
        return;
    };
    let origin = entity.position;
    let Some(damage) = entity.as_player().map(|p| p.damage * spike.damage_multiplier) else {
        return;
    };

    let targets: Vec<EntityId> = ctx
        .world
        .entities()
        .filter(|e| e.kind.faction() == Some(Faction::Monsters) && !e.is_down())
        .filter(|e| in_cone(origin, direction, e.position, spike.angle, spike.radius + body_radius(e.kind)))
        .map(|e| e.id)
        .collect();
    debug!(%player, hits = targets.len(), "Front spike");

    for target in targets {
        ctx.invoke(Target::All, target, Operation::TakeDamage { amount: damage });
        ctx.invoke(Target::All, target, Operation::ApplyStatusEffect(spike.paralyze));
    }
}

fn shock_blast(ctx: &mut SessionContext, player: EntityId, direction: Vec3) {
    let blast = ctx.config.abilities.shock_blast;
    let Some(entity) = ctx.world.entity(player) else {
        return;
    };
    let origin = entity.position;
    let Some(damage) = entity.as_player().map(|p| p.damage * blast.damage_multiplier) else {
        return;
    };

    for dir in fan_directions(direction, blast.projectiles, blast.spread) {
        let payload = arrow_payload(ctx, player, dir, damage);
        ctx.spawn(EntityKind::Projectile, origin + dir * MUZZLE_OFFSET, Quat::look_rotation(dir), Some(payload));
    }
}

/// Advance buffs on locally owned players. Regeneration heals; an expired
/// buff reverts its stat and loses its aura.
pub(crate) fn step_buffs(ctx: &mut SessionContext) {
    let local = ctx.local();
    let players: Vec<EntityId> = ctx
        .world
        .players()
        .filter(|p| p.owner == local)
        .map(|p| p.id)
        .collect();

    for id in players {
        let Some(state) = player_state(ctx, id) else {
            continue;
        };
        if state.buffs.is_empty() {
            continue;
        }

        let mut heal = 0.0;
        let mut shield_lost = false;
        let mut auras = Vec::new();
        for event in state.buffs.tick() {
            match event {
                BuffEvent::Pulse { amount } => heal += amount,
                BuffEvent::Expired(buff) => {
                    trace!(player = %id, kind = ?buff.kind, "Buff expired");
                    match buff.kind {
                        BuffKind::Guard => state.vitals.damage_reduction = state.base_damage_reduction,
                        BuffKind::Barrier => {
                            state.vitals.shield = 0.0;
                            shield_lost = true;
                        }
                        _ => {}
                    }
                    auras.extend(buff.aura);
                }
            }
        }
        let vitals = state.vitals;

        if heal > 0.0 {
            heal_player(ctx, id, heal);
        } else if shield_lost {
            broadcast_vitals(ctx, id, vitals);
        }
        for aura in auras {
            ctx.destroy_later(aura);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use uuid::Uuid;

    use crate::config::GameConfig;
    use crate::game::entity::PeerId;
    use crate::network::protocol::{PeerInfo, PeerProperties, RelayMessage};
    use crate::network::session::PeerSession;

    fn started(class: PlayerClass, kills: u32) -> (PeerSession, EntityId) {
        let mut session = PeerSession::new(Arc::new(GameConfig::default()), "solo", PeerProperties::default());
        session.handle_relay(RelayMessage::Joined {
            you: PeerId(1),
            room_id: Uuid::nil(),
            master: PeerId(1),
            peers: vec![PeerInfo {
                id: PeerId(1),
                nickname: "solo".to_string(),
                properties: PeerProperties { class: Some(class), ready: true },
            }],
        });
        session.start_game().unwrap();
        session.context_mut().world.kill_count = kills;
        let player = session.local_player().unwrap();
        (session, player)
    }

    #[test]
    fn test_locked_until_kill_count() {
        let (mut session, player) = started(PlayerClass::Warrior, 4);
        let ctx = session.context_mut();
        assert_eq!(
            cast(ctx, player, SkillSlot::Dash, None),
            Err(SkillError::Locked { slot: SkillSlot::Dash, required: 5 })
        );

        ctx.world.kill_count = 5;
        assert!(cast(ctx, player, SkillSlot::Dash, None).is_ok());
        assert!(matches!(cast(ctx, player, SkillSlot::Dash, None), Err(SkillError::CoolingDown { .. })));
    }

    #[test]
    fn test_warrior_dash_guards_until_expiry() {
        let (mut session, player) = started(PlayerClass::Warrior, 5);
        let ctx = session.context_mut();
        let dash = ctx.config.abilities.dash;
        let base = player_state(ctx, player).unwrap().vitals.damage_reduction;
        let speed = player_state(ctx, player).unwrap().speed();

        cast(ctx, player, SkillSlot::Dash, None).unwrap();
        let state = player_state(ctx, player).unwrap();
        assert_eq!(state.vitals.damage_reduction, dash.guard);
        assert_eq!(state.speed(), speed * dash.speed_multiplier);

        for _ in 0..secs_to_ticks(dash.duration) {
            step_buffs(ctx);
        }
        let state = player_state(ctx, player).unwrap();
        assert_eq!(state.vitals.damage_reduction, base);
        assert_eq!(state.speed(), speed);
    }

    #[test]
    fn test_archer_dash_barrier_absorbs() {
        let (mut session, player) = started(PlayerClass::Archer, 5);
        let ctx = session.context_mut();
        let barrier = ctx.config.abilities.dash.barrier;
        cast(ctx, player, SkillSlot::Dash, None).unwrap();

        let state = player_state(ctx, player).unwrap();
        assert_eq!(state.vitals.shield, barrier);
        let full = state.vitals.current;
        state.vitals.resolve_damage(10.0);
        assert_eq!(state.vitals.current, full);
    }

    #[test]
    fn test_mend_heals_and_regenerates() {
        let (mut session, player) = started(PlayerClass::Warrior, 10);
        let ctx = session.context_mut();
        let mend = ctx.config.abilities.mend;
        let state = player_state(ctx, player).unwrap();
        let max = state.vitals.max;
        state.vitals.current = max * 0.5;

        cast(ctx, player, SkillSlot::Primary, None).unwrap();
        let after_instant = player_state(ctx, player).unwrap().vitals.current;
        assert!((after_instant - max * (0.5 + mend.instant_fraction)).abs() < 1e-3);

        for _ in 0..secs_to_ticks(1.0) {
            step_buffs(ctx);
        }
        let after_second = player_state(ctx, player).unwrap().vitals.current;
        assert!((after_second - after_instant - max * mend.regen_fraction).abs() < 1e-3);
    }

    #[test]
    fn test_hemorrhage_arrows_bleed() {
        let (mut session, player) = started(PlayerClass::Archer, 10);
        let ctx = session.context_mut();
        assert_eq!(arrow_payload(ctx, player, Vec3::FORWARD, 5.0).effect_spec(), None);

        cast(ctx, player, SkillSlot::Primary, None).unwrap();
        let spec = arrow_payload(ctx, player, Vec3::FORWARD, 5.0).effect_spec();
        assert_eq!(spec, Some(ctx.config.abilities.hemorrhage.bleed));
    }

    #[test]
    fn test_shock_blast_fires_fan() {
        let (mut session, player) = started(PlayerClass::Archer, 15);
        let ctx = session.context_mut();
        cast(ctx, player, SkillSlot::Secondary, Some(Vec3::FORWARD)).unwrap();

        let arrows = ctx.world.entities().filter(|e| e.kind == EntityKind::Projectile).count();
        assert_eq!(arrows as u32, ctx.config.abilities.shock_blast.projectiles);
    }

    #[test]
    fn test_fallen_player_cannot_cast() {
        let (mut session, player) = started(PlayerClass::Warrior, 15);
        let ctx = session.context_mut();
        player_state(ctx, player).unwrap().fallen = true;
        assert_eq!(cast(ctx, player, SkillSlot::Dash, None), Err(SkillError::Incapacitated));
    }
}
