//! Skills
//!
//! Skill slots open as the session kill count grows. The count is the
//! replicated integer, so every peer unlocks the same slots. Casting is
//! resolved by the player's owner: per-slot cooldowns, timed buffs and the
//! shapes (cones, fans) abilities hit.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::config::SkillRequirements;
use crate::core::{Cooldown, Timer, Vec3};
use crate::game::entity::EntityId;
use crate::TICK_RATE;

/// A skill slot gated by kills.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillSlot {
    /// Dash.
    Dash,
    /// Primary skill.
    Primary,
    /// Secondary skill.
    Secondary,
}

impl SkillSlot {
    /// All slots, in unlock order for default requirements.
    pub const ALL: [SkillSlot; 3] = [SkillSlot::Dash, SkillSlot::Primary, SkillSlot::Secondary];

    /// Kills needed for this slot.
    pub fn requirement(self, req: &SkillRequirements) -> u32 {
        match self {
            SkillSlot::Dash => req.dash,
            SkillSlot::Primary => req.primary,
            SkillSlot::Secondary => req.secondary,
        }
    }

    fn index(self) -> usize {
        match self {
            SkillSlot::Dash => 0,
            SkillSlot::Primary => 1,
            SkillSlot::Secondary => 2,
        }
    }
}

/// Slots available at `kills`.
pub fn unlocked_slots(kills: u32, req: &SkillRequirements) -> Vec<SkillSlot> {
    SkillSlot::ALL
        .into_iter()
        .filter(|slot| kills >= slot.requirement(req))
        .collect()
}

/// Slots that open when the count moves from `before` to `after`.
pub fn newly_unlocked(before: u32, after: u32, req: &SkillRequirements) -> Vec<SkillSlot> {
    SkillSlot::ALL
        .into_iter()
        .filter(|slot| {
            let needed = slot.requirement(req);
            before < needed && after >= needed
        })
        .collect()
}

/// Why a cast was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SkillError {
    /// Not enough kills yet.
    #[error("{slot:?} needs {required} kills")]
    Locked {
        /// Slot.
        slot: SkillSlot,
        /// Kills needed.
        required: u32,
    },

    /// Used too recently.
    #[error("{slot:?} ready at tick {ready_at}")]
    CoolingDown {
        /// Slot.
        slot: SkillSlot,
        /// Tick the slot is ready again.
        ready_at: u64,
    },

    /// Fallen or still standing up.
    #[error("player cannot act")]
    Incapacitated,
}

// =============================================================================
// COOLDOWNS
// =============================================================================

/// One cooldown per slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCooldowns {
    slots: [Cooldown; 3],
}

impl SkillCooldowns {
    /// Check that `slot` may be used at `now`.
    pub fn check(&self, slot: SkillSlot, now: u64) -> Result<(), SkillError> {
        let cooldown = self.slots[slot.index()];
        if cooldown.is_ready(now) {
            Ok(())
        } else {
            Err(SkillError::CoolingDown { slot, ready_at: cooldown.ready_tick() })
        }
    }

    /// Consume `slot` at `now`.
    pub fn trigger(&mut self, slot: SkillSlot, now: u64, period: u32) {
        self.slots[slot.index()].trigger(now, period);
    }
}

// =============================================================================
// BUFFS
// =============================================================================

/// Timed bonus on a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuffKind {
    /// Speed multiplier.
    Haste,
    /// Raised damage reduction.
    Guard,
    /// Temporary shield.
    Barrier,
    /// Heal every second.
    Regeneration,
    /// Arrows cause bleeding.
    Hemorrhage,
}

/// A buff in progress.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveBuff {
    /// Buff type.
    pub kind: BuffKind,
    /// Strength; meaning depends on the kind.
    pub magnitude: f32,
    /// Runs out when the buff ends.
    pub timer: Timer,
    /// Ticks since the buff started.
    pub elapsed: u32,
    /// Visual aura parented to the player, once spawned.
    pub aura: Option<EntityId>,
}

/// Output of advancing buffs by one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BuffEvent {
    /// A whole second of regeneration passed.
    Pulse {
        /// Heal amount.
        amount: f32,
    },
    /// The buff ended.
    Expired(ActiveBuff),
}

/// Buffs on one player, advanced by its owner.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Buffs {
    active: Vec<ActiveBuff>,
}

impl Buffs {
    /// Start a buff, or refresh it when already running. Returns `true`
    /// when the buff was not running.
    pub fn apply(&mut self, kind: BuffKind, magnitude: f32, ticks: u32) -> bool {
        if let Some(buff) = self.active.iter_mut().find(|b| b.kind == kind) {
            buff.magnitude = magnitude;
            buff.timer.start(ticks);
            buff.elapsed = 0;
            return false;
        }

        self.active.push(ActiveBuff {
            kind,
            magnitude,
            timer: Timer::started(ticks),
            elapsed: 0,
            aura: None,
        });
        true
    }

    /// Record the aura spawned for a buff.
    pub fn attach_aura(&mut self, kind: BuffKind, aura: EntityId) {
        if let Some(buff) = self.active.iter_mut().find(|b| b.kind == kind) {
            buff.aura = Some(aura);
        }
    }

    /// Strength of a running buff.
    pub fn magnitude(&self, kind: BuffKind) -> Option<f32> {
        self.active.iter().find(|b| b.kind == kind).map(|b| b.magnitude)
    }

    /// Is `kind` running?
    pub fn is_active(&self, kind: BuffKind) -> bool {
        self.active.iter().any(|b| b.kind == kind)
    }

    /// No buffs running?
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Advance every buff by one tick.
    pub fn tick(&mut self) -> Vec<BuffEvent> {
        let mut events = Vec::new();

        self.active.retain_mut(|buff| {
            buff.elapsed += 1;
            if buff.kind == BuffKind::Regeneration && buff.elapsed % TICK_RATE == 0 {
                events.push(BuffEvent::Pulse { amount: buff.magnitude });
            }
            if buff.timer.tick() {
                events.push(BuffEvent::Expired(*buff));
                return false;
            }
            true
        });

        events
    }

    /// End every buff. Returns them so their effects can be reverted.
    pub fn clear(&mut self) -> Vec<ActiveBuff> {
        std::mem::take(&mut self.active)
    }
}

// =============================================================================
// SHAPES
// =============================================================================

/// Is `point` within `radius` of `origin` and inside the cone of
/// `angle_deg` (full width) around `forward`? Ground plane only.
pub fn in_cone(origin: Vec3, forward: Vec3, point: Vec3, angle_deg: f32, radius: f32) -> bool {
    let to_point = (point - origin).flat();
    let distance_sq = to_point.length_squared();
    if distance_sq > radius * radius {
        return false;
    }
    if distance_sq <= f32::EPSILON {
        return true;
    }

    let forward = forward.flat().normalize();
    let cos = forward.dot(to_point.normalize());
    cos >= (angle_deg.to_radians() * 0.5).cos()
}

/// `count` unit directions spread evenly over `spread_deg`, centred on
/// `forward`.
pub fn fan_directions(forward: Vec3, count: u32, spread_deg: f32) -> Vec<Vec3> {
    let forward = forward.flat().normalize();
    let base = forward.x.atan2(forward.z);
    if count <= 1 {
        return vec![forward];
    }

    let spread = spread_deg.to_radians();
    let step = spread / (count - 1) as f32;
    (0..count)
        .map(|i| {
            let yaw = base - spread * 0.5 + step * i as f32;
            Vec3::new(yaw.sin(), 0.0, yaw.cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlocked_slots() {
        let req = SkillRequirements::default();
        assert!(unlocked_slots(4, &req).is_empty());
        assert_eq!(unlocked_slots(5, &req), vec![SkillSlot::Dash]);
        assert_eq!(unlocked_slots(20, &req), SkillSlot::ALL.to_vec());
    }

    #[test]
    fn test_newly_unlocked() {
        let req = SkillRequirements::default();
        assert_eq!(newly_unlocked(9, 10, &req), vec![SkillSlot::Primary]);
        assert!(newly_unlocked(10, 11, &req).is_empty());
        // Count can jump when several kills replicate together
        assert_eq!(newly_unlocked(4, 15, &req), SkillSlot::ALL.to_vec());
    }

    #[test]
    fn test_slot_cooldowns_are_independent() {
        let mut cooldowns = SkillCooldowns::default();
        cooldowns.trigger(SkillSlot::Dash, 10, 60);

        assert_eq!(
            cooldowns.check(SkillSlot::Dash, 20),
            Err(SkillError::CoolingDown { slot: SkillSlot::Dash, ready_at: 70 })
        );
        assert!(cooldowns.check(SkillSlot::Primary, 20).is_ok());
        assert!(cooldowns.check(SkillSlot::Dash, 70).is_ok());
    }

    #[test]
    fn test_buff_refresh_does_not_stack() {
        let mut buffs = Buffs::default();
        assert!(buffs.apply(BuffKind::Haste, 2.0, 10));
        buffs.attach_aura(BuffKind::Haste, EntityId(1004));
        assert!(!buffs.apply(BuffKind::Haste, 3.0, 10));
        assert_eq!(buffs.magnitude(BuffKind::Haste), Some(3.0));

        let expired: Vec<_> = (0..10).flat_map(|_| buffs.tick()).collect();
        assert!(matches!(
            expired.as_slice(),
            [BuffEvent::Expired(ActiveBuff { kind: BuffKind::Haste, aura: Some(EntityId(1004)), .. })]
        ));
        assert!(buffs.is_empty());
    }

    #[test]
    fn test_regeneration_pulses_every_second() {
        let mut buffs = Buffs::default();
        buffs.apply(BuffKind::Regeneration, 3.0, 5 * TICK_RATE);

        let events: Vec<_> = (0..5 * TICK_RATE).flat_map(|_| buffs.tick()).collect();
        let pulses = events.iter().filter(|e| matches!(e, BuffEvent::Pulse { amount } if *amount == 3.0)).count();
        assert_eq!(pulses, 5);
        assert!(matches!(events.last(), Some(BuffEvent::Expired(_))));
    }

    #[test]
    fn test_cone() {
        let origin = Vec3::ZERO;
        assert!(in_cone(origin, Vec3::FORWARD, Vec3::new(0.0, 0.0, 3.0), 90.0, 5.0));
        assert!(in_cone(origin, Vec3::FORWARD, Vec3::new(1.0, 0.0, 2.0), 90.0, 5.0));
        // Behind, beside or out of reach
        assert!(!in_cone(origin, Vec3::FORWARD, Vec3::new(0.0, 0.0, -3.0), 90.0, 5.0));
        assert!(!in_cone(origin, Vec3::FORWARD, Vec3::new(3.0, 0.0, 0.5), 90.0, 5.0));
        assert!(!in_cone(origin, Vec3::FORWARD, Vec3::new(0.0, 0.0, 6.0), 90.0, 5.0));
    }

    #[test]
    fn test_fan_is_symmetric() {
        let fan = fan_directions(Vec3::FORWARD, 5, 60.0);
        assert_eq!(fan.len(), 5);
        assert!((fan[2].z - 1.0).abs() < 1e-5);
        assert!((fan[0].x + fan[4].x).abs() < 1e-5);
        assert!((fan[0].x.atan2(fan[0].z).to_degrees() + 30.0).abs() < 1e-3);

        assert_eq!(fan_directions(Vec3::FORWARD, 1, 60.0), vec![Vec3::FORWARD]);
    }
}
