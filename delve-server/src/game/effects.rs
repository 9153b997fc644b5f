//! Status Effects
//!
//! Damage-over-time effects and slows. Both run only on the peer that
//! owns the affected entity; the damage they produce goes out as regular
//! `TakeDamage` calls.

use serde::{Serialize, Deserialize};

use crate::core::{secs_to_ticks, Timer};
use crate::game::entity::EntityId;

/// Negative effect carried by a projectile payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEffectKind {
    /// No effect.
    #[default]
    None,
    /// Bleeding.
    Bleed,
    /// Poison.
    Poison,
    /// Burning.
    Burn,
    /// Paralysis.
    Paralyze,
}

/// Timing and strength of a damage-over-time effect, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    /// Effect type.
    pub kind: StatusEffectKind,
    /// Damage dealt on every tick of the effect.
    pub damage_per_tick: f32,
    /// Total duration.
    pub duration: f32,
    /// Time between damage ticks.
    pub tick_interval: f32,
}

/// An effect in progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveEffect {
    /// Affected entity.
    pub target: EntityId,
    /// Effect type.
    pub kind: StatusEffectKind,
    /// Damage per tick.
    pub damage_per_tick: f32,
    /// Ticks between damage ticks (at least 1).
    pub interval: u32,
    /// Ticks of duration consumed by damage ticks so far.
    pub elapsed: u32,
    /// Total duration in ticks.
    pub duration: u32,
    /// Ticks until the next step is due (0 = due now).
    pub until_next: u32,
    /// Visual aura parented to the target, once spawned.
    pub aura: Option<EntityId>,
}

/// Output of advancing effects by one tick.
#[derive(Clone, Debug, PartialEq)]
pub enum EffectEvent {
    /// Apply damage to the target.
    Damage {
        /// Affected entity.
        target: EntityId,
        /// Effect type.
        kind: StatusEffectKind,
        /// Amount.
        amount: f32,
    },
    /// The effect ended; its aura should be destroyed.
    Expired {
        /// Affected entity.
        target: EntityId,
        /// Effect type.
        kind: StatusEffectKind,
        /// Aura to destroy.
        aura: Option<EntityId>,
    },
}

/// Effects applied by this peer to entities it owns.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusEffects {
    active: Vec<ActiveEffect>,
}

impl StatusEffects {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an effect. The first damage tick happens on the next
    /// `tick()`. Returns `false` for `None` or when the same kind is
    /// already running on the target (effects do not stack).
    pub fn apply(&mut self, target: EntityId, spec: EffectSpec) -> bool {
        if spec.kind == StatusEffectKind::None || self.is_active(target, spec.kind) {
            return false;
        }

        self.active.push(ActiveEffect {
            target,
            kind: spec.kind,
            damage_per_tick: spec.damage_per_tick,
            interval: secs_to_ticks(spec.tick_interval).max(1),
            elapsed: 0,
            duration: secs_to_ticks(spec.duration),
            until_next: 0,
            aura: None,
        });
        true
    }

    /// Record the aura spawned for an effect.
    pub fn attach_aura(&mut self, target: EntityId, kind: StatusEffectKind, aura: EntityId) {
        if let Some(effect) = self.active.iter_mut().find(|e| e.target == target && e.kind == kind) {
            effect.aura = Some(aura);
        }
    }

    /// Is an effect of `kind` running on `target`?
    pub fn is_active(&self, target: EntityId, kind: StatusEffectKind) -> bool {
        self.active.iter().any(|e| e.target == target && e.kind == kind)
    }

    /// Number of running effects.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// No effects running?
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Advance every effect by one tick.
    ///
    /// A due effect deals damage while `elapsed < duration`, otherwise it
    /// expires.
    pub fn tick(&mut self) -> Vec<EffectEvent> {
        let mut events = Vec::new();

        self.active.retain_mut(|effect| {
            if effect.until_next > 0 {
                effect.until_next -= 1;
                if effect.until_next > 0 {
                    return true;
                }
            }

            if effect.elapsed >= effect.duration {
                events.push(EffectEvent::Expired {
                    target: effect.target,
                    kind: effect.kind,
                    aura: effect.aura,
                });
                return false;
            }

            events.push(EffectEvent::Damage {
                target: effect.target,
                kind: effect.kind,
                amount: effect.damage_per_tick,
            });
            effect.elapsed += effect.interval;
            effect.until_next = effect.interval;
            true
        });

        events
    }

    /// Drop every effect on `target`. Returns auras to destroy.
    pub fn remove_target(&mut self, target: EntityId) -> Vec<EntityId> {
        let mut auras = Vec::new();
        self.active.retain(|effect| {
            if effect.target == target {
                auras.extend(effect.aura);
                false
            } else {
                true
            }
        });
        auras
    }
}

/// Movement speed multiplier with a deadline.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlowState {
    /// Applied to base speed.
    pub multiplier: f32,
    /// Runs out when the slow ends.
    pub timer: Timer,
    /// Visual aura parented to the player, once spawned.
    pub aura: Option<EntityId>,
}

impl SlowState {
    /// Slow for `duration` seconds.
    pub fn new(multiplier: f32, duration: f32) -> Self {
        Self {
            multiplier: multiplier.clamp(0.0, 1.0),
            timer: Timer::started(secs_to_ticks(duration)),
            aura: None,
        }
    }

    /// Restart with new values, keeping the aura. Slows never stack.
    pub fn refresh(&mut self, multiplier: f32, duration: f32) {
        self.multiplier = multiplier.clamp(0.0, 1.0);
        self.timer.start(secs_to_ticks(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bleed(duration: f32, interval: f32) -> EffectSpec {
        EffectSpec {
            kind: StatusEffectKind::Bleed,
            damage_per_tick: 4.0,
            duration,
            tick_interval: interval,
        }
    }

    fn damage_ticks(events: &[EffectEvent]) -> usize {
        events.iter().filter(|e| matches!(e, EffectEvent::Damage { .. })).count()
    }

    #[test]
    fn test_first_tick_is_immediate() {
        let mut effects = StatusEffects::new();
        assert!(effects.apply(EntityId(1001), bleed(1.0, 0.5)));

        let events = effects.tick();
        assert_eq!(damage_ticks(&events), 1);
    }

    #[test]
    fn test_ticks_until_duration_then_expires() {
        let mut effects = StatusEffects::new();
        effects.apply(EntityId(1001), bleed(1.0, 0.5));
        effects.attach_aura(EntityId(1001), StatusEffectKind::Bleed, EntityId(1002));

        let mut all = Vec::new();
        for _ in 0..120 {
            all.extend(effects.tick());
        }

        // Damage at 0s and 0.5s, expiry at 1.0s
        assert_eq!(damage_ticks(&all), 2);
        assert_eq!(
            all.last(),
            Some(&EffectEvent::Expired {
                target: EntityId(1001),
                kind: StatusEffectKind::Bleed,
                aura: Some(EntityId(1002)),
            })
        );
        assert!(effects.is_empty());
    }

    #[test]
    fn test_same_kind_does_not_stack() {
        let mut effects = StatusEffects::new();
        assert!(effects.apply(EntityId(1001), bleed(3.0, 1.0)));
        assert!(!effects.apply(EntityId(1001), bleed(3.0, 1.0)));

        let poison = EffectSpec { kind: StatusEffectKind::Poison, ..bleed(3.0, 1.0) };
        assert!(effects.apply(EntityId(1001), poison));
        assert_eq!(effects.len(), 2);
    }

    #[test]
    fn test_none_is_ignored() {
        let mut effects = StatusEffects::new();
        let none = EffectSpec { kind: StatusEffectKind::None, ..bleed(3.0, 1.0) };
        assert!(!effects.apply(EntityId(1001), none));
    }

    #[test]
    fn test_zero_duration_expires_without_damage() {
        let mut effects = StatusEffects::new();
        effects.apply(EntityId(1001), bleed(0.0, 1.0));
        let events = effects.tick();
        assert_eq!(damage_ticks(&events), 0);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_slow_refresh_keeps_aura() {
        let mut slow = SlowState::new(0.5, 1.0);
        slow.aura = Some(EntityId(1009));
        for _ in 0..50 {
            slow.timer.tick();
        }

        slow.refresh(1.7, 1.0);
        assert_eq!(slow.multiplier, 1.0);
        assert_eq!(slow.timer.remaining(), Some(60));
        assert_eq!(slow.aura, Some(EntityId(1009)));
    }

    #[test]
    fn test_remove_target_returns_auras() {
        let mut effects = StatusEffects::new();
        effects.apply(EntityId(1001), bleed(3.0, 1.0));
        effects.attach_aura(EntityId(1001), StatusEffectKind::Bleed, EntityId(1005));
        assert_eq!(effects.remove_target(EntityId(1001)), vec![EntityId(1005)]);
        assert!(effects.is_empty());
    }
}
