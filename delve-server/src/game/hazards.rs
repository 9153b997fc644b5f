//! Room Hazards
//!
//! Traps placed while a room's batch runs: acid puddles that paralyze and
//! swamps that slow. The authority plans the placements when the batch
//! starts; each hazard's owner applies its effect to players standing in
//! it.

use serde::{Serialize, Deserialize};

use crate::config::HazardConfig;
use crate::core::{Cooldown, DeterministicRng, Vec3};
use crate::game::effects::EffectSpec;

/// Trap archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    /// Paralyzing acid.
    AcidPuddle,
    /// Slowing mud.
    Swamp,
}

/// A trap waiting to be placed, relative to its room centre.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HazardPlacement {
    /// Trap archetype.
    pub kind: HazardKind,
    /// Offset from the room centre.
    pub offset: Vec3,
}

/// What a trap does to a player standing in it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HazardEffect {
    /// Damage over time.
    Status(EffectSpec),
    /// Movement slow, refreshed while the player stays inside.
    Slow {
        /// Applied to base speed.
        multiplier: f32,
        /// Seconds the slow outlives the last check.
        duration: f32,
    },
}

impl HazardKind {
    /// Effect of this archetype.
    pub fn effect(self, config: &HazardConfig) -> HazardEffect {
        match self {
            HazardKind::AcidPuddle => HazardEffect::Status(config.paralyze),
            HazardKind::Swamp => HazardEffect::Slow {
                multiplier: config.slow_multiplier,
                duration: config.slow_linger,
            },
        }
    }
}

/// Live trap state, held by every peer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HazardState {
    /// Archetype.
    pub kind: HazardKind,
    /// Next overlap check on the owner.
    pub check: Cooldown,
}

impl HazardState {
    /// Trap checking from `now`.
    pub fn new(kind: HazardKind, now: u64) -> Self {
        Self { kind, check: Cooldown::ready_at(now) }
    }
}

/// Placements for one room: the spawn points in random order, each with a
/// random archetype that still has amount left.
pub fn plan_hazards(config: &HazardConfig, rng: &mut DeterministicRng) -> Vec<HazardPlacement> {
    let mut points = config.spawn_points.clone();
    rng.shuffle(&mut points);

    let mut amounts: Vec<(HazardKind, u32)> = config.types.iter().map(|t| (t.kind, t.amount)).collect();
    let mut plan = Vec::new();

    for offset in points {
        let available: Vec<usize> = amounts
            .iter()
            .enumerate()
            .filter(|(_, (_, left))| *left > 0)
            .map(|(index, _)| index)
            .collect();
        let Some(&index) = rng.choose(&available) else {
            break;
        };
        amounts[index].1 -= 1;
        plan.push(HazardPlacement { kind: amounts[index].0, offset });
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HazardTypeConfig;

    #[test]
    fn test_plan_respects_amounts() {
        let config = HazardConfig {
            types: vec![
                HazardTypeConfig { kind: HazardKind::AcidPuddle, amount: 1 },
                HazardTypeConfig { kind: HazardKind::Swamp, amount: 1 },
            ],
            ..HazardConfig::default()
        };
        assert!(config.spawn_points.len() > 2);

        let plan = plan_hazards(&config, &mut DeterministicRng::new(4));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.iter().filter(|p| p.kind == HazardKind::Swamp).count(), 1);
        assert!(plan.iter().all(|p| config.spawn_points.contains(&p.offset)));
    }

    #[test]
    fn test_plan_is_seeded() {
        let config = HazardConfig::default();
        let a = plan_hazards(&config, &mut DeterministicRng::new(11));
        let b = plan_hazards(&config, &mut DeterministicRng::new(11));
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_types_no_hazards() {
        let config = HazardConfig { types: Vec::new(), ..HazardConfig::default() };
        assert!(plan_hazards(&config, &mut DeterministicRng::new(1)).is_empty());
    }

    #[test]
    fn test_swamp_slows_and_acid_paralyzes() {
        let config = HazardConfig::default();
        assert!(matches!(HazardKind::Swamp.effect(&config), HazardEffect::Slow { multiplier, .. } if multiplier < 1.0));
        assert!(matches!(
            HazardKind::AcidPuddle.effect(&config),
            HazardEffect::Status(spec) if spec.kind == crate::game::effects::StatusEffectKind::Paralyze
        ));
    }
}
