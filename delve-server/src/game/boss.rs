//! Boss Brain
//!
//! Phase thresholds, attack cooldowns and the seeded meteor shower.
//! Decisions are made only on the authority peer; everyone else sees the
//! projectiles, minions and effects it spawns.

use serde::{Serialize, Deserialize};

use crate::config::BossConfig;
use crate::core::{secs_to_ticks, Cooldown, DeterministicRng, Timer, Vec3};
use crate::game::entity::EntityId;
use crate::game::vitals::Vitals;

/// Fireballs aim this far ahead of the target.
pub const FIREBALL_LEAD: f32 = 1.5;

const FIREBALL_CAST_SECS: f32 = 0.8;
const SUMMON_CAST_SECS: f32 = 2.0;
const RECOVERY_SECS: f32 = 0.5;

// =============================================================================
// ATTACKS AND PHASES
// =============================================================================

/// Boss attacks, in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BossAttack {
    /// Single projectile at the target.
    Fireball,
    /// Seeded meteor shower around the boss.
    MeteorShower,
    /// Minions at the summon points.
    Summon,
}

/// A health threshold that triggers once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BossPhase {
    /// Display name.
    pub name: String,
    /// Percent of max health.
    pub health_pct: f32,
    /// Already entered?
    pub triggered: bool,
}

// =============================================================================
// BOSS STATE
// =============================================================================

/// Replicated boss state. Cooldowns and target are meaningful only on
/// the authority copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BossState {
    /// Health pool.
    pub vitals: Vitals,
    /// Fireball damage.
    pub damage: f32,
    /// Units per second.
    pub move_speed: f32,
    /// Configured phases.
    pub phases: Vec<BossPhase>,
    /// First phase index considered by the next check.
    pub phase_index: usize,
    /// Last phase entered.
    pub current_phase: Option<usize>,
    /// Defeated?
    pub dead: bool,
    /// Player being chased.
    pub target: Option<EntityId>,
    /// Next nearest-player search.
    pub retarget: Cooldown,
    /// Fireball cooldown.
    pub fireball: Cooldown,
    /// Meteor shower cooldown.
    pub meteor: Cooldown,
    /// Summon cooldown.
    pub summon: Cooldown,
    /// Running while the boss casts; no movement or attacks.
    pub casting: Timer,
    /// Runs after death; the owner destroys the boss when it fires.
    pub despawn: Timer,
}

impl BossState {
    /// Fresh boss; every attack is ready at `now`.
    pub fn new(config: &BossConfig, now: u64) -> Self {
        Self {
            vitals: Vitals::new(config.max_health),
            damage: config.damage,
            move_speed: config.move_speed,
            phases: config
                .phases
                .iter()
                .map(|p| BossPhase { name: p.name.clone(), health_pct: p.health_pct, triggered: false })
                .collect(),
            phase_index: 0,
            current_phase: None,
            dead: false,
            target: None,
            retarget: Cooldown::ready_at(now),
            fireball: Cooldown::ready_at(now),
            meteor: Cooldown::ready_at(now),
            summon: Cooldown::ready_at(now),
            casting: Timer::idle(),
            despawn: Timer::idle(),
        }
    }

    /// Restart the brain on a newly elected authority.
    pub fn rearm(&mut self, now: u64) {
        self.target = None;
        self.casting.cancel();
        self.retarget = Cooldown::ready_at(now);
        self.fireball = Cooldown::ready_at(now.max(self.fireball.ready_tick()));
        self.meteor = Cooldown::ready_at(now.max(self.meteor.ready_tick()));
        self.summon = Cooldown::ready_at(now.max(self.summon.ready_tick()));
    }

    /// Can the brain act this tick?
    pub fn is_idle(&self) -> bool {
        !self.dead && !self.casting.is_running()
    }

    /// First attack off cooldown: fireball, then meteor, then summon.
    pub fn next_attack(&self, now: u64) -> Option<BossAttack> {
        if self.fireball.is_ready(now) {
            Some(BossAttack::Fireball)
        } else if self.meteor.is_ready(now) {
            Some(BossAttack::MeteorShower)
        } else if self.summon.is_ready(now) {
            Some(BossAttack::Summon)
        } else {
            None
        }
    }

    /// Consume the attack's cooldown and start casting.
    pub fn commit_attack(&mut self, attack: BossAttack, now: u64, config: &BossConfig) {
        let busy = match attack {
            BossAttack::Fireball => {
                self.fireball.trigger(now, secs_to_ticks(config.fireball_cooldown));
                FIREBALL_CAST_SECS + RECOVERY_SECS
            }
            BossAttack::MeteorShower => {
                self.meteor.trigger(now, secs_to_ticks(config.meteor_cooldown));
                config.meteor_duration
            }
            BossAttack::Summon => {
                self.summon.trigger(now, secs_to_ticks(config.summon_cooldown));
                SUMMON_CAST_SECS + RECOVERY_SECS
            }
        };
        self.casting.start(secs_to_ticks(busy));
    }

    /// Enter at most one new phase whose threshold current health has
    /// crossed, scanning from the current phase index. Returns the phase
    /// entered.
    pub fn check_phase(&mut self) -> Option<usize> {
        let threshold_base = self.vitals.max / 100.0;
        let current = self.vitals.current;

        let entered = (self.phase_index..self.phases.len()).find(|&i| {
            let phase = &self.phases[i];
            !phase.triggered && current <= phase.health_pct * threshold_base
        })?;

        self.phases[entered].triggered = true;
        self.phase_index = entered;
        self.current_phase = Some(entered);
        Some(entered)
    }

    /// Name of the current phase.
    pub fn phase_name(&self) -> Option<&str> {
        self.current_phase.map(|i| self.phases[i].name.as_str())
    }
}

// =============================================================================
// SUMMON POINTS
// =============================================================================

/// Points on a ring around the boss, starting on +X.
pub fn summon_points(center: Vec3, radius: f32, count: u32) -> Vec<Vec3> {
    (0..count)
        .map(|i| {
            let angle = std::f32::consts::TAU * i as f32 / count as f32;
            Vec3::new(center.x + radius * angle.cos(), 0.0, center.z + radius * angle.sin())
        })
        .collect()
}

// =============================================================================
// METEOR SHOWER
// =============================================================================

/// One scheduled impact.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeteorImpact {
    /// Ticks after the shower starts.
    pub at: u32,
    /// Ground position.
    pub position: Vec3,
}

/// Derive every impact of a shower from its seed.
///
/// Impacts are spread evenly over the duration; positions are uniform in
/// the shower area. Every peer computes the same list from the same seed.
pub fn meteor_impacts(seed: u64, center: Vec3, config: &BossConfig) -> Vec<MeteorImpact> {
    let mut rng = DeterministicRng::new(seed);
    let duration = secs_to_ticks(config.meteor_duration);
    let count = config.meteor_count.max(1);

    (0..count)
        .map(|i| MeteorImpact {
            at: (i as u64 * duration as u64 / count as u64) as u32,
            position: rng.point_on_ground(center, config.meteor_area_radius),
        })
        .collect()
}

/// A running meteor shower effect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeteorShower {
    /// Seed shared through the spawn payload.
    pub seed: u64,
    /// Scheduled impacts.
    pub impacts: Vec<MeteorImpact>,
    /// Ticks since the shower started.
    pub elapsed: u32,
    /// Next impact index.
    pub next: usize,
}

impl MeteorShower {
    /// Build from a seed.
    pub fn new(seed: u64, center: Vec3, config: &BossConfig) -> Self {
        Self {
            seed,
            impacts: meteor_impacts(seed, center, config),
            elapsed: 0,
            next: 0,
        }
    }

    /// Advance one tick; returns impacts landing this tick.
    pub fn tick(&mut self) -> Vec<MeteorImpact> {
        let mut landed = Vec::new();
        while let Some(impact) = self.impacts.get(self.next) {
            if impact.at > self.elapsed {
                break;
            }
            landed.push(*impact);
            self.next += 1;
        }
        self.elapsed += 1;
        landed
    }

    /// All impacts landed?
    pub fn is_finished(&self) -> bool {
        self.next >= self.impacts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BossConfig {
        BossConfig::default()
    }

    #[test]
    fn test_attack_priority() {
        let cfg = config();
        let mut boss = BossState::new(&cfg, 0);
        assert_eq!(boss.next_attack(0), Some(BossAttack::Fireball));

        boss.commit_attack(BossAttack::Fireball, 0, &cfg);
        assert_eq!(boss.next_attack(0), Some(BossAttack::MeteorShower));

        boss.commit_attack(BossAttack::MeteorShower, 0, &cfg);
        assert_eq!(boss.next_attack(0), Some(BossAttack::Summon));

        boss.commit_attack(BossAttack::Summon, 0, &cfg);
        assert_eq!(boss.next_attack(0), None);
        assert_eq!(boss.next_attack(180), Some(BossAttack::Fireball));
        assert!(!boss.is_idle());
    }

    #[test]
    fn test_phases_trigger_once_in_order() {
        let mut boss = BossState::new(&config(), 0);
        assert_eq!(boss.check_phase(), None);

        boss.vitals.resolve_damage(300.0);
        assert_eq!(boss.check_phase(), Some(0));
        assert_eq!(boss.check_phase(), None);

        // Big hit crosses two thresholds; one phase per check
        boss.vitals.resolve_damage(500.0);
        assert_eq!(boss.check_phase(), Some(1));
        assert_eq!(boss.check_phase(), Some(2));
        assert_eq!(boss.phase_name(), Some("desperate"));
        assert_eq!(boss.check_phase(), None);
    }

    #[test]
    fn test_meteor_impacts_seeded() {
        let cfg = config();
        let center = Vec3::new(120.0, 0.0, -120.0);

        let a = meteor_impacts(42, center, &cfg);
        let b = meteor_impacts(42, center, &cfg);
        let c = meteor_impacts(43, center, &cfg);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), cfg.meteor_count as usize);
        for impact in &a {
            assert!(impact.position.distance_squared(center) <= cfg.meteor_area_radius.powi(2) + 1e-3);
            assert_eq!(impact.position.y, 0.0);
        }
    }

    #[test]
    fn test_shower_lands_every_impact() {
        let cfg = config();
        let mut shower = MeteorShower::new(7, Vec3::ZERO, &cfg);
        let mut landed = 0;
        for _ in 0..secs_to_ticks(cfg.meteor_duration) {
            landed += shower.tick().len();
        }
        assert_eq!(landed, cfg.meteor_count as usize);
        assert!(shower.is_finished());
    }

    #[test]
    fn test_summon_points_on_ring() {
        let points = summon_points(Vec3::new(10.0, 0.0, 10.0), 4.0, 3);
        assert_eq!(points.len(), 3);
        for p in points {
            assert!((p.distance_squared(Vec3::new(10.0, 0.0, 10.0)) - 16.0).abs() < 1e-3);
        }
    }
}
