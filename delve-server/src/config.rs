//! Game Configuration
//!
//! Plain data loaded once at startup and shared read-only by every
//! component. Durations are authored in seconds and converted to ticks
//! where they are used.

use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::info;

use crate::core::vec3::Vec3;
use crate::game::effects::{EffectSpec, StatusEffectKind};
use crate::game::entity::{EnemyType, PlayerClass};
use crate::game::hazards::HazardKind;
use crate::game::layout::{GridPos, RoomKind};
use crate::game::skills::SkillSlot;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "DELVE_CONFIG";

/// Largest dungeon grid, in cells.
pub const MAX_GRID_CELLS: u32 = 1 << 16;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`GameConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete game configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Grid size, room placement and room geometry.
    pub dungeon: DungeonConfig,
    /// Door teleport delays.
    pub doors: DoorConfig,
    /// Enemy batches.
    pub spawner: SpawnerConfig,
    /// Player class base stats.
    pub classes: ClassesConfig,
    /// Projectile defaults.
    pub projectile: ProjectileConfig,
    /// Boss stats and attacks.
    pub boss: BossConfig,
    /// Revive after a room is cleared.
    pub revive: ReviveConfig,
    /// Seconds before a defeated enemy is destroyed.
    pub despawn_delay: f32,
    /// Kill counts that unlock skill slots.
    pub skills: SkillRequirements,
    /// Class abilities behind the skill slots.
    pub abilities: AbilityConfig,
    /// Room traps.
    pub hazards: HazardConfig,
    /// Health pickups dropped by enemies.
    pub pickups: PickupConfig,
    /// Peers allowed in one room.
    pub max_peers: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            dungeon: DungeonConfig::default(),
            doors: DoorConfig::default(),
            spawner: SpawnerConfig::default(),
            classes: ClassesConfig::default(),
            projectile: ProjectileConfig::default(),
            boss: BossConfig::default(),
            revive: ReviveConfig::default(),
            despawn_delay: 3.0,
            skills: SkillRequirements::default(),
            abilities: AbilityConfig::default(),
            hazards: HazardConfig::default(),
            pickups: PickupConfig::default(),
            max_peers: 4,
        }
    }
}

/// Dungeon grid and room geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DungeonConfig {
    /// Cells along X.
    pub width: u32,
    /// Cells along Y.
    pub height: u32,
    /// Cell index the carve starts from.
    pub start_cell: u32,
    /// World distance between neighbouring room centres (x, z).
    pub offset: [f32; 2],
    /// Half of a room's side length.
    pub room_half_extent: f32,
    /// Radius of a door trigger.
    pub door_radius: f32,
    /// Distance from a door to its entry point, towards the room centre.
    pub entry_inset: f32,
    /// Room placement rules.
    pub rules: Vec<RoomRule>,
}

impl Default for DungeonConfig {
    fn default() -> Self {
        Self {
            width: 5,
            height: 5,
            start_cell: 0,
            offset: [30.0, 30.0],
            room_half_extent: 12.0,
            door_radius: 2.0,
            entry_inset: 4.0,
            rules: vec![
                RoomRule {
                    name: "hall".to_string(),
                    kind: RoomKind::Normal,
                    min: GridPos::new(0, 0),
                    max: GridPos::new(4, 4),
                    obligatory: false,
                },
                RoomRule {
                    name: "camp".to_string(),
                    kind: RoomKind::Spawn,
                    min: GridPos::new(0, 0),
                    max: GridPos::new(0, 0),
                    obligatory: true,
                },
                RoomRule {
                    name: "lair".to_string(),
                    kind: RoomKind::Boss,
                    min: GridPos::new(4, 4),
                    max: GridPos::new(4, 4),
                    obligatory: true,
                },
            ],
        }
    }
}

/// A room template and where it may be placed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomRule {
    /// Template name.
    pub name: String,
    /// Behaviour of rooms built from this template.
    pub kind: RoomKind,
    /// Inclusive lower corner.
    pub min: GridPos,
    /// Inclusive upper corner.
    pub max: GridPos,
    /// Must be used wherever it applies.
    pub obligatory: bool,
}

impl RoomRule {
    /// 0 = cannot be placed, 1 = may be placed, 2 = must be placed.
    pub fn placement_score(&self, pos: GridPos) -> u8 {
        let inside = pos.x >= self.min.x && pos.x <= self.max.x
            && pos.y >= self.min.y && pos.y <= self.max.y;
        match (inside, self.obligatory) {
            (false, _) => 0,
            (true, false) => 1,
            (true, true) => 2,
        }
    }
}

/// Door countdown durations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorConfig {
    /// Delay when several players stand on the door.
    pub base_delay: f32,
    /// Added to the base delay when exactly one player is present.
    pub single_extra_delay: f32,
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self { base_delay: 1.0, single_extra_delay: 3.0 }
    }
}

/// Enemy batch configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnerConfig {
    /// Seconds between spawns.
    pub spawn_interval: f32,
    /// Added to every type's base amount per batch.
    pub increment_per_room: u32,
    /// Enemy types in a batch.
    pub types: Vec<EnemyTypeConfig>,
    /// Spawn points relative to the room centre.
    pub spawn_points: Vec<SpawnPointConfig>,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            spawn_interval: 5.0,
            increment_per_room: 1,
            types: vec![
                EnemyTypeConfig {
                    enemy_type: EnemyType::Melee,
                    base_amount: 1,
                    attributes: EnemyAttributes {
                        max_health: 50.0,
                        movement_speed: 3.5,
                        attack_damage: 10.0,
                        attack_rate: 1.5,
                        attack_range: 2.0,
                    },
                },
                EnemyTypeConfig {
                    enemy_type: EnemyType::Ranged,
                    base_amount: 0,
                    attributes: EnemyAttributes {
                        max_health: 30.0,
                        movement_speed: 3.0,
                        attack_damage: 8.0,
                        attack_rate: 2.5,
                        attack_range: 12.0,
                    },
                },
            ],
            spawn_points: vec![
                SpawnPointConfig { offset: Vec3::new(-6.0, 0.0, 6.0), radius: 2.0 },
                SpawnPointConfig { offset: Vec3::new(6.0, 0.0, 6.0), radius: 2.0 },
                SpawnPointConfig { offset: Vec3::new(0.0, 0.0, -6.0), radius: 2.0 },
            ],
        }
    }
}

/// One enemy type of a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnemyTypeConfig {
    /// Type tag.
    pub enemy_type: EnemyType,
    /// Starting base amount before the first increment.
    pub base_amount: u32,
    /// Attributes replicated after the spawn.
    pub attributes: EnemyAttributes,
}

/// Enemy attributes sent with `InitializeEnemy`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnemyAttributes {
    /// Starting and maximum health.
    pub max_health: f32,
    /// Units per second.
    pub movement_speed: f32,
    /// Damage per attack.
    pub attack_damage: f32,
    /// Seconds between attacks.
    pub attack_rate: f32,
    /// Reach of an attack.
    pub attack_range: f32,
}

/// A spawn point inside a room.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnPointConfig {
    /// Offset from the room centre.
    pub offset: Vec3,
    /// Enemies appear within this radius.
    pub radius: f32,
}

/// Base stats per player class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassesConfig {
    /// Melee class.
    pub warrior: ClassStats,
    /// Ranged class.
    pub archer: ClassStats,
}

impl ClassesConfig {
    /// Stats for a class.
    pub fn stats(&self, class: PlayerClass) -> &ClassStats {
        match class {
            PlayerClass::Warrior => &self.warrior,
            PlayerClass::Archer => &self.archer,
        }
    }
}

impl Default for ClassesConfig {
    fn default() -> Self {
        Self {
            warrior: ClassStats {
                health: 150.0,
                damage: 20.0,
                attack_speed: 1.0,
                speed: 5.0,
                damage_reduction: 10.0,
            },
            archer: ClassStats {
                health: 100.0,
                damage: 15.0,
                attack_speed: 1.2,
                speed: 6.0,
                damage_reduction: 0.0,
            },
        }
    }
}

/// Base stats of a class.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    /// Base (maximum) health.
    pub health: f32,
    /// Damage per hit.
    pub damage: f32,
    /// Attacks per second.
    pub attack_speed: f32,
    /// Units per second.
    pub speed: f32,
    /// Percent of incoming damage ignored.
    pub damage_reduction: f32,
}

/// Projectile defaults, used when a projectile has no payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileConfig {
    /// Units per second.
    pub speed: f32,
    /// Seconds before the owner destroys it.
    pub lifetime: f32,
    /// Hit test radius.
    pub hit_radius: f32,
    /// Damage without a payload.
    pub default_damage: f32,
}

impl Default for ProjectileConfig {
    fn default() -> Self {
        Self { speed: 10.0, lifetime: 5.0, hit_radius: 0.75, default_damage: 10.0 }
    }
}

/// Boss stats and attack timings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BossConfig {
    /// Maximum health.
    pub max_health: f32,
    /// Fireball damage.
    pub damage: f32,
    /// Units per second.
    pub move_speed: f32,
    /// Seconds between nearest-player searches.
    pub target_check_interval: f32,
    /// Seconds between fireballs.
    pub fireball_cooldown: f32,
    /// Seconds between meteor showers.
    pub meteor_cooldown: f32,
    /// Seconds a meteor shower lasts.
    pub meteor_duration: f32,
    /// Meteors per shower.
    pub meteor_count: u32,
    /// Radius of the shower around its centre.
    pub meteor_area_radius: f32,
    /// Radius of one impact.
    pub meteor_impact_radius: f32,
    /// Damage of one impact.
    pub meteor_damage: f32,
    /// Seconds between minion summons.
    pub summon_cooldown: f32,
    /// Distance of summon points from the boss.
    pub summon_radius: f32,
    /// Minions per summon.
    pub minion_count: u32,
    /// Attributes of a minion.
    pub minion: EnemyAttributes,
    /// Phase thresholds, highest first.
    pub phases: Vec<PhaseConfig>,
    /// Seconds before a defeated boss is destroyed.
    pub despawn_delay: f32,
}

impl Default for BossConfig {
    fn default() -> Self {
        Self {
            max_health: 1000.0,
            damage: 30.0,
            move_speed: 5.0,
            target_check_interval: 0.5,
            fireball_cooldown: 3.0,
            meteor_cooldown: 3.0,
            meteor_duration: 6.0,
            meteor_count: 12,
            meteor_area_radius: 8.0,
            meteor_impact_radius: 2.0,
            meteor_damage: 25.0,
            summon_cooldown: 60.0,
            summon_radius: 4.0,
            minion_count: 3,
            minion: EnemyAttributes {
                max_health: 40.0,
                movement_speed: 4.0,
                attack_damage: 8.0,
                attack_rate: 1.5,
                attack_range: 2.0,
            },
            phases: vec![
                PhaseConfig { name: "enraged".to_string(), health_pct: 75.0 },
                PhaseConfig { name: "scorched".to_string(), health_pct: 50.0 },
                PhaseConfig { name: "desperate".to_string(), health_pct: 25.0 },
            ],
            despawn_delay: 15.0,
        }
    }
}

/// A boss phase threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Display name.
    pub name: String,
    /// Entered when health <= this percent of max.
    pub health_pct: f32,
}

/// Revive settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviveConfig {
    /// Fraction of base health restored.
    pub health_fraction: f32,
    /// Seconds before a revived player regains control.
    pub rise_delay: f32,
}

impl Default for ReviveConfig {
    fn default() -> Self {
        Self { health_fraction: 0.5, rise_delay: 2.5 }
    }
}

/// Kill counts required per skill slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillRequirements {
    /// Dash slot.
    pub dash: u32,
    /// Primary skill slot.
    pub primary: u32,
    /// Secondary skill slot.
    pub secondary: u32,
}

impl Default for SkillRequirements {
    fn default() -> Self {
        Self { dash: 5, primary: 10, secondary: 15 }
    }
}

// =============================================================================
// ABILITIES
// =============================================================================

/// Class abilities, one per class and skill slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityConfig {
    /// Dash slot, both classes.
    pub dash: DashConfig,
    /// Warrior primary: instant heal and regeneration.
    pub mend: MendConfig,
    /// Archer primary: arrows cause bleeding.
    pub hemorrhage: HemorrhageConfig,
    /// Warrior secondary: cone strike that paralyzes.
    pub front_spike: FrontSpikeConfig,
    /// Archer secondary: fan of arrows.
    pub shock_blast: ShockBlastConfig,
}

impl AbilityConfig {
    /// Seconds before a slot can be used again.
    pub fn cooldown(&self, class: PlayerClass, slot: SkillSlot) -> f32 {
        match (slot, class) {
            (SkillSlot::Dash, _) => self.dash.cooldown,
            (SkillSlot::Primary, PlayerClass::Warrior) => self.mend.cooldown,
            (SkillSlot::Primary, PlayerClass::Archer) => self.hemorrhage.cooldown,
            (SkillSlot::Secondary, PlayerClass::Warrior) => self.front_spike.cooldown,
            (SkillSlot::Secondary, PlayerClass::Archer) => self.shock_blast.cooldown,
        }
    }
}

impl Default for AbilityConfig {
    fn default() -> Self {
        Self {
            dash: DashConfig {
                cooldown: 3.0,
                duration: 0.5,
                speed_multiplier: 3.0,
                guard: 50.0,
                barrier: 25.0,
            },
            mend: MendConfig {
                cooldown: 15.0,
                instant_fraction: 0.05,
                regen_fraction: 0.02,
                duration: 5.0,
            },
            hemorrhage: HemorrhageConfig {
                cooldown: 15.0,
                duration: 10.0,
                bleed: EffectSpec {
                    kind: StatusEffectKind::Bleed,
                    damage_per_tick: 10.0,
                    duration: 6.0,
                    tick_interval: 1.0,
                },
            },
            front_spike: FrontSpikeConfig {
                cooldown: 10.0,
                angle: 90.0,
                radius: 6.0,
                damage_multiplier: 2.0,
                paralyze: EffectSpec {
                    kind: StatusEffectKind::Paralyze,
                    damage_per_tick: 5.0,
                    duration: 2.0,
                    tick_interval: 1.0,
                },
            },
            shock_blast: ShockBlastConfig {
                cooldown: 10.0,
                projectiles: 5,
                spread: 60.0,
                damage_multiplier: 1.5,
            },
        }
    }
}

/// Short burst of speed; the warrior also guards, the archer gains a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashConfig {
    /// Seconds between uses.
    pub cooldown: f32,
    /// Seconds the burst lasts.
    pub duration: f32,
    /// Applied to base speed.
    pub speed_multiplier: f32,
    /// Warrior damage reduction percent while dashing.
    pub guard: f32,
    /// Archer shield while dashing.
    pub barrier: f32,
}

/// Warrior heal over time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MendConfig {
    /// Seconds between uses.
    pub cooldown: f32,
    /// Fraction of max health restored at once.
    pub instant_fraction: f32,
    /// Fraction of max health restored every second.
    pub regen_fraction: f32,
    /// Seconds of regeneration.
    pub duration: f32,
}

/// Archer bleeding arrows.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HemorrhageConfig {
    /// Seconds between uses.
    pub cooldown: f32,
    /// Seconds the arrows carry the effect.
    pub duration: f32,
    /// Effect carried by each arrow.
    pub bleed: EffectSpec,
}

/// Warrior cone strike.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontSpikeConfig {
    /// Seconds between uses.
    pub cooldown: f32,
    /// Full cone angle in degrees.
    pub angle: f32,
    /// Reach of the cone.
    pub radius: f32,
    /// Applied to the class damage.
    pub damage_multiplier: f32,
    /// Effect on every enemy hit.
    pub paralyze: EffectSpec,
}

/// Archer fan of arrows.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShockBlastConfig {
    /// Seconds between uses.
    pub cooldown: f32,
    /// Arrows per blast.
    pub projectiles: u32,
    /// Angle between the outermost arrows in degrees.
    pub spread: f32,
    /// Applied to the class damage.
    pub damage_multiplier: f32,
}

// =============================================================================
// HAZARDS AND PICKUPS
// =============================================================================

/// Room trap placement and effects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardConfig {
    /// Seconds between trap placements in a room.
    pub spawn_interval: f32,
    /// Seconds between overlap checks of one trap.
    pub check_interval: f32,
    /// Radius of a trap.
    pub radius: f32,
    /// Swamp speed multiplier.
    pub slow_multiplier: f32,
    /// Seconds a swamp slow outlives the last check.
    pub slow_linger: f32,
    /// Acid puddle effect.
    pub paralyze: EffectSpec,
    /// Traps per room, by type.
    pub types: Vec<HazardTypeConfig>,
    /// Trap positions relative to the room centre.
    pub spawn_points: Vec<Vec3>,
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            spawn_interval: 5.0,
            check_interval: 0.5,
            radius: 1.5,
            slow_multiplier: 0.7,
            slow_linger: 1.0,
            paralyze: EffectSpec {
                kind: StatusEffectKind::Paralyze,
                damage_per_tick: 2.0,
                duration: 3.0,
                tick_interval: 1.0,
            },
            types: vec![
                HazardTypeConfig { kind: HazardKind::AcidPuddle, amount: 1 },
                HazardTypeConfig { kind: HazardKind::Swamp, amount: 1 },
            ],
            spawn_points: vec![
                Vec3::new(-4.0, 0.0, 0.0),
                Vec3::new(4.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 4.0),
            ],
        }
    }
}

/// Traps of one type per room.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HazardTypeConfig {
    /// Trap archetype.
    pub kind: HazardKind,
    /// Placed per room.
    pub amount: u32,
}

/// Health pickups.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickupConfig {
    /// Chance a defeated batch enemy drops one.
    pub drop_chance: f32,
    /// Health restored.
    pub heal: f32,
    /// Collection radius.
    pub radius: f32,
}

impl Default for PickupConfig {
    fn default() -> Self {
        Self { drop_chance: 0.3, heal: 20.0, radius: 1.0 }
    }
}

// =============================================================================
// LOADING
// =============================================================================

impl GameConfig {
    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        info!(path = %path.display(), "Loaded game config");
        Ok(config)
    }

    /// Parse and validate JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `DELVE_CONFIG`, or defaults if unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_json_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.dungeon;
        if d.width == 0 || d.height == 0 {
            return invalid("dungeon size must be at least 1x1");
        }
        let cells = match d.width.checked_mul(d.height) {
            Some(cells) if cells <= MAX_GRID_CELLS => cells,
            _ => {
                return invalid(format!(
                    "{}x{} grid exceeds {} cells", d.width, d.height, MAX_GRID_CELLS
                ))
            }
        };
        if d.start_cell >= cells {
            return invalid(format!(
                "start cell {} outside {}x{} grid", d.start_cell, d.width, d.height
            ));
        }
        if d.rules.is_empty() {
            return invalid("at least one room rule is required");
        }
        for rule in &d.rules {
            if rule.min.x > rule.max.x || rule.min.y > rule.max.y {
                return invalid(format!("room rule '{}' has min > max", rule.name));
            }
        }
        if d.offset.iter().any(|v| !positive(*v)) || !positive(d.room_half_extent) {
            return invalid("room offset and extent must be positive");
        }
        if !non_negative(d.door_radius) || !non_negative(d.entry_inset) {
            return invalid("door radius and entry inset must not be negative");
        }

        if !non_negative(self.doors.base_delay) || !non_negative(self.doors.single_extra_delay) {
            return invalid("door delays must not be negative");
        }
        if self.max_peers == 0 {
            return invalid("max_peers must be at least 1");
        }

        let s = &self.spawner;
        if !positive(s.spawn_interval) {
            return invalid("spawn interval must be positive");
        }
        if s.types.is_empty() {
            return invalid("at least one enemy type is required");
        }
        if s.spawn_points.is_empty() {
            return invalid("at least one spawn point is required");
        }
        for t in &s.types {
            check_attributes(&t.attributes)?;
        }

        for stats in [&self.classes.warrior, &self.classes.archer] {
            if !positive(stats.health) || !non_negative(stats.speed) {
                return invalid("class health must be positive");
            }
            if !(0.0..=100.0).contains(&stats.damage_reduction) {
                return invalid("damage reduction must be within 0..=100");
            }
        }

        let p = &self.projectile;
        if !positive(p.speed) || !positive(p.lifetime) || !positive(p.hit_radius) {
            return invalid("projectile speed, lifetime and radius must be positive");
        }

        let b = &self.boss;
        if !positive(b.max_health) {
            return invalid("boss health must be positive");
        }
        check_attributes(&b.minion)?;
        if b.phases.iter().any(|ph| !(ph.health_pct > 0.0 && ph.health_pct <= 100.0)) {
            return invalid("boss phase thresholds must be within (0, 100]");
        }

        let a = &self.abilities;
        let cooldowns = [
            a.dash.cooldown,
            a.mend.cooldown,
            a.hemorrhage.cooldown,
            a.front_spike.cooldown,
            a.shock_blast.cooldown,
        ];
        if cooldowns.iter().any(|c| !non_negative(*c)) {
            return invalid("ability cooldowns must not be negative");
        }
        if !positive(a.dash.speed_multiplier) || !(0.0..=100.0).contains(&a.dash.guard) {
            return invalid("dash speed must be positive and guard within 0..=100");
        }
        if !(0.0..=360.0).contains(&a.front_spike.angle) || !positive(a.front_spike.radius) {
            return invalid("front spike angle must be within 0..=360 and radius positive");
        }
        if a.shock_blast.projectiles == 0 {
            return invalid("shock blast needs at least one projectile");
        }

        let h = &self.hazards;
        if !positive(h.spawn_interval) || !positive(h.check_interval) || !positive(h.radius) {
            return invalid("hazard intervals and radius must be positive");
        }
        if !(0.0..=1.0).contains(&h.slow_multiplier) {
            return invalid("hazard slow multiplier must be within 0..=1");
        }

        let pk = &self.pickups;
        if !(0.0..=1.0).contains(&pk.drop_chance) || !non_negative(pk.heal) || !positive(pk.radius) {
            return invalid("pickup drop chance must be within 0..=1");
        }

        let r = &self.revive;
        if !(r.health_fraction > 0.0 && r.health_fraction <= 1.0) {
            return invalid("revive health fraction must be within (0, 1]");
        }
        if !non_negative(r.rise_delay) || !non_negative(self.despawn_delay) {
            return invalid("delays must not be negative");
        }

        Ok(())
    }
}

fn check_attributes(a: &EnemyAttributes) -> Result<(), ConfigError> {
    if !positive(a.max_health) || !positive(a.attack_rate) {
        return invalid("enemy health and attack rate must be positive");
    }
    if !non_negative(a.movement_speed) || !non_negative(a.attack_range) {
        return invalid("enemy speed and range must not be negative");
    }
    Ok(())
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f32) -> bool {
    v.is_finite() && v >= 0.0
}

fn invalid<T>(msg: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.despawn_delay, 3.0);
        assert_eq!(config.skills.secondary, 15);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = GameConfig::from_json(r#"{"dungeon": {"width": 3, "height": 2}}"#).unwrap();
        assert_eq!(config.dungeon.width, 3);
        assert_eq!(config.dungeon.height, 2);
        assert_eq!(config.doors.base_delay, 1.0);
    }

    #[test]
    fn test_invalid_start_cell() {
        let err = GameConfig::from_json(r#"{"dungeon": {"width": 2, "height": 2, "start_cell": 4}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let err = GameConfig::from_json(r#"{"dungeon": {"width": 65536, "height": 65536}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("exceeds")));

        let mut config = GameConfig::default();
        config.dungeon.width = u32::MAX;
        config.dungeon.height = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ability_cooldowns_per_class() {
        let a = AbilityConfig::default();
        assert_eq!(a.cooldown(PlayerClass::Warrior, SkillSlot::Dash), a.cooldown(PlayerClass::Archer, SkillSlot::Dash));
        assert_eq!(a.cooldown(PlayerClass::Warrior, SkillSlot::Primary), a.mend.cooldown);
        assert_eq!(a.cooldown(PlayerClass::Archer, SkillSlot::Secondary), a.shock_blast.cooldown);
    }

    #[test]
    fn test_hazard_and_pickup_ranges() {
        let mut config = GameConfig::default();
        config.hazards.slow_multiplier = 1.5;
        assert!(config.validate().is_err());

        let mut config = GameConfig::default();
        config.pickups.drop_chance = -0.1;
        assert!(config.validate().is_err());

        let config = GameConfig::from_json(r#"{"hazards": {"types": []}, "pickups": {"drop_chance": 1.0}}"#).unwrap();
        assert!(config.hazards.types.is_empty());
        assert_eq!(config.pickups.heal, 20.0);
    }

    #[test]
    fn test_negative_delay_rejected() {
        let mut config = GameConfig::default();
        config.doors.single_extra_delay = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delve.json");
        std::fs::write(&path, r#"{"despawn_delay": 1.5}"#).unwrap();

        let config = GameConfig::from_json_file(&path).unwrap();
        assert_eq!(config.despawn_delay, 1.5);

        let missing = GameConfig::from_json_file(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_placement_score() {
        let rule = RoomRule {
            name: "x".to_string(),
            kind: RoomKind::Normal,
            min: GridPos::new(1, 1),
            max: GridPos::new(2, 3),
            obligatory: false,
        };
        assert_eq!(rule.placement_score(GridPos::new(0, 0)), 0);
        assert_eq!(rule.placement_score(GridPos::new(2, 3)), 1);
        let must = RoomRule { obligatory: true, ..rule };
        assert_eq!(must.placement_score(GridPos::new(1, 2)), 2);
    }
}
