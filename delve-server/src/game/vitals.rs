//! Health, Shield and Damage Reduction
//!
//! Only the owner of an entity resolves damage against its vitals. Other
//! peers overwrite their copy with the owner's `HealthChanged` result.

use serde::{Serialize, Deserialize};

/// Health pool of a player, enemy or boss.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    /// Current health, never below zero.
    pub current: f32,
    /// Maximum (base) health.
    pub max: f32,
    /// Absorbs damage before health does.
    pub shield: f32,
    /// Percent of incoming damage ignored (0..=100).
    pub damage_reduction: f32,
}

/// Result of resolving one damage request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DamageOutcome {
    /// Taken by the shield.
    pub absorbed: f32,
    /// Taken by health.
    pub dealt: f32,
    /// Health reached zero.
    pub fatal: bool,
}

impl Vitals {
    /// Full health, no shield, no reduction.
    pub fn new(max: f32) -> Self {
        Self {
            current: max,
            max,
            shield: 0.0,
            damage_reduction: 0.0,
        }
    }

    /// Builder: set damage reduction percent.
    pub fn with_damage_reduction(mut self, percent: f32) -> Self {
        self.damage_reduction = percent.clamp(0.0, 100.0);
        self
    }

    /// Resolve incoming damage.
    ///
    /// `actual = amount * (1 - dr / 100)`; the shield absorbs first and
    /// health takes the remainder. Non-positive or non-finite amounts
    /// change nothing.
    pub fn resolve_damage(&mut self, amount: f32) -> DamageOutcome {
        if !amount.is_finite() || amount <= 0.0 {
            return DamageOutcome { fatal: self.is_depleted(), ..Default::default() };
        }

        let actual = amount * (1.0 - self.damage_reduction / 100.0);
        let absorbed = actual.min(self.shield);
        self.shield -= absorbed;

        let remainder = actual - absorbed;
        let dealt = remainder.min(self.current);
        self.current = (self.current - remainder).max(0.0);

        DamageOutcome {
            absorbed,
            dealt,
            fatal: self.is_depleted(),
        }
    }

    /// Restore health, capped at max.
    pub fn heal(&mut self, amount: f32) {
        if amount.is_finite() && amount > 0.0 {
            self.current = (self.current + amount).min(self.max);
        }
    }

    /// Set health to a fraction of max.
    pub fn restore_fraction(&mut self, fraction: f32) {
        self.current = (self.max * fraction.clamp(0.0, 1.0)).max(0.0);
    }

    /// Overwrite with an owner's broadcast values.
    pub fn mirror(&mut self, current: f32, max: f32, shield: f32) {
        self.current = current.max(0.0);
        self.max = max;
        self.shield = shield.max(0.0);
    }

    /// Is health at zero?
    #[inline]
    pub fn is_depleted(&self) -> bool {
        self.current <= 0.0
    }

    /// Health as a fraction of max.
    pub fn fraction(&self) -> f32 {
        if self.max <= 0.0 {
            0.0
        } else {
            self.current / self.max
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_reduction_applies_first() {
        let mut vitals = Vitals::new(100.0).with_damage_reduction(25.0);
        let outcome = vitals.resolve_damage(40.0);
        assert_eq!(outcome.dealt, 30.0);
        assert_eq!(vitals.current, 70.0);
        assert!(!outcome.fatal);
    }

    #[test]
    fn test_shield_absorbs_before_health() {
        let mut vitals = Vitals::new(100.0);
        vitals.shield = 15.0;

        let outcome = vitals.resolve_damage(20.0);
        assert_eq!(outcome.absorbed, 15.0);
        assert_eq!(outcome.dealt, 5.0);
        assert_eq!(vitals.shield, 0.0);
        assert_eq!(vitals.current, 95.0);
    }

    #[test]
    fn test_fatal_clamps_at_zero() {
        let mut vitals = Vitals::new(10.0);
        let outcome = vitals.resolve_damage(25.0);
        assert!(outcome.fatal);
        assert_eq!(outcome.dealt, 10.0);
        assert_eq!(vitals.current, 0.0);
    }

    #[test]
    fn test_ignores_bad_amounts() {
        let mut vitals = Vitals::new(50.0);
        vitals.resolve_damage(-5.0);
        vitals.resolve_damage(f32::NAN);
        assert_eq!(vitals.current, 50.0);
    }

    #[test]
    fn test_heal_capped() {
        let mut vitals = Vitals::new(50.0);
        vitals.resolve_damage(30.0);
        vitals.heal(100.0);
        assert_eq!(vitals.current, 50.0);

        vitals.restore_fraction(0.5);
        assert_eq!(vitals.current, 25.0);
    }
}
