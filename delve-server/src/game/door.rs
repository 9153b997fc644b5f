//! Door Countdown
//!
//! A debounced timer shared by every player standing in a door. The
//! active duration is recomputed each tick from the current occupancy:
//! a lone player waits longer than a group. Elapsed time survives
//! occupancy changes and resets only when the door empties.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::config::DoorConfig;
use crate::core::secs_to_ticks;
use crate::game::entity::EntityId;

/// Door delays in ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorTiming {
    /// Exactly one occupant.
    pub single: u32,
    /// Two or more occupants.
    pub group: u32,
}

impl DoorTiming {
    /// `single = base + extra`, `group = base`.
    pub fn from_config(config: &DoorConfig) -> Self {
        Self {
            single: secs_to_ticks(config.base_delay + config.single_extra_delay),
            group: secs_to_ticks(config.base_delay),
        }
    }
}

/// Result of advancing a door by one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoorStatus {
    /// Nobody in the door.
    Idle,
    /// Counting towards `duration`.
    Counting {
        /// Ticks spent so far.
        elapsed: u32,
        /// Active duration for the current occupancy.
        duration: u32,
    },
    /// Reached the duration this tick. Reported once until `reset`.
    Expired,
}

/// Shared countdown of one door.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorCountdown {
    occupants: BTreeSet<EntityId>,
    elapsed: u32,
    fired: bool,
}

impl DoorCountdown {
    /// Empty door.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tracked player set with this tick's overlap result.
    pub fn set_occupants(&mut self, occupants: impl IntoIterator<Item = EntityId>) {
        self.occupants = occupants.into_iter().collect();
    }

    /// A player entered.
    pub fn enter(&mut self, player: EntityId) {
        self.occupants.insert(player);
    }

    /// A player left.
    pub fn leave(&mut self, player: EntityId) {
        self.occupants.remove(&player);
    }

    /// Tracked players.
    pub fn occupants(&self) -> &BTreeSet<EntityId> {
        &self.occupants
    }

    /// Ticks counted so far.
    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    /// Duration for the current occupancy, `None` when empty.
    pub fn active_duration(&self, timing: DoorTiming) -> Option<u32> {
        match self.occupants.len() {
            0 => None,
            1 => Some(timing.single),
            _ => Some(timing.group),
        }
    }

    /// Advance one tick.
    pub fn tick(&mut self, timing: DoorTiming) -> DoorStatus {
        let Some(duration) = self.active_duration(timing) else {
            self.reset();
            return DoorStatus::Idle;
        };

        self.elapsed = self.elapsed.saturating_add(1);
        if self.elapsed >= duration && !self.fired {
            self.fired = true;
            return DoorStatus::Expired;
        }

        DoorStatus::Counting { elapsed: self.elapsed, duration }
    }

    /// Back to zero after a teleport (or an empty door).
    pub fn reset(&mut self) {
        self.elapsed = 0;
        self.fired = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> DoorTiming {
        DoorTiming::from_config(&DoorConfig::default())
    }

    fn run_until_expired(door: &mut DoorCountdown, limit: u32) -> Option<u32> {
        (1..=limit).find(|_| door.tick(timing()) == DoorStatus::Expired)
    }

    #[test]
    fn test_timing_from_config() {
        assert_eq!(timing(), DoorTiming { single: 240, group: 60 });
    }

    #[test]
    fn test_group_uses_short_delay() {
        let mut door = DoorCountdown::new();
        door.set_occupants([EntityId(1001), EntityId(2001)]);
        assert_eq!(run_until_expired(&mut door, 500), Some(60));
    }

    #[test]
    fn test_single_uses_long_delay() {
        let mut door = DoorCountdown::new();
        door.enter(EntityId(1001));
        assert_eq!(run_until_expired(&mut door, 500), Some(240));
    }

    #[test]
    fn test_group_then_single_keeps_elapsed() {
        let mut door = DoorCountdown::new();
        door.set_occupants([EntityId(1001), EntityId(2001)]);
        for _ in 0..30 {
            assert_ne!(door.tick(timing()), DoorStatus::Expired);
        }
        assert_eq!(door.elapsed(), 30);

        door.leave(EntityId(2001));
        assert_eq!(door.tick(timing()), DoorStatus::Counting { elapsed: 31, duration: 240 });

        // 240 total, 31 already counted
        assert_eq!(run_until_expired(&mut door, 500), Some(209));
    }

    #[test]
    fn test_empty_door_resets() {
        let mut door = DoorCountdown::new();
        door.enter(EntityId(1001));
        for _ in 0..100 {
            door.tick(timing());
        }
        door.leave(EntityId(1001));
        assert_eq!(door.tick(timing()), DoorStatus::Idle);
        assert_eq!(door.elapsed(), 0);

        door.enter(EntityId(1001));
        assert_eq!(run_until_expired(&mut door, 500), Some(240));
    }

    #[test]
    fn test_expired_reported_once() {
        let mut door = DoorCountdown::new();
        door.set_occupants([EntityId(1001), EntityId(2001)]);
        assert_eq!(run_until_expired(&mut door, 100), Some(60));
        assert!(matches!(door.tick(timing()), DoorStatus::Counting { .. }));

        door.reset();
        assert_eq!(run_until_expired(&mut door, 100), Some(60));
    }
}
