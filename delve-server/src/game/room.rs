//! Room Lifecycle
//!
//! Per-room lock/spawn/clear state. Entry is decided on the authority;
//! other peers apply the resulting scene operations.

use serde::{Serialize, Deserialize};

use crate::game::layout::{DoorMask, GridPos, RoomKind};

/// Coarse lifecycle of a room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomPhase {
    /// Nobody has entered.
    #[default]
    Unvisited,
    /// Entered; enemies may be present.
    Active,
    /// Batch defeated (or nothing to fight).
    Cleared,
}

/// What the authority does for a player entering a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomEntryAction {
    /// Open the doors.
    Unlock,
    /// Lock and start the enemy batch.
    StartBatch,
    /// Lock, play the boss intro and spawn the boss.
    SpawnBoss,
    /// Keep the doors locked.
    Lock,
}

/// Replicated state of one room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomState {
    /// Grid coordinate.
    pub pos: GridPos,
    /// Kind from the layout.
    pub kind: RoomKind,
    /// Door slots from the layout.
    pub doors: DoorMask,
    /// Lifecycle.
    pub phase: RoomPhase,
    /// Enemies (or the boss) already dispatched.
    pub spawned: bool,
    /// Batch defeated.
    pub cleared: bool,
    /// Entered at least once.
    pub visited: bool,
    /// Doors locked.
    pub locked: bool,
}

impl RoomState {
    /// Unvisited, unlocked room.
    pub fn new(pos: GridPos, kind: RoomKind, doors: DoorMask) -> Self {
        Self {
            pos,
            kind,
            doors,
            phase: RoomPhase::Unvisited,
            spawned: false,
            cleared: false,
            visited: false,
            locked: false,
        }
    }

    /// Decide entry on the authority and update local state.
    ///
    /// The boss spawns on the first entry only.
    pub fn on_room_entered(&mut self) -> RoomEntryAction {
        self.visited = true;

        if self.kind == RoomKind::Spawn {
            self.cleared = true;
            self.phase = RoomPhase::Cleared;
            self.unlock();
            return RoomEntryAction::Unlock;
        }

        if self.spawned && self.cleared {
            self.unlock();
            return RoomEntryAction::Unlock;
        }

        if self.spawned {
            self.lock();
            return RoomEntryAction::Lock;
        }

        self.activate();
        match self.kind {
            RoomKind::Boss => RoomEntryAction::SpawnBoss,
            _ => RoomEntryAction::StartBatch,
        }
    }

    /// Mirror of a batch or boss start.
    pub fn activate(&mut self) {
        self.visited = true;
        self.spawned = true;
        self.phase = RoomPhase::Active;
        self.locked = true;
    }

    /// Lock the doors.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Unlock the doors.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Batch defeated: cleared and unlocked.
    pub fn mark_cleared(&mut self) {
        self.cleared = true;
        self.phase = RoomPhase::Cleared;
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(kind: RoomKind) -> RoomState {
        RoomState::new(GridPos::new(1, 1), kind, DoorMask::CLOSED)
    }

    #[test]
    fn test_first_entry_starts_batch_once() {
        let mut normal = room(RoomKind::Normal);
        assert_eq!(normal.on_room_entered(), RoomEntryAction::StartBatch);
        assert!(normal.locked);
        assert_eq!(normal.phase, RoomPhase::Active);

        // Second player walks in mid-fight
        assert_eq!(normal.on_room_entered(), RoomEntryAction::Lock);

        normal.mark_cleared();
        assert!(!normal.locked);
        assert_eq!(normal.on_room_entered(), RoomEntryAction::Unlock);
        assert_eq!(normal.phase, RoomPhase::Cleared);
    }

    #[test]
    fn test_spawn_room_always_unlocks() {
        let mut spawn = room(RoomKind::Spawn);
        assert_eq!(spawn.on_room_entered(), RoomEntryAction::Unlock);
        assert_eq!(spawn.on_room_entered(), RoomEntryAction::Unlock);
        assert!(!spawn.spawned);
    }

    #[test]
    fn test_boss_spawns_once() {
        let mut boss = room(RoomKind::Boss);
        assert_eq!(boss.on_room_entered(), RoomEntryAction::SpawnBoss);
        assert_eq!(boss.on_room_entered(), RoomEntryAction::Lock);

        boss.mark_cleared();
        assert_eq!(boss.on_room_entered(), RoomEntryAction::Unlock);
    }
}
