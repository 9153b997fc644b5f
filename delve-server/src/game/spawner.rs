//! Room Batches
//!
//! Enemy counts and trap queues per room, mutated by the authority only.
//! Several rooms can run a batch at once when players split up. After
//! every change the authority broadcasts a [`SpawnerSnapshot`] mirror so a
//! newly elected authority can resume every batch mid-room.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::config::{EnemyAttributes, HazardConfig, SpawnerConfig};
use crate::core::{secs_to_ticks, Cooldown, DeterministicRng, Vec3};
use crate::game::entity::EnemyType;
use crate::game::hazards::HazardPlacement;
use crate::game::layout::GridPos;

/// Count of one enemy type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Enemy type.
    pub enemy_type: EnemyType,
    /// Base amount (session-wide) or amount left to spawn (per batch).
    pub amount: u32,
}

/// Progress of one room's batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Room the batch belongs to.
    pub room: GridPos,
    /// Enemies left to spawn, per type.
    pub entries: Vec<BatchEntry>,
    /// Enemies in the batch.
    pub total: u32,
    /// Not yet defeated.
    pub remaining: u32,
    /// Traps left to place.
    pub hazards: Vec<HazardPlacement>,
}

impl BatchProgress {
    /// Enemies not yet spawned.
    pub fn pending(&self) -> u32 {
        self.entries.iter().map(|e| e.amount).sum()
    }

    /// Enemies still to defeat?
    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    fn is_finished(&self) -> bool {
        !self.is_active() && self.hazards.is_empty()
    }
}

/// Replicated state of the spawner.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnerSnapshot {
    /// Base amounts, grown at every batch start.
    pub base_amounts: Vec<BatchEntry>,
    /// Running batches in room order.
    pub batches: Vec<BatchProgress>,
}

/// An enemy the authority should spawn now.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannedSpawn {
    /// Enemy type.
    pub enemy_type: EnemyType,
    /// Ground position.
    pub position: Vec3,
    /// Attributes to replicate after the spawn.
    pub attributes: EnemyAttributes,
}

#[derive(Clone, Debug)]
struct RoomBatch {
    progress: BatchProgress,
    next_spawn: Cooldown,
    next_hazard: Cooldown,
}

impl RoomBatch {
    fn resume(progress: BatchProgress, now: u64) -> Self {
        Self { progress, next_spawn: Cooldown::ready_at(now), next_hazard: Cooldown::ready_at(now) }
    }
}

/// Spawner for room batches.
#[derive(Clone, Debug)]
pub struct EnemySpawner {
    config: SpawnerConfig,
    hazard_interval: u32,
    base_amounts: Vec<BatchEntry>,
    batches: BTreeMap<GridPos, RoomBatch>,
}

impl EnemySpawner {
    /// Spawner with configured base amounts.
    pub fn new(config: &SpawnerConfig, hazards: &HazardConfig) -> Self {
        let base_amounts = config
            .types
            .iter()
            .map(|t| BatchEntry { enemy_type: t.enemy_type, amount: t.base_amount })
            .collect();
        Self {
            config: config.clone(),
            hazard_interval: secs_to_ticks(hazards.spawn_interval),
            base_amounts,
            batches: BTreeMap::new(),
        }
    }

    /// Is a batch running in `room`?
    pub fn is_active(&self, room: GridPos) -> bool {
        self.batch(room).is_some_and(|b| b.is_active())
    }

    /// Rooms with a batch or traps pending, in room order.
    pub fn rooms(&self) -> Vec<GridPos> {
        self.batches.keys().copied().collect()
    }

    /// Progress of a room's batch.
    pub fn batch(&self, room: GridPos) -> Option<&BatchProgress> {
        self.batches.get(&room).map(|b| &b.progress)
    }

    /// Enemies of a room's batch not yet spawned.
    pub fn pending(&self, room: GridPos) -> u32 {
        self.batch(room).map_or(0, |b| b.pending())
    }

    /// Snapshot for replication.
    pub fn snapshot(&self) -> SpawnerSnapshot {
        SpawnerSnapshot {
            base_amounts: self.base_amounts.clone(),
            batches: self.batches.values().map(|b| b.progress.clone()).collect(),
        }
    }

    /// Scale the base amounts and start a batch in `room` with `hazards`
    /// queued. The first enemy and the first trap are due at `now`.
    /// Returns the batch size.
    pub fn start_batch(&mut self, room: GridPos, now: u64, hazards: Vec<HazardPlacement>) -> u32 {
        let increment = self.config.increment_per_room;
        for base in &mut self.base_amounts {
            base.amount += increment;
        }

        let entries = self.base_amounts.clone();
        let total = entries.iter().map(|e| e.amount).sum();
        let progress = BatchProgress { room, entries, total, remaining: total, hazards };

        debug!(?room, total, hazards = progress.hazards.len(), "room batch started");
        if progress.is_finished() {
            self.batches.remove(&room);
        } else {
            self.batches.insert(room, RoomBatch::resume(progress, now));
        }
        total
    }

    /// Overwrite with a replicated snapshot. A newly elected authority
    /// resumes every batch at `now`.
    pub fn restore(&mut self, snapshot: SpawnerSnapshot, now: u64) {
        self.base_amounts = snapshot.base_amounts;
        self.batches = snapshot
            .batches
            .into_iter()
            .map(|progress| (progress.room, RoomBatch::resume(progress, now)))
            .collect();
    }

    /// Next enemy to spawn in `room` this tick, if one is due.
    pub fn poll_spawn(
        &mut self,
        room: GridPos,
        now: u64,
        room_center: Vec3,
        rng: &mut DeterministicRng,
    ) -> Option<PlannedSpawn> {
        let batch = self.batches.get_mut(&room)?;
        if !batch.next_spawn.is_ready(now) {
            return None;
        }

        let index = pick_type(&batch.progress.entries, rng)?;
        let enemy_type = batch.progress.entries[index].enemy_type;
        let Some(attributes) = self
            .config
            .types
            .iter()
            .find(|t| t.enemy_type == enemy_type)
            .map(|t| t.attributes)
        else {
            warn!(?room, ?enemy_type, "no attributes configured, batch stalled");
            return None;
        };
        batch.progress.entries[index].amount -= 1;

        let position = match rng.choose(&self.config.spawn_points) {
            Some(point) => rng.point_on_ground(room_center + point.offset, point.radius),
            None => room_center.flat(),
        };

        batch.next_spawn.trigger(now, secs_to_ticks(self.config.spawn_interval));
        Some(PlannedSpawn { enemy_type, position, attributes })
    }

    /// Next trap to place in `room` this tick, if one is due.
    pub fn poll_hazard(&mut self, room: GridPos, now: u64) -> Option<HazardPlacement> {
        let batch = self.batches.get_mut(&room)?;
        if batch.progress.hazards.is_empty() || !batch.next_hazard.is_ready(now) {
            return None;
        }

        let placement = batch.progress.hazards.remove(0);
        batch.next_hazard.trigger(now, self.hazard_interval);
        if batch.progress.is_finished() {
            self.batches.remove(&room);
        }
        Some(placement)
    }

    /// A batch enemy of `room` was defeated. Returns `true` when this
    /// cleared the room.
    pub fn on_defeated(&mut self, room: GridPos) -> bool {
        let Some(batch) = self.batches.get_mut(&room) else {
            return false;
        };
        if !batch.progress.is_active() {
            return false;
        }

        batch.progress.remaining -= 1;
        if batch.progress.is_active() {
            return false;
        }

        for entry in &mut batch.progress.entries {
            entry.amount = 0;
        }
        if batch.progress.is_finished() {
            self.batches.remove(&room);
        }
        true
    }
}

/// Random type with amount left: up to one attempt per type, then the
/// first type with amount left.
fn pick_type(entries: &[BatchEntry], rng: &mut DeterministicRng) -> Option<usize> {
    for _ in 0..entries.len() {
        let index = rng.next_index(entries.len());
        if entries[index].amount > 0 {
            return Some(index);
        }
    }
    entries.iter().position(|e| e.amount > 0)
}
