//! Replicated World
//!
//! One peer's copy of the session: layout, rooms, doors, entities and
//! counters. Uses BTreeMap so iteration order (and therefore every
//! decision derived from it) is identical on every peer.

use std::collections::BTreeMap;

use crate::config::GameConfig;
use crate::core::hash::{StateHash, StateHasher};
use crate::core::Vec3;
use crate::game::door::{DoorCountdown, DoorTiming};
use crate::game::effects::StatusEffects;
use crate::game::entity::{EntityId, EntityState, NetworkedEntity, PeerId};
use crate::game::layout::{Direction, DungeonLayout, GridPos};
use crate::game::physics::RoomGeometry;
use crate::game::room::RoomState;
use crate::game::spawner::EnemySpawner;

/// One peer's view of the session.
#[derive(Clone, Debug)]
pub struct World {
    tick: u64,
    /// Room and door placement.
    pub geometry: RoomGeometry,
    /// Door delays.
    pub door_timing: DoorTiming,
    /// Applied layout.
    pub layout: Option<DungeonLayout>,
    /// Room states by grid position.
    pub rooms: BTreeMap<GridPos, RoomState>,
    /// Door countdowns by room and slot.
    pub doors: BTreeMap<(GridPos, Direction), DoorCountdown>,
    entities: BTreeMap<EntityId, NetworkedEntity>,
    /// Session kill count.
    pub kill_count: u32,
    /// Room batches (authoritative on the master, mirrored elsewhere).
    pub spawner: EnemySpawner,
    /// Status effects on entities this peer owns.
    pub effects: StatusEffects,
    /// Last room each player was seen in (authority entry tracking).
    pub player_rooms: BTreeMap<EntityId, GridPos>,
    /// Every player has fallen.
    pub game_over: bool,
    /// Boss defeated.
    pub victory: bool,
}

impl World {
    /// Empty world.
    pub fn new(config: &GameConfig) -> Self {
        Self {
            tick: 0,
            geometry: RoomGeometry::from_config(&config.dungeon),
            door_timing: DoorTiming::from_config(&config.doors),
            layout: None,
            rooms: BTreeMap::new(),
            doors: BTreeMap::new(),
            entities: BTreeMap::new(),
            kill_count: 0,
            spawner: EnemySpawner::new(&config.spawner, &config.hazards),
            effects: StatusEffects::new(),
            player_rooms: BTreeMap::new(),
            game_over: false,
            victory: false,
        }
    }

    /// Current tick.
    #[inline]
    pub fn now(&self) -> u64 {
        self.tick
    }

    /// Advance the clock; returns the new tick.
    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    // =========================================================================
    // Layout and rooms
    // =========================================================================

    /// Build rooms and doors from a layout, in row-major order.
    pub fn apply_layout(&mut self, layout: DungeonLayout) {
        self.rooms.clear();
        self.doors.clear();

        for (pos, placed) in layout.rooms() {
            let doors = layout.cell(pos).map(|c| c.doors).unwrap_or_default();
            self.rooms.insert(pos, RoomState::new(pos, placed.kind, doors));
            for dir in doors.iter() {
                self.doors.insert((pos, dir), DoorCountdown::new());
            }
        }

        self.layout = Some(layout);
    }

    /// Room state.
    pub fn room(&self, pos: GridPos) -> Option<&RoomState> {
        self.rooms.get(&pos)
    }

    /// Mutable room state.
    pub fn room_mut(&mut self, pos: GridPos) -> Option<&mut RoomState> {
        self.rooms.get_mut(&pos)
    }

    /// Room whose footprint contains `point`.
    pub fn room_at(&self, point: Vec3) -> Option<GridPos> {
        self.rooms
            .keys()
            .copied()
            .find(|&pos| self.geometry.contains(pos, point))
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Insert a spawned entity. Returns `false` if the id is taken.
    ///
    /// A projectile takes the faction of its shooter.
    pub fn insert_entity(&mut self, mut entity: NetworkedEntity) -> bool {
        if self.entities.contains_key(&entity.id) {
            return false;
        }

        if let EntityState::Projectile(projectile) = &mut entity.state {
            projectile.faction = projectile
                .shooter
                .and_then(|shooter| self.entities.get(&shooter))
                .and_then(|shooter| shooter.kind.faction());
        }

        self.entities.insert(entity.id, entity);
        true
    }

    /// Remove an entity and its local bookkeeping.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<NetworkedEntity> {
        let removed = self.entities.remove(&id)?;
        self.player_rooms.remove(&id);
        for door in self.doors.values_mut() {
            door.leave(id);
        }
        Some(removed)
    }

    /// Entity by id.
    pub fn entity(&self, id: EntityId) -> Option<&NetworkedEntity> {
        self.entities.get(&id)
    }

    /// Mutable entity by id.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut NetworkedEntity> {
        self.entities.get_mut(&id)
    }

    /// Does the entity exist locally?
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// All entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &NetworkedEntity> {
        self.entities.values()
    }

    /// Number of entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Ids of all entities, for iterate-and-mutate passes.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Player entities.
    pub fn players(&self) -> impl Iterator<Item = &NetworkedEntity> {
        self.entities
            .values()
            .filter(|e| matches!(e.state, EntityState::Player(_)))
    }

    /// Player entity owned by `peer`.
    pub fn player_of(&self, peer: PeerId) -> Option<EntityId> {
        self.players().find(|e| e.owner == peer).map(|e| e.id)
    }

    /// Closest player that has not fallen.
    pub fn nearest_living_player(&self, from: Vec3) -> Option<(EntityId, Vec3)> {
        self.players()
            .filter(|e| !e.is_down())
            .map(|e| (e.id, e.position, e.position.flat().distance_squared(from.flat())))
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(id, position, _)| (id, position))
    }

    /// At least one player exists and none is standing.
    pub fn all_players_fallen(&self) -> bool {
        let mut players = self.players().peekable();
        players.peek().is_some() && players.all(|p| p.is_down())
    }

    /// Ids of entities owned by `peer`.
    pub fn owned_by(&self, peer: PeerId) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| e.owner == peer)
            .map(|e| e.id)
            .collect()
    }

    // =========================================================================
    // Digest
    // =========================================================================

    /// Digest of replicated state: rooms, counters, entity ownership and
    /// health. Positions are excluded since they are streamed.
    pub fn state_digest(&self) -> StateHash {
        let mut hasher = StateHasher::new(b"DELVE_WORLD_V1");

        hasher.update_u32(self.kill_count);
        hasher.update_bool(self.victory);
        hasher.update_bool(self.game_over);

        hasher.update_u32(self.rooms.len() as u32);
        for room in self.rooms.values() {
            hasher.update_u32(room.pos.x);
            hasher.update_u32(room.pos.y);
            hasher.update_u8(room.doors.0);
            hasher.update_bool(room.spawned);
            hasher.update_bool(room.cleared);
            hasher.update_bool(room.locked);
        }

        hasher.update_u32(self.entities.len() as u32);
        for entity in self.entities.values() {
            hasher.update_u32(entity.id.0);
            hasher.update_u32(entity.owner.0);
            hasher.update_bytes(entity.kind.prefab_name().as_bytes());
            hasher.update_bool(entity.is_down());
            if let Some(vitals) = entity.vitals() {
                hasher.update_f32(vitals.current);
                hasher.update_f32(vitals.max);
            }
        }

        hasher.finalize()
    }
}
