//! Room Geometry and Trigger Queries
//!
//! The session never decides overlap itself; it asks a [`PhysicsQuery`]
//! which entities are inside a room, a door or a projectile's hit volume.
//! [`ProximityPhysics`] answers with plain distance checks on the ground
//! plane; an engine integration can supply its own implementation.

use serde::{Serialize, Deserialize};

use crate::config::DungeonConfig;
use crate::core::Vec3;
use crate::game::entity::{EntityId, EntityKind};
use crate::game::layout::{Direction, GridPos};
use crate::game::world::World;

/// Something that can be overlapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Room volume; yields player entities.
    Room(GridPos),
    /// Door volume; yields player entities.
    Door(GridPos, Direction),
    /// Projectile hit volume; yields damageable entities.
    Projectile(EntityId),
}

/// Overlap queries against the world.
pub trait PhysicsQuery {
    /// Entities currently overlapping `trigger`, in id order.
    fn overlaps(&self, world: &World, trigger: Trigger) -> Vec<EntityId>;
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// World placement of rooms and doors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomGeometry {
    /// Distance between room centres (x, z).
    pub offset: [f32; 2],
    /// Half side length of a room.
    pub half_extent: f32,
    /// Door trigger radius.
    pub door_radius: f32,
    /// Entry point distance from a door.
    pub entry_inset: f32,
}

impl RoomGeometry {
    /// Geometry from config.
    pub fn from_config(config: &DungeonConfig) -> Self {
        Self {
            offset: config.offset,
            half_extent: config.room_half_extent,
            door_radius: config.door_radius,
            entry_inset: config.entry_inset,
        }
    }

    /// Room centre: `(x * offset.x, 0, -y * offset.y)`.
    pub fn room_center(&self, pos: GridPos) -> Vec3 {
        Vec3::new(pos.x as f32 * self.offset[0], 0.0, -(pos.y as f32) * self.offset[1])
    }

    /// Unit vector from a room centre towards a door.
    pub fn door_normal(dir: Direction) -> Vec3 {
        match dir {
            Direction::Up => Vec3::new(0.0, 0.0, 1.0),
            Direction::Down => Vec3::new(0.0, 0.0, -1.0),
            Direction::Right => Vec3::new(1.0, 0.0, 0.0),
            Direction::Left => Vec3::new(-1.0, 0.0, 0.0),
        }
    }

    /// Door trigger centre.
    pub fn door_position(&self, pos: GridPos, dir: Direction) -> Vec3 {
        self.room_center(pos) + Self::door_normal(dir) * self.half_extent
    }

    /// Where a player arriving through `dir` is placed, just inside the
    /// room and outside the door trigger.
    pub fn entry_point(&self, pos: GridPos, dir: Direction) -> Vec3 {
        self.door_position(pos, dir) - Self::door_normal(dir) * self.entry_inset
    }

    /// Is `point` inside the room's footprint?
    pub fn contains(&self, pos: GridPos, point: Vec3) -> bool {
        let center = self.room_center(pos);
        (point.x - center.x).abs() <= self.half_extent && (point.z - center.z).abs() <= self.half_extent
    }
}

/// Check if two circles on the ground plane overlap.
#[inline]
pub fn circles_overlap(pos_a: Vec3, radius_a: f32, pos_b: Vec3, radius_b: f32) -> bool {
    let combined = radius_a + radius_b;
    pos_a.flat().distance_squared(pos_b.flat()) <= combined * combined
}

/// Body radius of a damageable kind.
pub fn body_radius(kind: EntityKind) -> f32 {
    match kind {
        EntityKind::Boss => 2.5,
        EntityKind::Player(_) | EntityKind::Enemy(_) => 0.5,
        _ => 0.0,
    }
}

// =============================================================================
// DISTANCE-BASED PHYSICS
// =============================================================================

/// Distance checks on the ground plane.
#[derive(Clone, Copy, Debug)]
pub struct ProximityPhysics {
    geometry: RoomGeometry,
    hit_radius: f32,
}

impl ProximityPhysics {
    /// Physics for a geometry and projectile hit radius.
    pub fn new(geometry: RoomGeometry, hit_radius: f32) -> Self {
        Self { geometry, hit_radius }
    }

    /// Physics from the game config.
    pub fn from_config(config: &crate::config::GameConfig) -> Self {
        Self::new(RoomGeometry::from_config(&config.dungeon), config.projectile.hit_radius)
    }
}

impl PhysicsQuery for ProximityPhysics {
    fn overlaps(&self, world: &World, trigger: Trigger) -> Vec<EntityId> {
        match trigger {
            Trigger::Room(pos) => world
                .players()
                .filter(|e| self.geometry.contains(pos, e.position))
                .map(|e| e.id)
                .collect(),

            Trigger::Door(pos, dir) => {
                let door = self.geometry.door_position(pos, dir);
                world
                    .players()
                    .filter(|e| !e.is_down())
                    .filter(|e| circles_overlap(e.position, 0.0, door, self.geometry.door_radius))
                    .map(|e| e.id)
                    .collect()
            }

            Trigger::Projectile(id) => {
                let Some(projectile) = world.entity(id) else {
                    return Vec::new();
                };
                world
                    .entities()
                    .filter(|e| e.id != id && e.vitals().is_some() && !e.is_down())
                    .filter(|e| circles_overlap(projectile.position, self.hit_radius, e.position, body_radius(e.kind)))
                    .map(|e| e.id)
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> RoomGeometry {
        RoomGeometry::from_config(&DungeonConfig::default())
    }

    #[test]
    fn test_room_centers() {
        let g = geometry();
        assert_eq!(g.room_center(GridPos::new(0, 0)), Vec3::ZERO);
        assert_eq!(g.room_center(GridPos::new(2, 1)), Vec3::new(60.0, 0.0, -30.0));
    }

    #[test]
    fn test_doors_face_neighbours() {
        let g = geometry();
        let here = GridPos::new(1, 1);
        for dir in Direction::ALL {
            let Some(there) = dir.step(here, 5, 5) else { continue };
            // Door and the neighbour's opposite door sit on the shared wall
            let a = g.door_position(here, dir);
            let b = g.door_position(there, dir.opposite());
            assert!(a.distance_squared(b) < (g.offset[0] - 2.0 * g.half_extent).powi(2) + 1e-3);
        }
    }

    #[test]
    fn test_entry_point_outside_door_trigger() {
        let g = geometry();
        let pos = GridPos::new(1, 0);
        for dir in Direction::ALL {
            let entry = g.entry_point(pos, dir);
            assert!(g.contains(pos, entry));
            assert!(!circles_overlap(entry, 0.0, g.door_position(pos, dir), g.door_radius));
        }
    }

    #[test]
    fn test_circles_overlap_ignores_height() {
        assert!(circles_overlap(Vec3::new(0.0, 5.0, 0.0), 1.0, Vec3::new(1.5, 0.0, 0.0), 0.5));
        assert!(!circles_overlap(Vec3::ZERO, 1.0, Vec3::new(1.6, 0.0, 0.0), 0.5));
    }
}
