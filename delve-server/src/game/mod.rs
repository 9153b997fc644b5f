//! Game Logic Module
//!
//! The replicated world model. Nothing here touches the network; the
//! session layer feeds it operations and reads back events.
//!
//! ## Module Structure
//!
//! - `layout`: Grid carve and room placement
//! - `room`: Room lock/spawn/clear lifecycle
//! - `door`: Shared door countdown
//! - `spawner`: Per-room enemy batches and trap queues
//! - `hazards`: Room traps
//! - `entity`: Entity ids, kinds and per-kind state
//! - `vitals`: Health, shield, damage reduction
//! - `effects`: Damage over time and slows
//! - `boss`: Boss phases, attacks and meteor showers
//! - `skills`: Kill-count unlocks, cooldowns, buffs and ability shapes
//! - `physics`: Room geometry and overlap queries
//! - `ai`: Ground-plane steering
//! - `world`: One peer's copy of all of the above
//! - `events`: Local notifications for presentation and tests

pub mod layout;
pub mod room;
pub mod door;
pub mod spawner;
pub mod hazards;
pub mod entity;
pub mod vitals;
pub mod effects;
pub mod boss;
pub mod skills;
pub mod physics;
pub mod ai;
pub mod world;
pub mod events;

// Re-export key types
pub use layout::{generate_layout, Direction, DungeonLayout, GridPos, RoomKind};
pub use room::{RoomEntryAction, RoomState};
pub use door::{DoorCountdown, DoorStatus, DoorTiming};
pub use spawner::{BatchProgress, EnemySpawner, SpawnerSnapshot};
pub use hazards::{HazardKind, HazardPlacement};
pub use skills::{BuffKind, SkillSlot};
pub use entity::{EntityId, EntityKind, InitPayload, NetworkedEntity, PeerId, SpawnRequest};
pub use physics::{PhysicsQuery, ProximityPhysics, RoomGeometry, Trigger};
pub use world::World;
pub use events::{GameEvent, GameEventData};
