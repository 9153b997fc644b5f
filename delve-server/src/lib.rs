//! # Delve
//!
//! Peer-replicated co-op dungeon crawler core: every peer runs its own
//! copy of the world, one peer (the master) makes world-level decisions
//! and every entity is resolved by the peer that owns it. A thin relay
//! carries spawns and remote calls between peers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          DELVE                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── vec3.rs     - Ground-plane vectors and yaw rotations    │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  ├── hash.rs     - Layout and state digests                  │
//! │  └── timer.rs    - Tick timers and cooldowns                 │
//! │                                                              │
//! │  game/           - Replicated world model                    │
//! │  ├── layout.rs   - Procedural dungeon grid                   │
//! │  ├── room.rs     - Room lifecycle                            │
//! │  ├── door.rs     - Door teleport countdowns                  │
//! │  ├── spawner.rs  - Per-room enemy batches                    │
//! │  ├── hazards.rs  - Room traps                                │
//! │  ├── entity.rs   - Networked entities and ids                │
//! │  ├── boss.rs     - Boss phases and attacks                   │
//! │  ├── effects.rs  - Status effects                            │
//! │  ├── skills.rs   - Skill unlocks, cooldowns and buffs        │
//! │  └── world.rs    - One peer's copy of the world              │
//! │                                                              │
//! │  network/        - Replication and transport                 │
//! │  ├── authority.rs   - Roster and master                      │
//! │  ├── replication.rs - Spawns, remote calls, destroys         │
//! │  ├── handlers.rs    - Owner-gated operation handlers         │
//! │  ├── casting.rs     - Skill activation and buffs             │
//! │  ├── session.rs     - One peer's session and tick            │
//! │  ├── relay.rs       - Relay room (routing and buffering)     │
//! │  ├── loopback.rs    - In-process relay                       │
//! │  ├── server.rs      - WebSocket relay server                 │
//! │  └── client.rs      - WebSocket peer client                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! The layout is generated once by the master from a seed derived from
//! the room id and the sorted actor numbers, then broadcast with its
//! digest. Everything else converges through owner-resolved operations;
//! peers never re-simulate each other's entities.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod config;
pub mod save;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use config::GameConfig;
pub use game::{generate_layout, DungeonLayout, EntityId, PeerId, World};
pub use network::{Loopback, PeerSession};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Upper bound on carve steps while generating a layout.
pub const MAX_CARVE_STEPS: u32 = 1000;
