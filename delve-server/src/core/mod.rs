//! Core primitives.
//!
//! Math, seeded randomness, digests and tick timers shared by the
//! replicated world model and the network layer.

pub mod vec3;
pub mod rng;
pub mod hash;
pub mod timer;

// Re-export core types
pub use vec3::{Vec3, Quat};
pub use rng::DeterministicRng;
pub use hash::{StateHash, StateHasher};
pub use timer::{secs_to_ticks, Timer, Cooldown};
