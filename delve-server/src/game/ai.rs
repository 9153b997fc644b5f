//! Steering
//!
//! Ground-plane movement helpers shared by players, enemies and the boss.

use crate::core::{Quat, Vec3};
use crate::TICK_RATE;

/// Distance covered in one tick at `speed` units per second.
#[inline]
pub fn per_tick(speed: f32) -> f32 {
    speed / TICK_RATE as f32
}

/// Move from `from` towards `to` by at most `step`, stopping `stop_at`
/// away from it. Height is dropped.
pub fn step_towards(from: Vec3, to: Vec3, step: f32, stop_at: f32) -> Vec3 {
    let delta = (to - from).flat();
    let distance = delta.length();
    if distance <= stop_at || distance <= f32::EPSILON {
        return from.flat();
    }
    let travel = step.min(distance - stop_at);
    (from + delta * (travel / distance)).flat()
}

/// Facing for a move from `from` to `to`, if there is a move.
pub fn facing(from: Vec3, to: Vec3) -> Option<Quat> {
    let delta = (to - from).flat();
    if delta.length_squared() <= f32::EPSILON {
        None
    } else {
        Some(Quat::look_rotation(delta))
    }
}

/// Unit direction on the ground plane, or zero.
pub fn aim(from: Vec3, to: Vec3) -> Vec3 {
    (to - from).flat().normalize()
}
