//! Tick Timers
//!
//! Timed sequences (cast delays, countdowns, cooldowns) expressed as
//! explicit state advanced once per simulation tick. Cancelling a timer
//! is just clearing it; there is nothing running in the background.

use serde::{Serialize, Deserialize};

use crate::TICK_RATE;

/// Convert an authored duration in seconds to ticks.
///
/// Rounds to nearest. Any positive duration is at least one tick.
pub fn secs_to_ticks(secs: f32) -> u32 {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    let ticks = (secs * TICK_RATE as f32).round() as u32;
    ticks.max(1)
}

/// One-shot countdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    remaining: Option<u32>,
}

impl Timer {
    /// An idle timer.
    pub const fn idle() -> Self {
        Self { remaining: None }
    }

    /// A timer already counting down `ticks`.
    pub fn started(ticks: u32) -> Self {
        Self { remaining: Some(ticks) }
    }

    /// (Re)start the countdown.
    pub fn start(&mut self, ticks: u32) {
        self.remaining = Some(ticks);
    }

    /// Stop without firing.
    pub fn cancel(&mut self) {
        self.remaining = None;
    }

    /// Is the countdown running?
    pub fn is_running(&self) -> bool {
        self.remaining.is_some()
    }

    /// Ticks left, if running.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Advance one tick. Returns `true` exactly once, on the tick the
    /// countdown reaches zero; the timer is idle afterwards.
    pub fn tick(&mut self) -> bool {
        match self.remaining {
            Some(0) | Some(1) => {
                self.remaining = None;
                true
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                false
            }
            None => false,
        }
    }
}

/// Cooldown measured against an absolute tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    ready_at: u64,
}

impl Cooldown {
    /// Cooldown that becomes ready at `tick`.
    pub fn ready_at(tick: u64) -> Self {
        Self { ready_at: tick }
    }

    /// Can the action run at `now`?
    pub fn is_ready(&self, now: u64) -> bool {
        now >= self.ready_at
    }

    /// Consume the cooldown at `now`.
    pub fn trigger(&mut self, now: u64, period: u32) {
        self.ready_at = now + period as u64;
    }

    /// Tick at which the cooldown is ready.
    pub fn ready_tick(&self) -> u64 {
        self.ready_at
    }
}
