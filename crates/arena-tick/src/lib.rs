//! Fixed-rate tick scheduler for the arena engines.
//!
//! Every loop inside a networking worker waits on a [`TickScheduler`]
//! between iterations, so no task ever busy-spins while it polls a
//! mailbox or the state register.
//!
//! The scheduler is meant to sit inside a `tokio::select!`:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         accepted = transport.accept() => { /* register connection */ }
//!         _ = ticks.wait_for_tick() => {
//!             if state.get() == ServerState::Exiting { break; }
//!         }
//!     }
//! }
//! ```
//!
//! Dropping a pending `wait_for_tick` future is harmless: the deadline is
//! kept and the next call waits for the same tick.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`TickScheduler`].
///
/// A tick that fires late never triggers a burst of catch-up ticks: the
/// missed ones are skipped and the cadence restarts from the late tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickConfig {
    /// Ticks per second. Clamped to `1..=MAX_TICK_RATE_HZ`.
    pub tick_rate_hz: u32,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: Self::DEFAULT_TICK_RATE_HZ,
        }
    }
}

impl TickConfig {
    /// Default rate of every engine loop.
    pub const DEFAULT_TICK_RATE_HZ: u32 = 50;
    /// Maximum supported tick rate.
    pub const MAX_TICK_RATE_HZ: u32 = 1000;

    /// A config for a specific tick rate.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self { tick_rate_hz }
    }

    /// Clamps out-of-range values.
    pub fn validated(mut self) -> Self {
        let clamped = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
        if clamped != self.tick_rate_hz {
            warn!(
                rate = self.tick_rate_hz,
                clamped,
                "tick_rate_hz out of range, clamping"
            );
            self.tick_rate_hz = clamped;
        }
        self
    }

    /// Duration of a single tick, after clamping.
    pub fn tick_duration(&self) -> Duration {
        let rate = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
        Duration::from_secs_f64(1.0 / rate as f64)
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    /// Monotonically increasing tick number, starting at 1.
    pub tick: u64,
    /// Fixed tick length.
    pub dt: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-rate tick scheduler. One per loop.
#[derive(Debug)]
pub struct TickScheduler {
    config: TickConfig,
    tick_duration: Duration,
    tick_count: u64,
    next_tick: Instant,
}

impl TickScheduler {
    /// Creates a scheduler whose first tick is one tick from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();
        trace!(rate_hz = config.tick_rate_hz, "tick scheduler created");
        Self {
            config,
            tick_duration,
            tick_count: 0,
            next_tick: Instant::now() + tick_duration,
        }
    }

    /// A scheduler for `tick_rate_hz`.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Waits until the next tick is due.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let next = self.next_tick;
        let dur = self.tick_duration;

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(next);
        let skipped = (late_by.as_nanos() / dur.as_nanos()) as u64;
        if skipped > 0 {
            debug!(
                tick = self.tick_count,
                skipped,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "tick overrun, skipping ahead"
            );
        }
        self.next_tick = now + dur;

        trace!(tick = self.tick_count, "tick fired");

        TickInfo {
            tick: self.tick_count,
            dt: dur,
        }
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The configured rate, after clamping.
    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    /// The fixed tick length.
    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}
