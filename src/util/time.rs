//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const TICKS_PER_SECOND: u32 = 20;
pub const TICK_INTERVAL_MS: u64 = 1_000 / TICKS_PER_SECOND as u64;

/// Convert a duration in seconds into a tick count.
pub fn secs_to_ticks(secs: f64) -> u64 {
    (secs * TICKS_PER_SECOND as f64).round() as u64
}

/// Measures the elapsed time between consecutive simulation ticks so the
/// integration step compensates for timer drift instead of assuming a
/// perfect 50 ms cadence.
#[derive(Debug)]
pub struct TickClock {
    last: Instant,
}

impl TickClock {
    pub fn start() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Seconds since the previous call (or since `start`). Advances the clock.
    pub fn delta(&mut self) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        dt
    }
}
