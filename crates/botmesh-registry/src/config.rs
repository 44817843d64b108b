//! Liveness timing configuration.
//!
//! The exact number of missed probes that constitutes "down" and the
//! removal grace period are deployment decisions, so both are fields here
//! rather than constants. A single missed probe never fails a record;
//! network jitter must not cause false failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum accepted heartbeat interval in milliseconds.
pub const HEARTBEAT_INTERVAL_MS_MIN: u64 = 10;

/// Maximum accepted heartbeat interval in milliseconds.
pub const HEARTBEAT_INTERVAL_MS_MAX: u64 = 60_000;

/// Timing knobs for the heartbeat monitor and the reference broker's
/// discovery polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Interval between liveness probes, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Consecutive missed probes before a record transitions to `Down`.
    pub missed_probe_limit: u32,
    /// How long a record may sit in `Down` before it is removed and its
    /// key freed.
    pub down_grace_ms: u64,
    /// Poll interval for blocking reference acquisition, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 100,
            missed_probe_limit: 3,
            down_grace_ms: 30_000,
            poll_interval_ms: 100,
        }
    }
}

impl LivenessConfig {
    /// Build a config around a probe interval, clamped to the accepted
    /// range, with the default probe limit and a grace period derived from
    /// the interval.
    pub fn with_interval(interval_ms: u64) -> Self {
        let heartbeat_interval_ms =
            interval_ms.clamp(HEARTBEAT_INTERVAL_MS_MIN, HEARTBEAT_INTERVAL_MS_MAX);
        Self {
            heartbeat_interval_ms,
            poll_interval_ms: heartbeat_interval_ms,
            down_grace_ms: heartbeat_interval_ms * 300,
            ..Self::default()
        }
    }

    /// Silence longer than this moves a record to `Down`.
    pub fn probe_deadline(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms * u64::from(self.missed_probe_limit))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn down_grace(&self) -> Duration {
        Duration::from_millis(self.down_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Short intervals for tests that drive real time.
    pub fn for_testing() -> Self {
        Self {
            heartbeat_interval_ms: 20,
            missed_probe_limit: 3,
            down_grace_ms: 200,
            poll_interval_ms: 10,
        }
    }
}
