//! AoI subsystem configuration.

use serde::{Deserialize, Serialize};

/// Tunables for witness behavior.
///
/// Loaded from the `[aoi]` section of the server configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AoiConfig {
    /// Default AoI radius in metres for a freshly created witness.
    pub default_radius: f32,

    /// Default hysteresis band in metres added to the radius on exit.
    pub default_hysteresis: f32,

    /// Upper bound a witness may raise its radius to. Zero means unbounded.
    pub max_radius: f32,

    /// Maximum priority spread drained from the queue per tick. Entities
    /// whose priority exceeds the front priority by more than this wait for
    /// a later tick.
    pub max_priority_delta: f64,

    /// Downstream packet budget per tick, in bytes.
    pub packet_size: usize,

    /// Game ticks per second, used to convert a bits-per-second cap into a
    /// per-tick packet size.
    pub ticks_per_second: u32,
}

impl Default for AoiConfig {
    fn default() -> Self {
        Self {
            default_radius: 500.0,
            default_hysteresis: 5.0,
            max_radius: 0.0,
            max_priority_delta: 64.0,
            packet_size: 1400,
            ticks_per_second: 10,
        }
    }
}

impl AoiConfig {
    /// Per-tick byte budget for a client capped at `bps` bits per second.
    pub fn packet_size_for_bps(&self, bps: u32) -> usize {
        let per_tick = bps / 8 / self.ticks_per_second.max(1);
        (per_tick as usize).max(64)
    }
}
