//! File nodes and pressure quantization

use serde::{Deserialize, Serialize};

use crate::config::{PressureConfig, PRESSURE_BUCKETS};

/// Quantize raw pressure into one of PRESSURE_BUCKETS buckets
pub fn quantize_pressure(raw: f64) -> u8 {
    if !raw.is_finite() {
        return 0;
    }
    let top = (PRESSURE_BUCKETS - 1) as f64;
    (raw.clamp(0.0, 1.0) * top).round() as u8
}

/// Attention tier derived from a pressure bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn from_bucket(bucket: u8, config: &PressureConfig) -> Self {
        if bucket >= config.hot_threshold {
            Tier::Hot
        } else if bucket >= config.warm_threshold {
            Tier::Warm
        } else {
            Tier::Cold
        }
    }
}

/// Persisted per-file pressure record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    pub raw_pressure: f64,
    pub pressure_bucket: u8,
    #[serde(default)]
    pub last_activated: u64,
    #[serde(default)]
    pub activation_count: u32,

    // Basin dynamics
    #[serde(default)]
    pub consecutive_hot_turns: u32,
    #[serde(default = "default_basin_depth")]
    pub basin_depth: f64,

    /// Turn of the last toroidal resurrection (0 = never)
    #[serde(default)]
    pub last_resurrected: u64,

    #[serde(default)]
    pub archived: bool,
}

fn default_basin_depth() -> f64 {
    1.0
}

impl FileNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            raw_pressure: 0.0,
            pressure_bucket: 0,
            last_activated: 0,
            activation_count: 0,
            consecutive_hot_turns: 0,
            basin_depth: 1.0,
            last_resurrected: 0,
            archived: false,
        }
    }

    /// Node starting at a given pressure
    pub fn with_pressure(path: impl Into<String>, raw: f64) -> Self {
        let mut node = Self::new(path);
        node.set_pressure(raw);
        node
    }

    /// Set raw pressure, clamped to [0, 1], keeping the bucket in sync
    pub fn set_pressure(&mut self, raw: f64) {
        self.raw_pressure = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
        self.pressure_bucket = quantize_pressure(self.raw_pressure);
    }

    pub fn tier(&self, config: &PressureConfig) -> Tier {
        Tier::from_bucket(self.pressure_bucket, config)
    }

    pub fn is_immune(&self, turn: u64, config: &PressureConfig) -> bool {
        self.activation_count > 0
            && turn.saturating_sub(self.last_activated) < config.decay_immunity_turns
    }
}
