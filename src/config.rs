//! Engine Configuration
//!
//! Immutable rate constants threaded through every pressure, turn-state and
//! resolution operation. Every field has a default, so a partial JSON file is
//! a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Number of quantization buckets for raw pressure
pub const PRESSURE_BUCKETS: u8 = 48;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("warm_threshold ({warm}) must be below hot_threshold ({hot})")]
    ThresholdOrder { warm: u8, hot: u8 },
}

impl Serialize for ConfigError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

// ============ Pressure ============

/// How non-immune files lose pressure over time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DecayPolicy {
    /// Files decay towards the floor and stay there
    Linear,
    /// Long-dormant files are periodically raised back up
    Toroidal {
        resurrection_threshold: f64,
        resurrection_pressure: f64,
        resurrection_cooldown: u64,
    },
}

impl Default for DecayPolicy {
    fn default() -> Self {
        DecayPolicy::Linear
    }
}

impl DecayPolicy {
    /// Toroidal policy with the stock resurrection parameters
    pub fn toroidal() -> Self {
        DecayPolicy::Toroidal {
            resurrection_threshold: 0.01,
            resurrection_pressure: 0.8,
            resurrection_cooldown: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    /// Pressure added to each activated file
    pub activation_boost: f64,

    /// Total pressure a source pushes along its outgoing edges per turn
    pub edge_flow_rate: f64,
    /// Only HOT files propagate when set
    pub hot_propagates: bool,

    /// Per-turn retention for a file with basin depth 1.0
    pub decay_rate: f64,
    /// Files activated within this many turns do not decay
    pub decay_immunity_turns: u64,
    /// Pressures below this snap to zero after decay
    pub decay_floor: f64,
    pub decay_policy: DecayPolicy,

    /// Boosting one file drains the others, and totals are rescaled to the budget
    pub enable_conservation: bool,
    pub total_pressure_budget: f64,
    /// Scheduled correction period, in turns
    pub conservation_interval: u64,
    /// Relative drift from the budget that forces an early correction
    pub max_drift: f64,

    /// Bucket thresholds (out of PRESSURE_BUCKETS)
    pub hot_threshold: u8,
    pub warm_threshold: u8,

    /// Consecutive HOT turns at which the basin reaches full depth
    pub basin_max_turns: u32,
    pub basin_max_depth: f64,
    /// Consecutive HOT turns lost per turn outside HOT
    pub basin_cooldown_rate: u32,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            activation_boost: 0.4,
            edge_flow_rate: 0.15,
            hot_propagates: true,
            decay_rate: 0.85,
            decay_immunity_turns: 2,
            decay_floor: 0.001,
            decay_policy: DecayPolicy::Linear,
            enable_conservation: true,
            total_pressure_budget: 10.0,
            conservation_interval: 5,
            max_drift: 0.05,
            hot_threshold: 38,
            warm_threshold: 20,
            basin_max_turns: 5,
            basin_max_depth: 2.5,
            basin_cooldown_rate: 2,
        }
    }
}

impl PressureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit("activation_boost", self.activation_boost)?;
        non_negative("edge_flow_rate", self.edge_flow_rate)?;
        if !(self.decay_rate > 0.0 && self.decay_rate <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "decay_rate",
                expected: "in (0, 1]",
                value: self.decay_rate,
            });
        }
        unit("decay_floor", self.decay_floor)?;
        non_negative("total_pressure_budget", self.total_pressure_budget)?;
        non_negative("max_drift", self.max_drift)?;
        if self.conservation_interval == 0 {
            return Err(ConfigError::OutOfRange {
                field: "conservation_interval",
                expected: ">= 1",
                value: 0.0,
            });
        }
        if self.hot_threshold >= PRESSURE_BUCKETS {
            return Err(ConfigError::OutOfRange {
                field: "hot_threshold",
                expected: "below PRESSURE_BUCKETS",
                value: self.hot_threshold as f64,
            });
        }
        if self.warm_threshold >= self.hot_threshold {
            return Err(ConfigError::ThresholdOrder {
                warm: self.warm_threshold,
                hot: self.hot_threshold,
            });
        }
        if self.basin_max_turns == 0 {
            return Err(ConfigError::OutOfRange {
                field: "basin_max_turns",
                expected: ">= 1",
                value: 0.0,
            });
        }
        if !(self.basin_max_depth >= 1.0 && self.basin_max_depth.is_finite()) {
            return Err(ConfigError::OutOfRange {
                field: "basin_max_depth",
                expected: ">= 1.0",
                value: self.basin_max_depth,
            });
        }
        if let DecayPolicy::Toroidal {
            resurrection_threshold,
            resurrection_pressure,
            ..
        } = self.decay_policy
        {
            unit("resurrection_threshold", resurrection_threshold)?;
            unit("resurrection_pressure", resurrection_pressure)?;
        }
        Ok(())
    }
}

// ============ Turn State ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnStateConfig {
    /// Carry a share of each file's pressure into the next turn
    pub enable_inheritance: bool,
    pub inheritance_rate: f64,
    /// Minimum raw pressure for a file to carry anything forward
    pub inheritance_threshold: f64,

    /// Fraction of tension lost per turn
    pub tension_decay: f64,
    /// Extra weight per tension source repeated from the previous turn
    pub tension_accumulation: f64,
    /// Share of tension kept when a turn resolves
    pub resolution_tension_factor: f64,
    pub max_tension_sources: usize,
}

impl Default for TurnStateConfig {
    fn default() -> Self {
        Self {
            enable_inheritance: false,
            inheritance_rate: 0.6,
            inheritance_threshold: 0.3,
            tension_decay: 0.3,
            tension_accumulation: 0.15,
            resolution_tension_factor: 0.25,
            max_tension_sources: 10,
        }
    }
}

impl TurnStateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit("inheritance_rate", self.inheritance_rate)?;
        unit("inheritance_threshold", self.inheritance_threshold)?;
        unit("tension_decay", self.tension_decay)?;
        non_negative("tension_accumulation", self.tension_accumulation)?;
        unit("resolution_tension_factor", self.resolution_tension_factor)?;
        Ok(())
    }
}

// ============ Resolution ============

/// Which verdict wins when a message carries both completion and topic-change markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// Completion beats weak topic signals; strong topic signals beat completion
    ByStrength,
    PreferCompletion,
    PreferTopicChange,
}

impl Default for TieBreakPolicy {
    fn default() -> Self {
        TieBreakPolicy::ByStrength
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub tie_break: TieBreakPolicy,
    /// Tool calls whose name or command contains one of these count as finalizing
    pub finalize_markers: Vec<String>,
    /// Share of prior tension sources a response must mention to count as completion
    pub addressed_ratio: f64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            tie_break: TieBreakPolicy::ByStrength,
            finalize_markers: [
                "git commit",
                "git push",
                "gh pr create",
                "cargo publish",
                "npm publish",
                "finalize",
                "complete_task",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            addressed_ratio: 0.6,
        }
    }
}

impl ResolutionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.addressed_ratio > 0.0 && self.addressed_ratio <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "addressed_ratio",
                expected: "in (0, 1]",
                value: self.addressed_ratio,
            });
        }
        Ok(())
    }
}

// ============ Crystallization ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrystallizeConfig {
    pub min_cluster_size: usize,
    pub min_sustained_turns: u32,
    /// At least one cluster file must be this hot
    pub min_peak_pressure: f64,
}

impl Default for CrystallizeConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            min_sustained_turns: 3,
            min_peak_pressure: 0.6,
        }
    }
}

impl CrystallizeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit("min_peak_pressure", self.min_peak_pressure)
    }
}

// ============ Aggregate ============

/// Complete engine configuration, as stored in `config.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HologramConfig {
    pub pressure: PressureConfig,
    pub turn: TurnStateConfig,
    pub resolution: ResolutionConfig,
    pub crystallize: CrystallizeConfig,
}

impl HologramConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pressure.validate()?;
        self.turn.validate()?;
        self.resolution.validate()?;
        self.crystallize.validate()?;
        Ok(())
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON config document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: HologramConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            expected: "in [0, 1]",
            value,
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            expected: "finite and >= 0",
            value,
        })
    }
}
