//! Basin Dynamics
//!
//! Sustained HOT attention digs a basin: the deeper the basin, the slower the
//! file decays once attention moves elsewhere.

use crate::config::PressureConfig;

use super::node::{FileNode, Tier};

/// Basin depth for a run of consecutive HOT turns, in [1, basin_max_depth]
pub fn compute_basin_depth(consecutive_hot_turns: u32, config: &PressureConfig) -> f64 {
    let max_turns = config.basin_max_turns.max(1);
    let capped = consecutive_hot_turns.min(max_turns) as f64;
    1.0 + capped / max_turns as f64 * (config.basin_max_depth - 1.0)
}

/// Per-turn retention for a file sitting in a basin of the given depth
pub fn compute_effective_decay(base_rate: f64, basin_depth: f64) -> f64 {
    base_rate.powf(1.0 / basin_depth.max(1.0))
}

/// Advance one node's basin state from its current tier
pub fn update_basin(node: &mut FileNode, config: &PressureConfig) {
    if node.tier(config) == Tier::Hot {
        node.consecutive_hot_turns = node.consecutive_hot_turns.saturating_add(1);
    } else {
        // Brief dips cool the basin instead of erasing it
        node.consecutive_hot_turns = node
            .consecutive_hot_turns
            .saturating_sub(config.basin_cooldown_rate);
    }
    node.basin_depth = compute_basin_depth(node.consecutive_hot_turns, config);
}
