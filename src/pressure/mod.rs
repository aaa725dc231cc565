//! Pressure Field Module
//!
//! Per-file attention pressure and the dynamics that move it between turns:
//! - Node records and bucket quantization
//! - Activation, propagation, decay and conservation stages
//! - Basin depth bookkeeping
//! - Tier partitions and aggregate stats

pub mod basin;
pub mod dynamics;
pub mod field;
pub mod node;
pub mod stats;

pub use basin::{compute_basin_depth, compute_effective_decay, update_basin};
pub use dynamics::{
    activation_deltas, budget_drift, conserved_pressures, decay_node, propagation_deltas,
    ConservationOutcome, PressureDeltas,
};
pub use field::{DecayReport, PressureField};
pub use node::{quantize_pressure, FileNode, Tier};
pub use stats::{compute_stats, partition, rank_nodes, PressureStats, TierPartition};
