//! Crystallization Trigger
//!
//! Decides when a completed, sustained attention cluster is worth handing to
//! the note writer, and captures what that writer needs to know about it.
//! Writing the note itself happens outside this crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::CrystallizeConfig;
use crate::pressure::PressureField;
use crate::resolution::ResolutionResult;

use super::state::TurnState;

/// Highest pressure among the cluster's registered files
fn peak_pressure(cluster: &BTreeSet<String>, field: &PressureField) -> f64 {
    cluster
        .iter()
        .filter_map(|id| field.get(id))
        .map(|node| node.raw_pressure)
        .fold(0.0, f64::max)
}

/// True when a completion closes a cluster that is large, sustained and hot enough.
///
/// Topic changes never crystallize: the work was abandoned, not finished.
pub fn should_crystallize(
    resolution: &ResolutionResult,
    cluster_sustained_turns: u32,
    attention_cluster: &BTreeSet<String>,
    field: &PressureField,
    config: &CrystallizeConfig,
) -> bool {
    resolution.is_completion()
        && cluster_sustained_turns >= config.min_sustained_turns
        && attention_cluster.len() >= config.min_cluster_size
        && peak_pressure(attention_cluster, field) >= config.min_peak_pressure
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterFile {
    pub path: String,
    pub pressure: f64,
}

/// The closed cluster as handed to the note writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Cluster files ordered by descending pressure, then id
    pub files: Vec<ClusterFile>,
    pub formation_turn: u64,
    /// Turns the cluster had been open when it closed
    pub age_turns: u64,
    pub sustained_turns: u32,
    pub tension_sources: Vec<String>,
    pub closed_by: Option<String>,
}

/// Snapshot the cluster held in `prev`, as it stands after this turn's dynamics
pub fn snapshot_cluster(
    prev: &TurnState,
    field: &PressureField,
    resolution: &ResolutionResult,
) -> ClusterSnapshot {
    let mut files: Vec<ClusterFile> = prev
        .attention_cluster
        .iter()
        .filter_map(|id| field.get(id))
        .map(|node| ClusterFile {
            path: node.path.clone(),
            pressure: node.raw_pressure,
        })
        .collect();
    files.sort_by(|a, b| b.pressure.total_cmp(&a.pressure).then_with(|| a.path.cmp(&b.path)));

    ClusterSnapshot {
        files,
        formation_turn: prev.cluster_formation_turn,
        age_turns: prev.cluster_age(),
        sustained_turns: prev.cluster_sustained_turns,
        tension_sources: prev.tension_sources.clone(),
        closed_by: resolution.signal.clone(),
    }
}
