use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Cross-turn conversational state, persisted to `turn_state.json`.
///
/// Every field defaults, so records written by older builds load cleanly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnState {
    /// Number of turns processed so far
    pub turn: u64,

    // Attention cluster
    pub attention_cluster: BTreeSet<String>,
    pub cluster_formation_turn: u64,
    pub cluster_sustained_turns: u32,

    /// Pressure carried into the next turn, by file id
    pub pressure_inheritance: BTreeMap<String, f64>,

    // Tension
    pub unresolved_tension: f64,
    pub tension_sources: Vec<String>,

    pub last_resolution_turn: u64,
    pub pending_crystallization: bool,
}

impl TurnState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns since the current cluster formed (0 when there is no cluster)
    pub fn cluster_age(&self) -> u64 {
        if self.attention_cluster.is_empty() {
            0
        } else {
            self.turn.saturating_sub(self.cluster_formation_turn)
        }
    }
}
