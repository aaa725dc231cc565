//! Pressure Field
//!
//! Owns every file's pressure record and applies the dynamics stages in
//! their fixed order: activate, propagate, decay, conserve, basin update.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::config::PressureConfig;
use crate::graph::AttentionGraph;

use super::basin::update_basin;
use super::dynamics::{
    activation_deltas, budget_drift, conserved_pressures, decay_node, propagation_deltas,
    ConservationOutcome, PressureDeltas,
};
use super::node::FileNode;
use super::stats::{compute_stats, partition, rank_nodes, PressureStats, TierPartition};

/// Summary of a decay pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecayReport {
    pub decayed: usize,
    pub resurrected: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PressureField {
    files: BTreeMap<String, FileNode>,
}

impl PressureField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a field from persisted records
    pub fn from_nodes(nodes: impl IntoIterator<Item = FileNode>) -> Self {
        let files = nodes
            .into_iter()
            .map(|mut node| {
                // The bucket is always derived, never trusted from storage
                node.set_pressure(node.raw_pressure);
                (node.path.clone(), node)
            })
            .collect();
        Self { files }
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register a file. Returns true if it was not already active.
    ///
    /// Re-registering an archived file restores it with its history intact.
    pub fn register(&mut self, path: &str) -> bool {
        match self.files.get_mut(path) {
            Some(node) if node.archived => {
                node.archived = false;
                true
            }
            Some(_) => false,
            None => {
                self.files.insert(path.to_string(), FileNode::new(path));
                true
            }
        }
    }

    /// Archive a file: it keeps its record but leaves the dynamics
    pub fn archive(&mut self, path: &str) -> bool {
        match self.files.get_mut(path) {
            Some(node) if !node.archived => {
                node.archived = true;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileNode> {
        self.files.get(path)
    }

    /// True for registered, non-archived files
    pub fn is_active(&self, path: &str) -> bool {
        self.files.get(path).map_or(false, |n| !n.archived)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.files.values()
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.files.values().filter(|n| !n.archived)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_pressure(&self) -> f64 {
        self.active_nodes().map(|n| n.raw_pressure).sum()
    }

    /// Overwrite one file's pressure. Unknown ids are ignored.
    pub fn set_pressure(&mut self, path: &str, raw: f64) {
        if let Some(node) = self.files.get_mut(path) {
            node.set_pressure(raw);
        }
    }

    // =========================================================================
    // DYNAMICS
    // =========================================================================

    /// Apply a delta map, clamping every result to [0, 1]
    pub fn apply_deltas(&mut self, deltas: &PressureDeltas) {
        for (path, delta) in deltas {
            if !delta.is_finite() {
                warn!(path = %path, delta = %delta, "Dropping non-finite pressure delta");
                continue;
            }
            match self.files.get_mut(path) {
                Some(node) if !node.archived => node.set_pressure(node.raw_pressure + delta),
                _ => debug!(path = %path, "Skipping delta for unregistered file"),
            }
        }
    }

    /// Boost activated files and record the activation.
    ///
    /// Returns the ids that were actually activated, in id order.
    pub fn activate(
        &mut self,
        activated: &BTreeSet<String>,
        turn: u64,
        config: &PressureConfig,
    ) -> Vec<String> {
        let deltas = activation_deltas(&self.files, activated, config);
        self.apply_deltas(&deltas);

        let mut applied = Vec::new();
        for path in activated {
            match self.files.get_mut(path) {
                Some(node) if !node.archived => {
                    node.last_activated = turn;
                    node.activation_count = node.activation_count.saturating_add(1);
                    applied.push(path.clone());
                }
                _ => debug!(path = %path, "Ignoring activation of unknown file"),
            }
        }
        applied
    }

    pub fn propagate(&mut self, graph: &AttentionGraph, config: &PressureConfig) -> PressureDeltas {
        let deltas = propagation_deltas(&self.files, graph, config);
        self.apply_deltas(&deltas);
        deltas
    }

    pub fn decay(&mut self, turn: u64, config: &PressureConfig) -> DecayReport {
        let mut report = DecayReport::default();
        let next: Vec<FileNode> = self
            .files
            .values()
            .map(|node| decay_node(node, turn, config))
            .collect();

        for node in next {
            if let Some(prev) = self.files.get(&node.path) {
                if node.last_resurrected != prev.last_resurrected {
                    report.resurrected.push(node.path.clone());
                } else if node.raw_pressure != prev.raw_pressure {
                    report.decayed += 1;
                }
            }
            self.files.insert(node.path.clone(), node);
        }

        report
    }

    /// Whether a conservation correction is due this turn
    pub fn needs_conservation(&self, turn: u64, config: &PressureConfig) -> bool {
        if !config.enable_conservation {
            return false;
        }
        turn % config.conservation_interval == 0 || budget_drift(&self.files, config) > config.max_drift
    }

    /// Rescale active pressures back to the configured budget
    pub fn conserve(&mut self, config: &PressureConfig) -> ConservationOutcome {
        let (values, outcome) = conserved_pressures(&self.files, config);
        for (path, value) in values {
            if let Some(node) = self.files.get_mut(&path) {
                node.set_pressure(value);
            }
        }
        outcome
    }

    /// Update consecutive HOT counters and basin depths from current tiers
    pub fn update_basins(&mut self, config: &PressureConfig) {
        for node in self.files.values_mut().filter(|n| !n.archived) {
            update_basin(node, config);
        }
    }

    // =========================================================================
    // READING
    // =========================================================================

    /// Active files ordered by descending pressure, then id
    pub fn ranked(&self) -> Vec<&FileNode> {
        rank_nodes(self.active_nodes())
    }

    pub fn partition(&self, config: &PressureConfig) -> TierPartition {
        partition(self.files.values(), config)
    }

    pub fn stats(&self, config: &PressureConfig) -> PressureStats {
        compute_stats(self.files.values(), config)
    }
}
