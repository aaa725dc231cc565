//! Attention Graph
//!
//! Directed adjacency between files with optional edge weights. Built by the
//! link-extraction collaborator and only read by the pressure engine.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Weight used for edges without an explicit one
pub const DEFAULT_EDGE_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionGraph {
    /// Source id -> target ids
    pub adjacency: BTreeMap<String, BTreeSet<String>>,
    /// Source id -> target id -> weight
    pub edge_weights: BTreeMap<String, BTreeMap<String, f64>>,
}

impl AttentionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directed edge with the default weight
    pub fn add_edge(&mut self, source: &str, target: &str) {
        self.adjacency
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string());
    }

    /// Add a directed edge carrying an explicit weight
    pub fn add_weighted_edge(&mut self, source: &str, target: &str, weight: f64) {
        self.add_edge(source, target);
        self.edge_weights
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string(), weight);
    }

    /// Outgoing neighbours of `source`, in id order
    pub fn neighbors<'a>(&'a self, source: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.adjacency
            .get(source)
            .into_iter()
            .flat_map(|targets| targets.iter().map(String::as_str))
    }

    pub fn weight(&self, source: &str, target: &str) -> f64 {
        self.edge_weights
            .get(source)
            .and_then(|targets| targets.get(target))
            .copied()
            .unwrap_or(DEFAULT_EDGE_WEIGHT)
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum()
    }
}
