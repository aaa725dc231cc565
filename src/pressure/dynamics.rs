//! Pressure Dynamics
//!
//! The per-turn physics of the field: activation, propagation along graph
//! edges, basin-aware decay and budget conservation.
//!
//! Each stage reads a snapshot of the nodes and returns either a delta map or
//! replacement nodes. Nothing here mutates the field; `PressureField` applies
//! the results atomically, so a stage never observes its own partial output.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{DecayPolicy, PressureConfig};
use crate::graph::AttentionGraph;

use super::basin::compute_effective_decay;
use super::node::{FileNode, Tier};

/// Pressure change per file id
pub type PressureDeltas = BTreeMap<String, f64>;

/// Absolute tolerance for the post-correction budget
const BUDGET_EPSILON: f64 = 1e-12;

// ============ Activation ============

/// Deltas for activating `activated` this turn.
///
/// Unknown and archived ids are ignored. With conservation on, the total boost
/// of the known ids is drained evenly from every other active file.
pub fn activation_deltas(
    nodes: &BTreeMap<String, FileNode>,
    activated: &BTreeSet<String>,
    config: &PressureConfig,
) -> PressureDeltas {
    let mut deltas = PressureDeltas::new();

    let known: Vec<&String> = activated
        .iter()
        .filter(|id| nodes.get(*id).map_or(false, |n| !n.archived))
        .collect();
    if known.is_empty() {
        return deltas;
    }

    for id in &known {
        deltas.insert((*id).clone(), config.activation_boost);
    }

    if config.enable_conservation {
        let others: Vec<&String> = nodes
            .iter()
            .filter(|(id, node)| !node.archived && !activated.contains(*id))
            .map(|(id, _)| id)
            .collect();
        if !others.is_empty() {
            let drain = known.len() as f64 * config.activation_boost / others.len() as f64;
            for id in others {
                deltas.insert(id.clone(), -drain);
            }
        }
    }

    deltas
}

// ============ Propagation ============

/// Deltas for one round of flow along graph edges.
///
/// Computed entirely from the current snapshot, so pressure received this turn
/// is not forwarded again until the next turn.
pub fn propagation_deltas(
    nodes: &BTreeMap<String, FileNode>,
    graph: &AttentionGraph,
    config: &PressureConfig,
) -> PressureDeltas {
    let mut deltas = PressureDeltas::new();

    for (id, node) in nodes {
        if node.archived {
            continue;
        }
        if config.hot_propagates && node.tier(config) != Tier::Hot {
            continue;
        }

        let targets: Vec<&str> = graph
            .neighbors(id)
            .filter(|target| *target != id.as_str())
            .filter(|target| nodes.get(*target).map_or(false, |n| !n.archived))
            .collect();
        if targets.is_empty() {
            continue;
        }

        let share = config.edge_flow_rate / targets.len() as f64;
        let mut flows: Vec<(&str, f64)> = targets
            .iter()
            .map(|target| {
                let weight = graph.weight(id, target);
                let weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
                (*target, share * weight)
            })
            .collect();

        // A source can never send more than it holds
        let outflow: f64 = flows.iter().map(|(_, f)| f).sum();
        if outflow > node.raw_pressure && outflow > 0.0 {
            let scale = node.raw_pressure / outflow;
            for (_, flow) in &mut flows {
                *flow *= scale;
            }
        }

        for (target, flow) in flows {
            *deltas.entry(target.to_string()).or_insert(0.0) += flow;
            if config.enable_conservation {
                *deltas.entry(id.clone()).or_insert(0.0) -= flow;
            }
        }
    }

    deltas
}

// ============ Decay ============

/// Decay one node for `turn` under the configured policy.
///
/// Files activated within the immunity window are returned unchanged.
/// Deeper basins retain more pressure. Under the toroidal policy a file that
/// has fallen below the resurrection threshold and has been dormant for the
/// cooldown is raised back to the resurrection pressure.
pub fn decay_node(node: &FileNode, turn: u64, config: &PressureConfig) -> FileNode {
    let mut next = node.clone();
    if node.archived || node.is_immune(turn, config) {
        return next;
    }

    let retention = compute_effective_decay(config.decay_rate, node.basin_depth);
    let mut raw = node.raw_pressure * retention;
    if raw < config.decay_floor {
        raw = 0.0;
    }
    next.set_pressure(raw);

    match config.decay_policy {
        DecayPolicy::Linear => {}
        DecayPolicy::Toroidal {
            resurrection_threshold,
            resurrection_pressure,
            resurrection_cooldown,
        } => {
            let last_touched = node.last_activated.max(node.last_resurrected);
            let dormant = turn.saturating_sub(last_touched) >= resurrection_cooldown;
            if node.activation_count > 0 && dormant && next.raw_pressure < resurrection_threshold {
                next.set_pressure(resurrection_pressure);
                next.last_resurrected = turn;
            }
        }
    }

    next
}

// ============ Conservation ============

/// What a conservation pass did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConservationOutcome {
    /// Conservation is turned off, or the correction was not due
    Skipped,
    /// No active files to correct
    Empty,
    /// The budget exceeds what the active files can hold at 1.0 each
    Unattainable { budget: f64, capacity: f64 },
    /// Total was zero; the budget was spread evenly
    Redistributed { per_file: f64 },
    /// Pressures were rescaled towards the budget
    Rescaled { scale: f64, passes: u32 },
}

/// Relative distance of the active total from the budget
pub fn budget_drift(nodes: &BTreeMap<String, FileNode>, config: &PressureConfig) -> f64 {
    if config.total_pressure_budget <= 0.0 {
        return 0.0;
    }
    let total: f64 = nodes
        .values()
        .filter(|n| !n.archived)
        .map(|n| n.raw_pressure)
        .sum();
    (total - config.total_pressure_budget).abs() / config.total_pressure_budget
}

/// New absolute pressures restoring the budget, plus a description of the pass.
///
/// Shrinking is a single uniform rescale. Growing saturates files at 1.0 and
/// rescales the rest again until the budget is met.
pub fn conserved_pressures(
    nodes: &BTreeMap<String, FileNode>,
    config: &PressureConfig,
) -> (BTreeMap<String, f64>, ConservationOutcome) {
    let mut values: BTreeMap<String, f64> = nodes
        .iter()
        .filter(|(_, n)| !n.archived)
        .map(|(id, n)| (id.clone(), n.raw_pressure))
        .collect();

    if !config.enable_conservation {
        return (BTreeMap::new(), ConservationOutcome::Skipped);
    }
    if values.is_empty() {
        return (BTreeMap::new(), ConservationOutcome::Empty);
    }

    let budget = config.total_pressure_budget;
    let capacity = values.len() as f64;
    if budget > capacity + BUDGET_EPSILON {
        return (BTreeMap::new(), ConservationOutcome::Unattainable { budget, capacity });
    }

    let total: f64 = values.values().sum();
    if total == 0.0 {
        let per_file = (budget / capacity).min(1.0);
        for value in values.values_mut() {
            *value = per_file;
        }
        return (values, ConservationOutcome::Redistributed { per_file });
    }

    let first_scale = budget / total;
    if total >= budget {
        for value in values.values_mut() {
            *value *= first_scale;
        }
        return (
            values,
            ConservationOutcome::Rescaled {
                scale: first_scale,
                passes: 1,
            },
        );
    }

    let mut passes = 0u32;
    let max_passes = values.len() as u32 + 1;
    while passes < max_passes {
        passes += 1;
        let saturated = values.values().filter(|v| **v >= 1.0).count() as f64;
        let free_total: f64 = values.values().filter(|v| **v < 1.0).sum();
        let remaining = budget - saturated;
        if remaining <= BUDGET_EPSILON {
            break;
        }

        if free_total <= 0.0 {
            // Only empty files are left to fill
            let empties = values.values().filter(|v| **v < 1.0).count();
            if empties == 0 {
                break;
            }
            let share = remaining / empties as f64;
            for value in values.values_mut().filter(|v| **v < 1.0) {
                *value = (*value + share).min(1.0);
            }
            break;
        }

        let scale = remaining / free_total;
        for value in values.values_mut().filter(|v| **v < 1.0) {
            *value = (*value * scale).min(1.0);
        }

        let sum: f64 = values.values().sum();
        if (sum - budget).abs() < BUDGET_EPSILON {
            break;
        }
    }

    (
        values,
        ConservationOutcome::Rescaled {
            scale: first_scale,
            passes,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(entries: &[(&str, f64)]) -> BTreeMap<String, FileNode> {
        entries
            .iter()
            .map(|(id, p)| (id.to_string(), FileNode::with_pressure(*id, *p)))
            .collect()
    }

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_activation_drains_others() {
        let files = nodes(&[("a.md", 0.2), ("b.md", 0.5), ("c.md", 0.5)]);
        let deltas = activation_deltas(&files, &ids(&["a.md"]), &PressureConfig::default());

        assert_eq!(deltas["a.md"], 0.4);
        assert!((deltas["b.md"] + 0.2).abs() < 1e-12);
        assert!((deltas["c.md"] + 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_activation_ignores_unknown_ids() {
        let files = nodes(&[("a.md", 0.2), ("b.md", 0.5)]);
        let deltas = activation_deltas(
            &files,
            &ids(&["a.md", "not-indexed.md"]),
            &PressureConfig::default(),
        );

        assert!(!deltas.contains_key("not-indexed.md"));
        // Only the known id is drained for
        assert!((deltas["b.md"] + 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_activation_empty_is_noop() {
        let files = nodes(&[("a.md", 0.2)]);
        assert!(activation_deltas(&files, &BTreeSet::new(), &PressureConfig::default()).is_empty());
        assert!(activation_deltas(&files, &ids(&["ghost.md"]), &PressureConfig::default()).is_empty());
    }

    #[test]
    fn test_activation_without_conservation_leaves_others() {
        let config = PressureConfig {
            enable_conservation: false,
            ..Default::default()
        };
        let files = nodes(&[("a.md", 0.2), ("b.md", 0.5)]);
        let deltas = activation_deltas(&files, &ids(&["a.md"]), &config);
        assert_eq!(deltas.len(), 1);
    }

    #[test]
    fn test_propagation_conserves() {
        let files = nodes(&[("hub.md", 0.9), ("x.md", 0.1), ("y.md", 0.1)]);
        let mut graph = AttentionGraph::new();
        graph.add_edge("hub.md", "x.md");
        graph.add_edge("hub.md", "y.md");

        let deltas = propagation_deltas(&files, &graph, &PressureConfig::default());
        assert!((deltas["x.md"] - 0.075).abs() < 1e-12);
        assert!((deltas["y.md"] - 0.075).abs() < 1e-12);
        assert!((deltas["hub.md"] + 0.15).abs() < 1e-12);
        assert!(deltas.values().sum::<f64>().abs() < 1e-12);
    }

    #[test]
    fn test_propagation_uses_edge_weights() {
        let files = nodes(&[("hub.md", 0.9), ("x.md", 0.1), ("y.md", 0.1)]);
        let mut graph = AttentionGraph::new();
        graph.add_weighted_edge("hub.md", "x.md", 0.5);
        graph.add_edge("hub.md", "y.md");

        let deltas = propagation_deltas(&files, &graph, &PressureConfig::default());
        assert!((deltas["x.md"] - 0.0375).abs() < 1e-12);
        assert!((deltas["y.md"] - 0.075).abs() < 1e-12);
    }

    #[test]
    fn test_only_hot_files_propagate() {
        let files = nodes(&[("warm.md", 0.5), ("x.md", 0.1)]);
        let mut graph = AttentionGraph::new();
        graph.add_edge("warm.md", "x.md");

        assert!(propagation_deltas(&files, &graph, &PressureConfig::default()).is_empty());

        let config = PressureConfig {
            hot_propagates: false,
            ..Default::default()
        };
        assert!(!propagation_deltas(&files, &graph, &config).is_empty());
    }

    #[test]
    fn test_propagation_does_not_cascade() {
        // a -> b -> c; b becomes hot only after receiving from a
        let files = nodes(&[("a.md", 1.0), ("b.md", 0.79), ("c.md", 0.0)]);
        let mut graph = AttentionGraph::new();
        graph.add_edge("a.md", "b.md");
        graph.add_edge("b.md", "c.md");

        let deltas = propagation_deltas(&files, &graph, &PressureConfig::default());
        assert!(!deltas.contains_key("c.md"));
    }

    #[test]
    fn test_non_conserving_propagation_creates_pressure() {
        let config = PressureConfig {
            enable_conservation: false,
            ..Default::default()
        };
        let files = nodes(&[("hub.md", 0.9), ("x.md", 0.1)]);
        let mut graph = AttentionGraph::new();
        graph.add_edge("hub.md", "x.md");

        let deltas = propagation_deltas(&files, &graph, &config);
        assert!(!deltas.contains_key("hub.md"));
        assert!((deltas["x.md"] - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_propagation_skips_unknown_targets_and_self_loops() {
        let files = nodes(&[("hub.md", 0.9), ("x.md", 0.1)]);
        let mut graph = AttentionGraph::new();
        graph.add_edge("hub.md", "hub.md");
        graph.add_edge("hub.md", "missing.md");
        graph.add_edge("hub.md", "x.md");

        let deltas = propagation_deltas(&files, &graph, &PressureConfig::default());
        assert!((deltas["x.md"] - 0.15).abs() < 1e-12);
        assert!(!deltas.contains_key("missing.md"));
    }

    #[test]
    fn test_decay_ordering_by_basin_depth() {
        let config = PressureConfig::default();
        let mut shallow = FileNode::with_pressure("shallow.md", 0.9);
        shallow.basin_depth = 1.0;
        let mut deep = FileNode::with_pressure("deep.md", 0.9);
        deep.basin_depth = 2.5;

        let shallow = decay_node(&shallow, 10, &config);
        let deep = decay_node(&deep, 10, &config);

        assert!((shallow.raw_pressure - 0.9 * 0.85).abs() < 1e-3);
        assert!((deep.raw_pressure - 0.9 * 0.85_f64.powf(0.4)).abs() < 1e-3);
        assert!(deep.raw_pressure > shallow.raw_pressure);
    }

    #[test]
    fn test_recently_activated_files_are_immune() {
        let config = PressureConfig::default();
        let mut node = FileNode::with_pressure("a.md", 0.9);
        node.last_activated = 9;
        node.activation_count = 1;

        assert_eq!(decay_node(&node, 10, &config).raw_pressure, node.raw_pressure);
        assert!(decay_node(&node, 11, &config).raw_pressure < node.raw_pressure);
    }

    #[test]
    fn test_decay_snaps_to_floor() {
        let config = PressureConfig::default();
        let node = FileNode::with_pressure("a.md", 0.001);
        assert_eq!(decay_node(&node, 10, &config).raw_pressure, 0.0);
    }

    #[test]
    fn test_linear_policy_never_resurrects() {
        let config = PressureConfig::default();
        let mut node = FileNode::with_pressure("a.md", 0.0);
        node.activation_count = 3;
        node.last_activated = 1;

        let next = decay_node(&node, 500, &config);
        assert_eq!(next.raw_pressure, 0.0);
        assert_eq!(next.last_resurrected, 0);
    }

    #[test]
    fn test_toroidal_policy_resurrects_dormant_files() {
        let config = PressureConfig {
            decay_policy: DecayPolicy::toroidal(),
            ..Default::default()
        };
        let mut node = FileNode::with_pressure("auth.md", 0.005);
        node.activation_count = 3;
        node.last_activated = 10;

        // Not dormant long enough yet
        let early = decay_node(&node, 50, &config);
        assert!(early.raw_pressure < 0.01);

        let late = decay_node(&node, 110, &config);
        assert_eq!(late.raw_pressure, 0.8);
        assert_eq!(late.last_resurrected, 110);

        // Cooldown applies from the last resurrection
        let mut again = late.clone();
        again.set_pressure(0.0);
        assert_eq!(decay_node(&again, 150, &config).raw_pressure, 0.0);
        assert_eq!(decay_node(&again, 210, &config).raw_pressure, 0.8);
    }

    #[test]
    fn test_toroidal_policy_skips_never_activated_files() {
        let config = PressureConfig {
            decay_policy: DecayPolicy::toroidal(),
            ..Default::default()
        };
        let node = FileNode::new("fresh.md");
        assert_eq!(decay_node(&node, 1_000, &config).raw_pressure, 0.0);
    }

    #[test]
    fn test_conserve_scales_down_exactly() {
        let config = PressureConfig {
            total_pressure_budget: 2.0,
            ..Default::default()
        };
        let files = nodes(&[("a.md", 0.9), ("b.md", 0.8), ("c.md", 0.7), ("d.md", 0.6)]);
        let (values, outcome) = conserved_pressures(&files, &config);

        let total: f64 = values.values().sum();
        assert!((total - 2.0).abs() < 1e-6);
        assert!(matches!(outcome, ConservationOutcome::Rescaled { passes: 1, .. }));
    }

    #[test]
    fn test_conserve_scales_up_with_saturation() {
        let config = PressureConfig {
            total_pressure_budget: 3.0,
            ..Default::default()
        };
        let files = nodes(&[("a.md", 0.6), ("b.md", 0.3), ("c.md", 0.2), ("d.md", 0.1)]);
        let (values, _) = conserved_pressures(&files, &config);

        let total: f64 = values.values().sum();
        assert!((total - 3.0).abs() < 1e-6);
        assert!(values.values().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(values["a.md"], 1.0);
    }

    #[test]
    fn test_conserve_zero_total_spreads_evenly() {
        let config = PressureConfig {
            total_pressure_budget: 2.0,
            ..Default::default()
        };
        let files = nodes(&[("a.md", 0.0), ("b.md", 0.0), ("c.md", 0.0), ("d.md", 0.0)]);
        let (values, outcome) = conserved_pressures(&files, &config);

        assert!(values.values().all(|v| (*v - 0.5).abs() < 1e-12));
        assert_eq!(outcome, ConservationOutcome::Redistributed { per_file: 0.5 });
    }

    #[test]
    fn test_conserve_fills_empty_files_when_rest_saturate() {
        let config = PressureConfig {
            total_pressure_budget: 2.0,
            ..Default::default()
        };
        let files = nodes(&[("a.md", 0.5), ("b.md", 0.0), ("c.md", 0.0)]);
        let (values, _) = conserved_pressures(&files, &config);

        let total: f64 = values.values().sum();
        assert!((total - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_conserve_guards() {
        let empty = BTreeMap::new();
        assert_eq!(
            conserved_pressures(&empty, &PressureConfig::default()).1,
            ConservationOutcome::Empty
        );

        let files = nodes(&[("a.md", 0.5), ("b.md", 0.5)]);
        assert!(matches!(
            conserved_pressures(&files, &PressureConfig::default()).1,
            ConservationOutcome::Unattainable { .. }
        ));

        let off = PressureConfig {
            enable_conservation: false,
            ..Default::default()
        };
        assert_eq!(conserved_pressures(&files, &off).1, ConservationOutcome::Skipped);
    }

    #[test]
    fn test_budget_drift() {
        let config = PressureConfig {
            total_pressure_budget: 2.0,
            ..Default::default()
        };
        let files = nodes(&[("a.md", 0.9), ("b.md", 0.9)]);
        assert!((budget_drift(&files, &config) - 0.1).abs() < 1e-12);
    }
}
