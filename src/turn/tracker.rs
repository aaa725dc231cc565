//! Turn State Tracker
//!
//! Pure transitions from one turn's state to the next: the attention cluster,
//! sustained-focus counter, tension and pressure inheritance.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{HologramConfig, TurnStateConfig};
use crate::pressure::PressureField;
use crate::resolution::{compute_query_tension, extract_tension_sources, ResolutionResult};

use super::crystallize::should_crystallize;
use super::state::TurnState;

// =============================================================================
// ATTENTION CLUSTER
// =============================================================================

/// Next cluster and sustained counter.
///
/// A resolution starts a fresh cluster from exactly the activated files. Until
/// then the cluster only grows, and focus counts as sustained whenever the
/// activation overlaps it (the first activation into an empty cluster counts).
pub fn update_attention_cluster(
    prev_cluster: &BTreeSet<String>,
    activated: &BTreeSet<String>,
    sustained_turns: u32,
    resolved: bool,
) -> (BTreeSet<String>, u32) {
    if resolved {
        return (activated.clone(), 0);
    }

    let sustained = if prev_cluster.is_empty() {
        if activated.is_empty() {
            sustained_turns
        } else {
            1
        }
    } else if !prev_cluster.is_disjoint(activated) {
        sustained_turns.saturating_add(1)
    } else {
        sustained_turns
    };

    let cluster = prev_cluster.union(activated).cloned().collect();
    (cluster, sustained)
}

// =============================================================================
// PRESSURE INHERITANCE
// =============================================================================

/// Pressure each sufficiently hot file carries into the next turn
pub fn compute_inherited_pressure(
    field: &PressureField,
    config: &TurnStateConfig,
) -> BTreeMap<String, f64> {
    if !config.enable_inheritance {
        return BTreeMap::new();
    }
    field
        .active_nodes()
        .filter(|node| node.raw_pressure >= config.inheritance_threshold)
        .map(|node| (node.path.clone(), node.raw_pressure * config.inheritance_rate))
        .collect()
}

/// Add carried pressure onto matching files, clamped to 1.0
pub fn apply_inherited_pressure(
    field: &mut PressureField,
    inherited: &BTreeMap<String, f64>,
    config: &TurnStateConfig,
) {
    if !config.enable_inheritance || inherited.is_empty() {
        return;
    }
    field.apply_deltas(inherited);
}

// =============================================================================
// TENSION
// =============================================================================

/// Next tension level and open sources.
///
/// Tension decays every turn. An unresolved query adds its own tension on top,
/// weighted up for every source it repeats from the previous turn. A
/// resolution keeps only a fraction and clears the sources.
pub fn update_tension(
    prev_tension: f64,
    prev_sources: &[String],
    query: &str,
    resolved: bool,
    config: &TurnStateConfig,
) -> (f64, Vec<String>) {
    let carried = prev_tension.clamp(0.0, 1.0) * (1.0 - config.tension_decay);

    if resolved {
        return (carried * config.resolution_tension_factor, Vec::new());
    }

    let query_sources = extract_tension_sources(query);
    let repeated = query_sources
        .iter()
        .filter(|s| prev_sources.contains(s))
        .count();
    let added = (compute_query_tension(query) * (1.0 + config.tension_accumulation * repeated as f64))
        .min(1.0);
    let tension = carried + added * (1.0 - carried);

    let mut sources: Vec<String> = prev_sources.to_vec();
    for source in query_sources {
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    // Keep the most recent sources
    if sources.len() > config.max_tension_sources {
        let excess = sources.len() - config.max_tension_sources;
        sources.drain(..excess);
    }

    (tension, sources)
}

// =============================================================================
// STATE TRANSITION
// =============================================================================

/// Compute the state after one turn from the previous state and the turn's outcome.
///
/// `activated` must hold only registered ids; `field` is the turn's final
/// pressure field.
pub fn compute_next_state(
    prev: &TurnState,
    activated: &BTreeSet<String>,
    field: &PressureField,
    query: &str,
    resolution: &ResolutionResult,
    config: &HologramConfig,
) -> TurnState {
    let turn = prev.turn + 1;
    let resolved = resolution.resolved;

    let (attention_cluster, cluster_sustained_turns) = update_attention_cluster(
        &prev.attention_cluster,
        activated,
        prev.cluster_sustained_turns,
        resolved,
    );

    let cluster_formation_turn = if attention_cluster.is_empty() {
        0
    } else if resolved || prev.attention_cluster.is_empty() {
        turn
    } else {
        prev.cluster_formation_turn
    };

    let (unresolved_tension, tension_sources) = update_tension(
        prev.unresolved_tension,
        &prev.tension_sources,
        query,
        resolved,
        &config.turn,
    );

    let pressure_inheritance = if resolved {
        BTreeMap::new()
    } else {
        compute_inherited_pressure(field, &config.turn)
    };

    // The cluster being closed is the one that existed before this turn
    let pending_crystallization = should_crystallize(
        resolution,
        prev.cluster_sustained_turns,
        &prev.attention_cluster,
        field,
        &config.crystallize,
    );

    TurnState {
        turn,
        attention_cluster,
        cluster_formation_turn,
        cluster_sustained_turns,
        pressure_inheritance,
        unresolved_tension,
        tension_sources,
        last_resolution_turn: if resolved { turn } else { prev.last_resolution_turn },
        pending_crystallization,
    }
}
