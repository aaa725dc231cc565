//! Turn Orchestrator
//!
//! Runs one conversation turn as a single synchronous pass:
//!
//! 1. classify resolution (query, plus response and tool calls when present)
//! 2. carry inherited pressure forward (when enabled)
//! 3. activate → propagate → decay → conserve (when due) → basin update
//! 4. compute the next turn state
//! 5. emit a `TurnRecord`
//!
//! The order is fixed: each stage observes the output of the one before it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};
use ulid::Ulid;

use crate::config::{ConfigError, HologramConfig};
use crate::graph::AttentionGraph;
use crate::pressure::{
    ConservationOutcome, PressureField, PressureStats, Tier, TierPartition,
};
use crate::resolution::{analyze_query, resolve_in_context, ResolutionResult, ToolCall};
use crate::turn::{
    apply_inherited_pressure, compute_next_state, snapshot_cluster, ClusterSnapshot, TurnState,
};

// ============ Records ============

/// Everything the caller knows about a turn before it is processed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnInput {
    pub query: String,
    /// Files the retrieval layer considers relevant to this turn
    pub activated: Vec<String>,
    pub response: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl TurnInput {
    pub fn new(query: impl Into<String>, activated: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            query: query.into(),
            activated: activated.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Per-file view in a turn record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub path: String,
    pub pressure: f64,
    pub bucket: u8,
    pub tier: Tier,
    pub basin_depth: f64,
    pub consecutive_hot_turns: u32,
}

/// Output of one processed turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub turn: u64,
    pub processed_at: DateTime<Utc>,
    /// Registered files that were activated, in id order
    pub activated: Vec<String>,
    #[serde(flatten)]
    pub tiers: TierPartition,
    /// Active files ordered by descending pressure, then id
    pub files: Vec<FileStats>,
    pub stats: PressureStats,
    pub resolution: ResolutionResult,
    pub tension: f64,
    pub tension_sources: Vec<String>,
    pub is_followup: bool,
    pub pending_crystallization: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crystallization: Option<ClusterSnapshot>,
    pub conservation: ConservationOutcome,
    pub resurrected: Vec<String>,
}

// ============ Orchestrator ============

/// Owns one conversation's field, state and configuration.
///
/// Independent conversations use independent orchestrators; nothing is shared.
#[derive(Debug, Clone)]
pub struct TurnOrchestrator {
    session_id: String,
    config: HologramConfig,
    field: PressureField,
    state: TurnState,
    graph: AttentionGraph,
}

impl TurnOrchestrator {
    /// Fresh session with an empty field
    pub fn new(config: HologramConfig) -> Result<Self, ConfigError> {
        Self::resume(Ulid::new().to_string(), config, PressureField::new(), TurnState::new())
    }

    /// Continue a session from persisted parts
    pub fn resume(
        session_id: String,
        config: HologramConfig,
        field: PressureField,
        state: TurnState,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            session_id,
            config,
            field,
            state,
            graph: AttentionGraph::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &HologramConfig {
        &self.config
    }

    pub fn field(&self) -> &PressureField {
        &self.field
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn graph(&self) -> &AttentionGraph {
        &self.graph
    }

    /// Replace the adjacency graph used for propagation
    pub fn set_graph(&mut self, graph: AttentionGraph) {
        debug!(edges = graph.edge_count(), "Attention graph updated");
        self.graph = graph;
    }

    /// Register files, returning how many were newly added or restored
    pub fn register_files<I, S>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        paths
            .into_iter()
            .filter(|p| self.field.register(p.as_ref()))
            .count()
    }

    pub fn archive_file(&mut self, path: &str) -> bool {
        self.field.archive(path)
    }

    /// Tier partition and stats for the current field, without advancing a turn
    pub fn snapshot(&self) -> (TierPartition, PressureStats) {
        (
            self.field.partition(&self.config.pressure),
            self.field.stats(&self.config.pressure),
        )
    }

    /// Process one turn. Never fails: unknown files and numeric edge cases
    /// degrade to no-ops.
    pub fn process_turn(&mut self, input: &TurnInput) -> TurnRecord {
        let turn = self.state.turn + 1;
        let pressure_config = &self.config.pressure;

        // (1) Resolution
        let prev_activated: Vec<String> = self.state.attention_cluster.iter().cloned().collect();
        let analysis = analyze_query(
            &input.query,
            self.state.unresolved_tension,
            &prev_activated,
            &self.config.resolution,
        );
        let mut resolution = resolve_in_context(
            analysis.resolution.clone(),
            input.response.as_deref().unwrap_or(""),
            &input.tool_calls,
            &self.state.tension_sources,
            &self.config.resolution,
        );
        debug!(
            turn = turn,
            resolved = resolution.resolved,
            resolution_type = resolution.resolution_type.as_str(),
            "Classified turn"
        );

        // (1b) Inheritance from the previous turn
        apply_inherited_pressure(&mut self.field, &self.state.pressure_inheritance, &self.config.turn);

        // (2) Activation
        let requested: BTreeSet<String> = input.activated.iter().cloned().collect();
        let activated = self.field.activate(&requested, turn, pressure_config);
        if activated.len() < requested.len() {
            debug!(
                requested = requested.len(),
                applied = activated.len(),
                "Skipped activation of unregistered files"
            );
        }

        // (3) Propagation
        let flows = self.field.propagate(&self.graph, pressure_config);

        // (4) Decay
        let decay = self.field.decay(turn, pressure_config);
        for path in &decay.resurrected {
            info!(path = %path, turn = turn, "Resurrected dormant file");
        }

        // (5) Conservation
        let conservation = if self.field.needs_conservation(turn, pressure_config) {
            let outcome = self.field.conserve(pressure_config);
            debug!(turn = turn, outcome = ?outcome, "Conservation pass");
            outcome
        } else {
            ConservationOutcome::Skipped
        };

        // (6) Basins
        self.field.update_basins(pressure_config);

        // (7) Next state
        let activated_set: BTreeSet<String> = activated.iter().cloned().collect();
        let next = compute_next_state(
            &self.state,
            &activated_set,
            &self.field,
            &input.query,
            &resolution,
            &self.config,
        );
        resolution.tension_delta = next.unresolved_tension - self.state.unresolved_tension;
        let crystallization = next
            .pending_crystallization
            .then(|| snapshot_cluster(&self.state, &self.field, &resolution));

        // (8) Record
        let files = self
            .field
            .ranked()
            .into_iter()
            .map(|node| FileStats {
                path: node.path.clone(),
                pressure: node.raw_pressure,
                bucket: node.pressure_bucket,
                tier: node.tier(pressure_config),
                basin_depth: node.basin_depth,
                consecutive_hot_turns: node.consecutive_hot_turns,
            })
            .collect();

        let record = TurnRecord {
            session_id: self.session_id.clone(),
            turn,
            processed_at: Utc::now(),
            activated,
            tiers: self.field.partition(pressure_config),
            files,
            stats: self.field.stats(pressure_config),
            resolution,
            tension: next.unresolved_tension,
            tension_sources: next.tension_sources.clone(),
            is_followup: analysis.is_followup,
            pending_crystallization: next.pending_crystallization,
            crystallization,
            conservation,
            resurrected: decay.resurrected,
        };

        info!(
            turn = turn,
            hot = record.tiers.hot.len(),
            warm = record.tiers.warm.len(),
            flows = flows.len(),
            total_pressure = record.stats.total_pressure,
            "Processed turn"
        );

        self.state = next;
        record
    }

    /// Drop all pressure and turn history, keeping the registered file set
    pub fn reset(&mut self) {
        let paths: Vec<String> = self.field.active_nodes().map(|n| n.path.clone()).collect();
        self.field = PressureField::new();
        self.register_files(paths);
        self.state = TurnState::new();
        self.session_id = Ulid::new().to_string();
    }
}
