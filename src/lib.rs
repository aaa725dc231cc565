// Hologram Library
// Attention pressure engine shared by the CLI binary and embedding hosts

pub mod config;
pub mod graph;
pub mod orchestrator;
pub mod pressure;
pub mod resolution;
pub mod session;
pub mod turn;

// Re-export commonly used types
pub use config::{
    ConfigError, CrystallizeConfig, DecayPolicy, HologramConfig, PressureConfig,
    ResolutionConfig, TieBreakPolicy, TurnStateConfig, PRESSURE_BUCKETS,
};
pub use graph::AttentionGraph;
pub use orchestrator::{FileStats, TurnInput, TurnOrchestrator, TurnRecord};
pub use pressure::{
    quantize_pressure, ConservationOutcome, FileNode, PressureField, PressureStats, Tier,
    TierPartition,
};
pub use resolution::{
    analyze_query, compute_query_tension, detect_contextual_resolution, detect_resolution,
    detect_resolution_with, resolve_in_context, QueryAnalysis, ResolutionResult, ResolutionType, ToolCall,
};
pub use session::{PersistenceError, PressureSnapshot, StateStore, SCHEMA_VERSION};
pub use turn::{ClusterSnapshot, TurnState};
