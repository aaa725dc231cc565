//! Turn State Module
//!
//! Cross-turn memory of the conversation: which files it is about, how long it
//! has stayed there, how much is still unresolved, and when a finished cluster
//! should be crystallized.

pub mod crystallize;
pub mod state;
pub mod tracker;

pub use crystallize::{should_crystallize, snapshot_cluster, ClusterFile, ClusterSnapshot};
pub use state::TurnState;
pub use tracker::{
    apply_inherited_pressure, compute_inherited_pressure, compute_next_state,
    update_attention_cluster, update_tension,
};
