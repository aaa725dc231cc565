//! Session Persistence
//!
//! Saves a conversation's pressure field and turn state between runs:
//! - `pressure.json`: versioned envelope holding one record per file
//! - `turn_state.json`: the `TurnState`
//! - `config.json`: optional engine configuration
//! - `graph.json`: optional attention graph written by the link extractor
//!
//! Writes are atomic. Loading is lenient: a missing or corrupt file falls back
//! to an empty default with a warning, so one bad file never ends a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use ulid::Ulid;

use crate::config::{ConfigError, HologramConfig};
use crate::graph::AttentionGraph;
use crate::orchestrator::TurnOrchestrator;
use crate::pressure::{FileNode, PressureField};
use crate::turn::TurnState;

/// Current `pressure.json` layout version
pub const SCHEMA_VERSION: u32 = 3;

const APP_DIR: &str = "hologram";
const PRESSURE_FILE: &str = "pressure.json";
const TURN_STATE_FILE: &str = "turn_state.json";
const CONFIG_FILE: &str = "config.json";
const GRAPH_FILE: &str = "graph.json";

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Unsupported schema version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("Invalid session name: {0}")]
    InvalidSessionName(String),
    #[error("Data directory not found")]
    NoDataDir,
}

impl Serialize for PersistenceError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Session names become directory names: alphanumeric, dash and underscore only
pub fn validate_session_name(name: &str) -> Result<(), PersistenceError> {
    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(PersistenceError::InvalidSessionName(name.to_string()))
    }
}

/// Atomic write: write to a .tmp sibling then rename into place.
fn atomic_write(path: &Path, contents: &str) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

// ============ Stored formats ============

/// On-disk envelope for the pressure field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureSnapshot {
    pub schema_version: u32,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    pub files: Vec<FileNode>,
}

/// Either the current envelope or the older bare `{path: record}` map
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredPressure {
    Envelope(PressureSnapshot),
    Legacy(BTreeMap<String, FileNode>),
}

fn parse_pressure(content: &str) -> Result<PressureSnapshot, PersistenceError> {
    match serde_json::from_str::<StoredPressure>(content)? {
        StoredPressure::Envelope(snapshot) => {
            if snapshot.schema_version > SCHEMA_VERSION {
                return Err(PersistenceError::UnsupportedVersion {
                    found: snapshot.schema_version,
                    supported: SCHEMA_VERSION,
                });
            }
            Ok(snapshot)
        }
        StoredPressure::Legacy(map) => Ok(PressureSnapshot {
            schema_version: 1,
            session_id: String::new(),
            saved_at: None,
            files: map.into_values().collect(),
        }),
    }
}

// ============ Store ============

/// One session's state directory
#[derive(Debug, Clone, PartialEq)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/hologram/sessions/<name>`
    pub fn named(name: &str) -> Result<Self, PersistenceError> {
        validate_session_name(name)?;
        Ok(Self::new(default_state_root()?.join("sessions").join(name)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pressure_path(&self) -> PathBuf {
        self.dir.join(PRESSURE_FILE)
    }

    pub fn turn_state_path(&self) -> PathBuf {
        self.dir.join(TURN_STATE_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn graph_path(&self) -> PathBuf {
        self.dir.join(GRAPH_FILE)
    }

    fn ensure_dir(&self) -> Result<(), PersistenceError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Pressure field
    // -------------------------------------------------------------------------

    pub fn save_field(&self, session_id: &str, field: &PressureField) -> Result<(), PersistenceError> {
        self.ensure_dir()?;
        let snapshot = PressureSnapshot {
            schema_version: SCHEMA_VERSION,
            session_id: session_id.to_string(),
            saved_at: Some(Utc::now()),
            files: field.nodes().cloned().collect(),
        };
        atomic_write(&self.pressure_path(), &serde_json::to_string_pretty(&snapshot)?)
    }

    /// Strict load. `Ok(None)` when nothing has been saved yet.
    pub fn load_field(&self) -> Result<Option<PressureSnapshot>, PersistenceError> {
        let path = self.pressure_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        parse_pressure(&content).map(Some)
    }

    fn load_field_lenient(&self) -> Option<PressureSnapshot> {
        match self.load_field() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(path = ?self.pressure_path(), error = %e, "Failed to load pressure field, starting empty");
                None
            }
        }
    }

    /// Lenient load: unreadable state becomes an empty field
    pub fn load_field_or_default(&self) -> (Option<String>, PressureField) {
        match self.load_field_lenient() {
            Some(snapshot) => {
                let session_id = Some(snapshot.session_id).filter(|id| !id.is_empty());
                (session_id, PressureField::from_nodes(snapshot.files))
            }
            None => (None, PressureField::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Turn state
    // -------------------------------------------------------------------------

    pub fn save_turn_state(&self, state: &TurnState) -> Result<(), PersistenceError> {
        self.ensure_dir()?;
        atomic_write(&self.turn_state_path(), &serde_json::to_string_pretty(state)?)
    }

    /// Load the turn state, falling back to a fresh one
    pub fn load_turn_state(&self) -> TurnState {
        let path = self.turn_state_path();
        if !path.exists() {
            return TurnState::default();
        }
        let parsed = fs::read_to_string(&path)
            .map_err(PersistenceError::from)
            .and_then(|content| serde_json::from_str::<TurnState>(&content).map_err(PersistenceError::from));
        match parsed {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Failed to load turn state, starting fresh");
                TurnState::default()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Config and whole sessions
    // -------------------------------------------------------------------------

    /// `config.json` from the state directory, or defaults when absent
    pub fn load_config(&self) -> Result<HologramConfig, ConfigError> {
        let path = self.config_path();
        if path.exists() {
            HologramConfig::load(&path)
        } else {
            Ok(HologramConfig::default())
        }
    }

    /// Graph from a JSON file; an unreadable graph means no propagation
    pub fn load_graph_from(path: &Path) -> AttentionGraph {
        let parsed = fs::read_to_string(path)
            .map_err(PersistenceError::from)
            .and_then(|content| serde_json::from_str::<AttentionGraph>(&content).map_err(PersistenceError::from));
        match parsed {
            Ok(graph) => graph,
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Failed to load attention graph");
                AttentionGraph::default()
            }
        }
    }

    /// Rebuild an orchestrator from whatever state is on disk.
    ///
    /// A turn state that does not match the field (saved without one, or
    /// naming files the field does not know) is dropped for a fresh one.
    pub fn open(&self, config: HologramConfig) -> Result<TurnOrchestrator, PersistenceError> {
        let snapshot = self.load_field_lenient();
        let field_restored = snapshot.is_some();
        let (session_id, field) = match snapshot {
            Some(snapshot) => (
                Some(snapshot.session_id).filter(|id| !id.is_empty()),
                PressureField::from_nodes(snapshot.files),
            ),
            None => (None, PressureField::new()),
        };

        let mut state = self.load_turn_state();
        if state != TurnState::default() {
            let unknown = state
                .attention_cluster
                .iter()
                .chain(state.pressure_inheritance.keys())
                .find(|id| field.get(id).is_none())
                .cloned();
            if !field_restored {
                tracing::warn!(path = ?self.turn_state_path(), turn = state.turn, "Turn state has no matching pressure field, starting fresh");
                state = TurnState::default();
            } else if let Some(id) = unknown {
                tracing::warn!(path = ?self.turn_state_path(), file = %id, "Turn state references an unknown file, starting fresh");
                state = TurnState::default();
            }
        }

        let session_id = session_id.unwrap_or_else(|| Ulid::new().to_string());
        let mut orchestrator = TurnOrchestrator::resume(session_id, config, field, state)?;
        let graph_path = self.graph_path();
        if graph_path.exists() {
            orchestrator.set_graph(Self::load_graph_from(&graph_path));
        }
        Ok(orchestrator)
    }

    pub fn save(&self, orchestrator: &TurnOrchestrator) -> Result<(), PersistenceError> {
        self.save_field(orchestrator.session_id(), orchestrator.field())?;
        self.save_turn_state(orchestrator.state())?;
        Ok(())
    }
}

/// `<data dir>/hologram`
pub fn default_state_root() -> Result<PathBuf, PersistenceError> {
    let base = dirs::data_dir().ok_or(PersistenceError::NoDataDir)?;
    Ok(base.join(APP_DIR))
}
