//! Hologram CLI
//!
//! Drives the pressure engine one turn at a time from the shell. State lives in
//! a session directory between invocations; every command prints JSON.
//! Logs go to stderr (`RUST_LOG`), so stdout stays machine-readable.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use hologram_lib::{
    analyze_query, AttentionGraph, HologramConfig, PressureStats, QueryAnalysis, StateStore,
    TierPartition, ToolCall, TurnInput, TurnOrchestrator, TurnState,
};

#[derive(Parser)]
#[command(name = "hologram")]
#[command(about = "Hologram CLI - attention pressure across conversation turns", long_about = None)]
struct Cli {
    #[command(flatten)]
    session: SessionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SessionArgs {
    /// Session state directory (overrides --session)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    /// Named session under the user data directory
    #[arg(long, global = true, default_value = "default")]
    session: String,
    /// Engine config JSON (default: config.json in the state directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one conversation turn
    Turn {
        /// The user's message
        #[arg(short, long, default_value = "")]
        query: String,
        /// Activated file ids (repeatable)
        #[arg(short, long = "activate")]
        activate: Vec<String>,
        /// Assistant response text, if already known
        #[arg(short, long)]
        response: Option<String>,
        /// Tool call as JSON, e.g. '{"tool":"Bash","command":"git commit"}' (repeatable)
        #[arg(long = "tool-call")]
        tool_calls: Vec<String>,
        /// Attention graph JSON (default: graph.json in the state directory)
        #[arg(short, long)]
        graph: Option<PathBuf>,
    },
    /// Show tiers, stats and turn state
    Status,
    /// Register files with the field
    Register {
        paths: Vec<String>,
    },
    /// Archive a file: it keeps its history but stops taking part
    Archive {
        path: String,
    },
    /// Classify a message without touching session state
    Classify {
        query: String,
        #[arg(long, default_value = "0.0")]
        prev_tension: f64,
        /// Files activated on the previous turn (repeatable)
        #[arg(long = "prev")]
        prev_activated: Vec<String>,
    },
    /// Clear pressure and turn history, keeping registered files
    Reset,
}

// ============ Output Types ============

#[derive(Serialize)]
struct StatusOutput {
    session_id: String,
    state_dir: String,
    #[serde(flatten)]
    tiers: TierPartition,
    stats: PressureStats,
    state: TurnState,
}

#[derive(Serialize)]
struct RegisterOutput {
    registered: usize,
    total: usize,
}

#[derive(Serialize)]
struct ArchiveOutput {
    path: String,
    archived: bool,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            let error = ErrorOutput {
                error: format!("{:#}", e),
            };
            match serde_json::to_string(&error) {
                Ok(json) => println!("{}", json),
                Err(_) => println!("{{\"error\": \"unknown\"}}"),
            }
            std::process::exit(1);
        }
    }
}

impl SessionArgs {
    fn store(&self) -> anyhow::Result<StateStore> {
        match &self.state_dir {
            Some(dir) => Ok(StateStore::new(dir)),
            None => Ok(StateStore::named(&self.session)?),
        }
    }

    fn config(&self, store: Option<&StateStore>) -> anyhow::Result<HologramConfig> {
        let config = match (&self.config, store) {
            (Some(path), _) => HologramConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            (None, Some(store)) => store.load_config().context("loading session config")?,
            (None, None) => HologramConfig::default(),
        };
        Ok(config)
    }

    /// Store plus the orchestrator rebuilt from it
    fn open(&self) -> anyhow::Result<(StateStore, TurnOrchestrator)> {
        let store = self.store()?;
        let config = self.config(Some(&store))?;
        let orchestrator = store.open(config)?;
        Ok((store, orchestrator))
    }
}

fn status_output(store: &StateStore, orchestrator: &TurnOrchestrator) -> StatusOutput {
    let (tiers, stats) = orchestrator.snapshot();
    StatusOutput {
        session_id: orchestrator.session_id().to_string(),
        state_dir: store.dir().to_string_lossy().to_string(),
        tiers,
        stats,
        state: orchestrator.state().clone(),
    }
}

fn run(cli: Cli) -> anyhow::Result<String> {
    let args = cli.session;

    let output = match cli.command {
        Commands::Turn {
            query,
            activate,
            response,
            tool_calls,
            graph,
        } => {
            let (store, mut orchestrator) = args.open()?;
            if let Some(path) = graph {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading graph {}", path.display()))?;
                let graph: AttentionGraph = serde_json::from_str(&content)?;
                orchestrator.set_graph(graph);
            }
            let tool_calls = tool_calls
                .iter()
                .map(|raw| {
                    serde_json::from_str::<ToolCall>(raw)
                        .with_context(|| format!("parsing tool call {}", raw))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let input = TurnInput {
                query,
                activated: activate,
                response,
                tool_calls,
            };
            let record = orchestrator.process_turn(&input);
            store.save(&orchestrator)?;
            serde_json::to_string(&record)?
        }

        Commands::Status => {
            let (store, orchestrator) = args.open()?;
            serde_json::to_string(&status_output(&store, &orchestrator))?
        }

        Commands::Register { paths } => {
            let (store, mut orchestrator) = args.open()?;
            let registered = orchestrator.register_files(&paths);
            store.save(&orchestrator)?;
            serde_json::to_string(&RegisterOutput {
                registered,
                total: orchestrator.field().len(),
            })?
        }

        Commands::Archive { path } => {
            let (store, mut orchestrator) = args.open()?;
            let archived = orchestrator.archive_file(&path);
            store.save(&orchestrator)?;
            serde_json::to_string(&ArchiveOutput { path, archived })?
        }

        Commands::Classify {
            query,
            prev_tension,
            prev_activated,
        } => {
            // Reads the session config but never its pressure or turn state
            let store = args.store().ok();
            let config = args.config(store.as_ref())?;
            let analysis: QueryAnalysis =
                analyze_query(&query, prev_tension, &prev_activated, &config.resolution);
            serde_json::to_string(&analysis)?
        }

        Commands::Reset => {
            let (store, mut orchestrator) = args.open()?;
            orchestrator.reset();
            store.save(&orchestrator)?;
            serde_json::to_string(&status_output(&store, &orchestrator))?
        }
    };

    Ok(output)
}
