//! # Memoir CLI (`memoir`)
//!
//! Command-line interface for the Memoir content graph. Provides
//! database initialization, archive ingestion, agentic and raw semantic
//! search, and node edit history.
//!
//! ## Usage
//!
//! ```bash
//! memoir --config ./config/memoir.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `memoir init` | Create the SQLite database and run schema migrations |
//! | `memoir ingest <path>` | Ingest one archive export into the graph |
//! | `memoir search "<query>"` | Graded, context-expanded, clustered search |
//! | `memoir quick "<query>"` | Raw similarity-ranked search |
//! | `memoir history <node-id>` | Show a node's edit history |

mod adapters;
mod chunk;
mod config;
mod error;
mod index;
mod ingest;
mod links;
mod models;
mod progress;
mod search;
mod store;
mod versions;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{AdapterRegistry, RawSource};
use crate::index::HttpSemanticIndex;
use crate::ingest::IngestionService;
use crate::progress::{CancelFlag, ProgressMode};
use crate::search::SearchAgent;
use crate::store::sqlite::SqliteStore;
use crate::versions::VersionControl;

/// Memoir — a local-first personal-archive content graph with agentic
/// semantic retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with the database path, chunking bounds, and search settings.
#[derive(Parser)]
#[command(
    name = "memoir",
    about = "Memoir — a personal-archive content graph with agentic semantic retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/memoir.toml")]
    config: PathBuf,

    /// Progress output: auto (human when stderr is a TTY), off, human, json.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest one archive export file into the content graph.
    ///
    /// The adapter registry detects the format (ChatGPT, Telegram,
    /// markdown, plain text); oversized records are chunked into linked
    /// child nodes. The whole run is one atomic import batch.
    Ingest {
        /// Path to the export file.
        path: PathBuf,
    },

    /// Run the agentic search pipeline: grade, expand, cluster.
    Search {
        /// The search query string.
        query: String,

        /// Accepted results to collect (overrides the config).
        #[arg(long)]
        target: Option<usize>,
    },

    /// Raw similarity-ranked search, no grading or clustering.
    Quick {
        /// The search query string.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a node's append-only edit history.
    History {
        /// Node id (content address).
        node_id: String,
    },
}

fn progress_mode(arg: &str) -> Result<ProgressMode> {
    Ok(match arg {
        "auto" => ProgressMode::default_for_tty(),
        "off" => ProgressMode::Off,
        "human" => ProgressMode::Human,
        "json" => ProgressMode::Json,
        other => bail!("Unknown progress mode: '{}'. Use auto, off, human, or json.", other),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;
    let mode = progress_mode(&cli.progress)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::open(&config.db.path).await?;
            store.migrate().await?;
            println!("initialized {}", config.db.path.display());
        }

        Commands::Ingest { path } => {
            let bytes = std::fs::read(&path)?;
            let input = RawSource::new(bytes, Some(path.display().to_string()));

            let store = SqliteStore::open(&config.db.path).await?;
            let registry = AdapterRegistry::with_builtins();
            let service =
                IngestionService::new(&registry, &store).with_policy(config.chunking.policy());

            let reporter = mode.ingest_reporter();
            let stats = service
                .ingest(&input, reporter.as_ref(), &CancelFlag::new())
                .await?;

            println!("ingest {}", path.display());
            println!("  nodes created: {}", stats.nodes_created);
            println!("  nodes linked: {}", stats.nodes_linked);
            println!("  nodes skipped: {}", stats.nodes_skipped);
            for error in stats.errors.iter().take(5) {
                println!("  {}", error);
            }
            if stats.errors.len() > 5 {
                println!("  ... and {} more parse errors", stats.errors.len() - 5);
            }
            println!("  duration: {}ms", stats.duration.as_millis());
            println!("ok");
        }

        Commands::Search { query, target } => {
            let endpoint = match &config.search.endpoint {
                Some(url) => url.clone(),
                None => bail!("search.endpoint is not configured"),
            };
            let mut agent_config = config.search.agent_config();
            if let Some(target) = target {
                agent_config.target_count = target;
            }

            let agent = SearchAgent::new(HttpSemanticIndex::new(endpoint), agent_config);
            let reporter = mode.search_reporter();
            let outcome = agent
                .agent_search(&query, reporter.as_ref(), &CancelFlag::new())
                .await?;

            for (rank, result) in outcome.results.iter().enumerate() {
                let snippet: String = result.node.content.text.chars().take(120).collect();
                let expanded = if result.expanded_context.is_some() {
                    "  (expanded)"
                } else {
                    ""
                };
                println!(
                    "{:2}. [{:.1}] {}  cluster={}{}",
                    rank + 1,
                    result.quality.overall,
                    result.node.uri,
                    result.cluster,
                    expanded
                );
                println!("    {}", snippet.replace('\n', " "));
            }
            let stats = &outcome.stats;
            println!(
                "accepted {} of {} searched ({} expanded, {} rejected, {} clusters), exhausted: {}",
                stats.total_accepted,
                stats.total_searched,
                stats.total_expanded,
                stats.total_rejected,
                stats.clusters,
                stats.exhausted
            );
        }

        Commands::Quick { query, limit } => {
            let endpoint = match &config.search.endpoint {
                Some(url) => url.clone(),
                None => bail!("search.endpoint is not configured"),
            };
            let agent = SearchAgent::new(
                HttpSemanticIndex::new(endpoint),
                config.search.agent_config(),
            );
            let nodes = agent.quick_search(&query, limit).await?;
            for (rank, node) in nodes.iter().enumerate() {
                let title = node.metadata.title.as_deref().unwrap_or("(untitled)");
                println!("{:2}. {}  {}", rank + 1, node.uri, title);
            }
        }

        Commands::History { node_id } => {
            let store = SqliteStore::open(&config.db.path).await?;
            let vc = VersionControl::new(&store);
            let history = vc.history(&node_id).await?;
            if history.is_empty() {
                println!("no versions recorded for {}", node_id);
            }
            for version in history {
                println!(
                    "v{}  {}  {}  {}  {}",
                    version.version,
                    version.created_at.format("%Y-%m-%d %H:%M:%S"),
                    version.kind.as_str(),
                    version.author,
                    version.change_summary
                );
            }
        }
    }

    Ok(())
}
