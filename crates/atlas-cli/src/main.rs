mod config;
mod server;
mod service;
mod watch;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use atlas_core::{DEFAULT_SEARCH_LIMIT, GraphId, TraceRequest, neighborhood};
use atlas_store::Store;

use config::AtlasConfig;
use service::GraphService;
use watch::ChangePoller;

#[derive(Parser)]
#[command(name = "atlas", about = "Read-only graph views over an agent's memory store")]
struct Cli {
    /// Memory store to read (overrides $ATLAS_DB and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (defaults to $ATLAS_CONFIG, then ~/.memory-atlas/atlas.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Global overview: entities, active patterns, urgent commitments
    Overview {
        /// Include every live memory, not just urgent commitments
        #[arg(long)]
        memories: bool,

        /// Keep invalidated relationships
        #[arg(long)]
        historical: bool,
    },

    /// Graph around one node, e.g. `entity-12`
    Neighborhood {
        id: String,

        #[arg(long, default_value_t = neighborhood::MIN_DEPTH)]
        depth: usize,

        #[arg(long)]
        historical: bool,
    },

    /// Strongest path between two nodes
    Trace {
        from: String,
        to: String,

        #[arg(long)]
        max_depth: Option<usize>,

        #[arg(long)]
        historical: bool,
    },

    /// Find entities, patterns, and memories by text
    Search {
        query: String,

        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },

    /// Top entities, urgent commitments, active patterns, cooling contacts
    Insights,

    /// Overview positioned by the force layout, with edge geometry
    Layout {
        #[arg(long)]
        memories: bool,
    },

    /// Print one JSON line per store change until interrupted
    Watch,

    /// Start the HTTP JSON server
    Serve {
        /// Listen address (overrides `bind` in the config)
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn parse_id(raw: &str) -> Result<GraphId> {
    raw.parse()
        .with_context(|| format!("invalid graph id '{raw}'"))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AtlasConfig::load(cli.config.as_deref())?;
    let db = config.resolve_db(cli.db.as_deref());
    tracing::debug!(db = %db.display(), "resolved memory store");

    let pretty = cli.pretty;
    let open = || GraphService::open(&db, &config);
    match &cli.command {
        Commands::Overview {
            memories,
            historical,
        } => print_json(&open()?.overview(*memories, *historical)?, pretty),
        Commands::Neighborhood {
            id,
            depth,
            historical,
        } => {
            let focus = parse_id(id)?;
            print_json(&open()?.neighborhood(focus, *depth, *historical)?, pretty)
        }
        Commands::Trace {
            from,
            to,
            max_depth,
            historical,
        } => {
            let mut request = TraceRequest::new(parse_id(from)?, parse_id(to)?);
            if let Some(max_depth) = max_depth {
                request = request.with_max_depth(*max_depth);
            }
            print_json(&open()?.trace(request, *historical)?, pretty)
        }
        Commands::Search { query, limit } => print_json(&open()?.search(query, *limit)?, pretty),
        Commands::Insights => print_json(&open()?.insights()?, pretty),
        Commands::Layout { memories } => print_json(&open()?.layout(*memories)?, pretty),
        Commands::Watch => cmd_watch(&db, &config, pretty).await,
        Commands::Serve { bind } => {
            let bind = bind.clone().unwrap_or_else(|| config.bind.clone());
            cmd_serve(&db, &config, &bind).await
        }
    }
}

async fn cmd_watch(db: &Path, config: &AtlasConfig, pretty: bool) -> Result<()> {
    let store = Store::open(db).with_context(|| format!("failed to open memory store {}", db.display()))?;
    let poller = ChangePoller::new(store);
    let (tx, mut rx) = broadcast::channel(16);
    let cancel = CancellationToken::new();
    let interval = Duration::from_secs(config.poll_interval_secs.max(1));
    let watcher = tokio::spawn(watch::run(poller, interval, tx, cancel.clone()));
    tracing::info!(db = %db.display(), "watching for changes");

    let signal = shutdown_signal();
    tokio::pin!(signal);
    loop {
        tokio::select! {
            _ = &mut signal => break,
            received = rx.recv() => match received {
                Ok(event) => print_json(&event, pretty)?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "dropped change events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    watcher.await.context("change watcher panicked")?;
    Ok(())
}

async fn cmd_serve(db: &Path, config: &AtlasConfig, bind: &str) -> Result<()> {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });
    server::serve(db, config, bind, shutdown).await
}
