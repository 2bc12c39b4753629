//! CLI entry point for offline relation checks.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use tether_core::{SchemaRegistry, TetherConfig};
use tether_engine::snapshot::{sweep_snapshot, watch_snapshot};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Bidirectional relation checks for document store snapshots")]
struct Cli {
    /// Config file prefix (default: tether).
    #[arg(short, long, default_value = "tether")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the relation schema and exit.
    CheckSchema,

    /// Report drift in a snapshot without changing it.
    Audit {
        /// Snapshot file: {collection: {id: {fields}}}.
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Only sweep this collection.
        #[arg(long)]
        collection: Option<String>,
    },

    /// Repair drift in a snapshot and save the result.
    Repair {
        #[arg(short, long)]
        snapshot: PathBuf,

        #[arg(long)]
        collection: Option<String>,

        /// Where to write the repaired snapshot.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Reconcile a snapshot on the configured schedule until Ctrl-C.
    Watch {
        #[arg(short, long)]
        snapshot: PathBuf,

        #[arg(long)]
        collection: Option<String>,

        /// Where to write the snapshot on shutdown.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = TetherConfig::load(&cli.config)?;

    // Refuse to go further on a bad schema.
    let registry = SchemaRegistry::from_config(&config)?;

    let (snapshot, collection, output, watch) = match cli.command {
        Command::CheckSchema => {
            let summary: Vec<_> = registry
                .entities()
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "entity": e.name,
                        "collection": e.collection,
                        "relations": e.relations,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }
        Command::Audit {
            snapshot,
            collection,
        } => (snapshot, collection, None, false),
        Command::Repair {
            snapshot,
            collection,
            output,
        } => (snapshot, collection, Some(output), false),
        Command::Watch {
            snapshot,
            collection,
            output,
        } => (snapshot, collection, output, true),
    };

    if let Some(collection) = collection {
        if registry.entity_for_collection(&collection).is_none() {
            anyhow::bail!("Collection {collection} is not declared in the relation schema");
        }
        config.reconcile.collections = vec![collection];
    }

    if watch {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
        };
        watch_snapshot(&config, &snapshot, output.as_deref(), shutdown).await?;
        return Ok(());
    }

    let summaries = sweep_snapshot(&config, &snapshot, output.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}
