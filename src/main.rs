//! docwire - inspect a replica set from the command line.
//!
//! Uses the same configuration layers as the client library: defaults,
//! YAML file, then environment variables, with `--seed` taking precedence.

use clap::{Parser, Subcommand};
use docwire_bson::{doc, Document};
use docwire_client::{CallContext, ClientConfig, ReplicaSet};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docwire")]
#[command(about = "Inspect a document database replica set over the wire protocol")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "DOCWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Seed address (repeatable); replaces the configured seeds
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// Replica set name
    #[arg(long)]
    replica_set: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh the replica set and list every known node with its role
    Status,

    /// Run a ping command against the primary
    Ping {
        /// Prefer a secondary, falling back to the primary
        #[arg(long)]
        secondary: bool,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Status => {
            let set = ReplicaSet::from_config(&config)?;
            let refreshed = set.refresh().await;
            tracing::info!("{} of {} nodes answered", refreshed.len(), set.nodes().len());

            for handle in set.nodes() {
                let status = handle.status();
                let role = if status.is_down() {
                    "down"
                } else if status.primary {
                    "primary"
                } else if status.secondary {
                    "secondary"
                } else if status.refreshed_at.is_some() {
                    "other"
                } else {
                    "unknown"
                };
                println!("{:<30} {}", handle.address(), role);
            }
        }
        Commands::Ping { secondary } => {
            let set = ReplicaSet::from_config(&config)?;
            let mut ctx = CallContext::new();
            let (address, result) = if secondary {
                set.with_secondary(&mut ctx, |node, ctx| {
                    Box::pin(async move { ping(node, ctx).await })
                })
                .await?
            } else {
                set.with_primary(&mut ctx, |node, ctx| {
                    Box::pin(async move { ping(node, ctx).await })
                })
                .await?
            };
            println!("{address}");
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);
        }
    }

    Ok(())
}

async fn ping(
    node: &mut docwire_client::Node,
    ctx: &mut CallContext,
) -> Result<(String, Document), docwire_client::ClientError> {
    let result = node.command(ctx, "admin", doc! { "ping" => 1 }).await?;
    Ok((node.address().to_string(), result))
}

fn load_config(cli: &Cli) -> Result<ClientConfig, docwire_client::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = ClientConfig::from_file(path)?;
            tracing::debug!("Loaded config from {}", path.display());
            config
        }
        None => ClientConfig::default(),
    };
    config.apply_env_overrides();

    if !cli.seeds.is_empty() {
        config.seeds = cli.seeds.clone();
    }
    if let Some(name) = &cli.replica_set {
        config.replica_set = Some(name.clone());
    }
    config.validate()?;
    Ok(config)
}
