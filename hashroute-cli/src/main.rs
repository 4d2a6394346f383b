use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hashroute::RouterConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "hashroute")]
#[command(about = "hashroute - partition routing node and tools")]
#[command(version)]
struct Cli {
    /// Router configuration file (TOML)
    #[arg(short, long, global = true, env = "HASHROUTE_CONFIG", default_value = "hashroute.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a node with an echo handler until Ctrl-C
    Serve {
        /// Address to serve and register (overrides node_addr)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Route a single request through the cluster
    Route {
        /// Partition hash of the request
        #[arg(long)]
        hash: u64,

        /// Request payload
        #[arg(long, default_value = "")]
        payload: String,
    },

    /// Show which node owns a hash
    Owner {
        /// Partition hash to look up
        #[arg(long)]
        hash: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = RouterConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Serve { addr } => commands::run_serve(&config, addr).await,
        Commands::Route { hash, payload } => commands::run_route(&config, hash, &payload).await,
        Commands::Owner { hash } => commands::run_owner(&config, hash).await,
    }
}
