use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use vector_relations::config::Config;
use vector_relations::errors::format_user_error;
use vector_relations::server::ToolServer;
use vector_relations::service::RelationService;

#[derive(Parser)]
#[command(
    name = "vector-relations",
    version,
    about = "Vector relationship service: content embedding, similarity search, and relationship analysis"
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Storage backend override ("redis" or "memory").
    #[arg(long)]
    backend: Option<String>,

    /// Log level override.
    #[arg(long)]
    log_level: Option<String>,

    /// Print a one-shot health report and exit.
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            std::process::exit(1);
        }
    };
    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }
    if let Some(level) = cli.log_level {
        config.server.log_level = level;
    }
    if let Err(e) = config.validate() {
        eprintln!("{}", format_user_error(&e));
        std::process::exit(1);
    }

    // The protocol stream owns stdout; logs go to stderr.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("vector_relations={}", config.server.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    info!("🚀 Starting vector relations service...");

    match RelationService::new(config).await {
        Ok(service) => {
            if cli.health {
                let health = service.health().await?;
                println!("{}", serde_json::to_string_pretty(&health)?);
                return Ok(());
            }

            info!("Service initialized successfully");
            let server = ToolServer::new(Arc::new(service));
            if let Err(e) = server.run().await {
                error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Failed to initialize service: {}", format_user_error(&e));
            std::process::exit(1);
        }
    }

    Ok(())
}
