use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use heron_common::config::HeronConfig;
use heron_document::{Ddl, DdlOptions};
use heron_kv::provider::MemoryEngine;
use heron_kv::{KvEngine, KvOptions};
use heron_server::Server;

#[derive(Parser, Debug)]
#[command(name = "herond", about = "HeronDB — transactional KV/document server")]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "heron.toml")]
    config: String,

    /// Listen address (overrides config).
    #[arg(long)]
    listen_addr: Option<String>,

    /// Schema lease in milliseconds (overrides config).
    #[arg(long)]
    lease_ms: Option<u64>,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        println!("{}", toml::to_string_pretty(&HeronConfig::default())?);
        return Ok(());
    }

    init_tracing();
    tracing::info!("starting herond...");

    let mut config = load_config(&cli.config);
    if let Some(addr) = cli.listen_addr {
        config.server.listen_addr = addr;
    }
    if let Some(lease_ms) = cli.lease_ms {
        config.document.lease_ms = lease_ms;
    }
    tracing::info!(?config, "config");

    let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::open(KvOptions::default()));

    // The DDL worker lives inside the server process.
    let ddl = Ddl::new(engine.clone(), DdlOptions::new(config.document.clone()));

    let server = Server::new(engine, config.server.clone());
    server
        .run_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("SIGINT received, shutting down");
        })
        .await?;

    ddl.stop();
    Ok(())
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,heron=debug"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn load_config(path: &str) -> HeronConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path, "loaded config");
                config
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to parse config, using defaults");
                HeronConfig::default()
            }
        },
        Err(_) => {
            tracing::info!(path, "config file not found, using defaults");
            HeronConfig::default()
        }
    }
}
