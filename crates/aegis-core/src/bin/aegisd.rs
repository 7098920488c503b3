//! Aegis safety core daemon

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use aegis_common::Config;
use aegis_core::SafetyCore;

#[derive(Parser, Debug)]
#[command(name = "aegisd", about = "Aegis cognitive safety core")]
struct Args {
    /// Path to a TOML configuration file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the store path from the config
    #[arg(long)]
    store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(store) = args.store {
        config.store.path = store;
    }

    let core = match SafetyCore::build(config).await {
        Ok(core) => core,
        Err(e) => {
            // startup corruption and migration failure are fatal
            error!(
                failure = %serde_json::json!({ "stage": "startup", "error": e.to_string() }),
                "refusing to serve"
            );
            std::process::exit(2);
        }
    };

    core.register_default_probes();
    core.start();
    info!("aegisd running; ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    core.stop().await;
    Ok(())
}
