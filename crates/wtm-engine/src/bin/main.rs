//! Topology monitor main executable

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wtm_common::Config;
use wtm_engine::{Engine, SledStore, StaticIdentityProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("wtm-monitor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("WiFi topology and quality observability engine")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .required(false),
        )
        .arg(
            Arg::new("store")
                .short('s')
                .long("store")
                .value_name("DIR")
                .help("Blob store directory (omit for in-memory only)")
                .required(false),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    init_tracing(matches.get_flag("verbose"))?;

    let config = load_config(matches.get_one::<String>("config"))?;
    info!("Starting wtm-monitor v{}", env!("CARGO_PKG_VERSION"));

    let store: Option<Arc<dyn wtm_common::BlobStore>> = match matches.get_one::<String>("store") {
        Some(dir) => match SledStore::open(&PathBuf::from(dir)) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                error!("Failed to open blob store: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let identity = Arc::new(StaticIdentityProvider::default());
    let engine = match Engine::new(config, identity, store).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to initialize engine: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.start().await {
        error!("Failed to start engine: {}", e);
        std::process::exit(1);
    }
    info!("Engine running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping");
    if let Err(e) = engine.stop().await {
        error!("Error during shutdown: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if verbose {
        "wtm_engine=debug,wtm_collector=debug,wtm_roaming=debug,wtm_quality=debug,wtm_anomaly=debug,wtm_alerting=debug,wtm_realtime=debug"
    } else {
        "wtm_engine=info,wtm_collector=info,wtm_alerting=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

fn load_config(config_path: Option<&String>) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path);
        let config_str = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    } else {
        info!("Using default configuration");
        Ok(Config::default())
    }
}
