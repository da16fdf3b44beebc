//! Biostream - real-time physiological signal streaming server
//!
//! Entry point: loads the config, starts the coordinator and the sensor
//! source, then serves the REST API and WebSocket stream until Ctrl+C.

use anyhow::Result;
use biostream::config::{AppConfig, DEFAULT_PASSWORD};
use biostream::{AppState, Coordinator, CoordinatorHandle};
use biostream_server::source::{spawn_source, SourceKind};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Settings given on the command line, applied over the config file
#[derive(Default)]
struct Overrides {
    config_path: Option<PathBuf>,
    port: Option<u16>,
    password: Option<String>,
    source: Option<String>,
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("biostream=info".parse().unwrap()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut overrides = Overrides::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("biostream {} ({})", biostream::VERSION, biostream_core::BUILD_DATE);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--save-config" => {
                overrides.save_config = true;
            }
            flag @ ("--config" | "-c" | "--port" | "-p" | "--password" | "--source" | "-s") => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires a value", flag);
                    return Ok(());
                };
                match flag {
                    "--config" | "-c" => overrides.config_path = Some(PathBuf::from(value)),
                    "--port" | "-p" => match value.parse() {
                        Ok(port) => overrides.port = Some(port),
                        Err(_) => {
                            eprintln!("Error: Invalid port: {}", value);
                            return Ok(());
                        }
                    },
                    "--password" => overrides.password = Some(value.clone()),
                    _ => overrides.source = Some(value.clone()),
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    let config_path = overrides.config_path.clone().unwrap_or_else(AppConfig::path);
    let mut config = AppConfig::load_from(&config_path);
    apply_env(&mut config);
    apply_overrides(&mut config, &overrides);

    if overrides.save_config {
        config.save(&config_path)?;
        println!("Config written to {}", config_path.display());
        return Ok(());
    }

    run(config).await
}

fn print_help() {
    println!("Usage: biostream [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH     Config file (default: {})", AppConfig::path().display());
    println!("  -p, --port PORT       HTTP/WebSocket port (default: 8765)");
    println!("      --password PASS   Viewer password");
    println!("  -s, --source SOURCE   push | stdin | file:<path> | tcp:<host:port>");
    println!("      --save-config     Write the effective config and exit");
    println!("  -v, --version         Show version");
    println!("  -h, --help            Show this help");
    println!();
    println!("Environment:");
    println!("  PORT                  Overrides the configured port");
    println!("  BIOSTREAM_PASSWORD    Overrides the configured password");
    println!("  RUST_LOG              Log filter (default: biostream=info)");
    println!();
    println!("Examples:");
    println!("  biostream --source file:/dev/ttyUSB0");
    println!("  sensor-reader | biostream --source stdin --password s3cret");
}

fn apply_env(config: &mut AppConfig) {
    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
        config.port = port;
    }
    if let Ok(password) = std::env::var("BIOSTREAM_PASSWORD") {
        if !password.is_empty() {
            config.password = password;
        }
    }
}

fn apply_overrides(config: &mut AppConfig, overrides: &Overrides) {
    if let Some(port) = overrides.port {
        config.port = port;
    }
    if let Some(password) = &overrides.password {
        config.password = password.clone();
    }
    if let Some(source) = &overrides.source {
        config.source = source.clone();
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let source: SourceKind = config.source_kind()?;
    if config.password == DEFAULT_PASSWORD {
        warn!("Using the default viewer password; set BIOSTREAM_PASSWORD or --password");
    }

    let coordinator = Coordinator::new(config.stream_config())?;
    let handle = CoordinatorHandle::spawn(coordinator);

    if let Some(task) = spawn_source(source.clone(), handle.clone()) {
        handle.attach_source(task.abort_handle()).await;
    }
    info!(
        source = %source,
        sample_rate = config.sample_rate,
        max_clients = config.max_clients,
        "Biostream v{} starting",
        biostream::VERSION
    );

    let state = AppState::new(handle.clone(), config.server_config());
    let shutdown_handle = handle.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Shutdown requested");
        if let Err(e) = shutdown_handle.shutdown().await {
            warn!("Coordinator already stopped: {}", e);
        }
    };

    biostream_server::start_server(state, shutdown).await?;
    info!(dropped = handle.dropped_samples(), "Server stopped");
    Ok(())
}
