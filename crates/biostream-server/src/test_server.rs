//! Standalone test server for E2E testing
//!
//! Starts the server with a synthetic PPG-like signal (1.2 Hz pulse plus a
//! slow baseline wander) fed at the configured sample rate, so the REST API
//! and WebSocket stream can be exercised without sensor hardware.
//! Password is `test` unless BIOSTREAM_PASSWORD is set.

use biostream_server::{AppState, Coordinator, CoordinatorHandle, ServerConfig, StreamConfig};
use std::f64::consts::PI;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("biostream=debug".parse().unwrap()),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8765u16);
    let password = std::env::var("BIOSTREAM_PASSWORD").unwrap_or_else(|_| "test".to_string());

    let stream = StreamConfig {
        password,
        ..StreamConfig::default()
    };
    let sample_rate = stream.sample_rate;
    let coordinator = match Coordinator::new(stream) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid filter configuration: {}", e);
            std::process::exit(1);
        }
    };
    let handle = CoordinatorHandle::spawn(coordinator);

    let feeder = tokio::spawn(synthetic_feed(handle.clone(), sample_rate));
    handle.attach_source(feeder.abort_handle()).await;
    handle.set_source_active(true).await;

    let config = ServerConfig {
        port,
        bind_addr: "127.0.0.1".to_string(),
    };
    let state = AppState::new(handle.clone(), config);

    tracing::info!(port, "Test server starting");

    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = handle.shutdown().await;
    };
    if let Err(e) = biostream_server::start_server(state, shutdown).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn synthetic_feed(handle: CoordinatorHandle, sample_rate: u32) {
    let period = Duration::from_secs_f64(1.0 / sample_rate.max(1) as f64);
    let mut ticker = tokio::time::interval(period);
    let mut n = 0u64;
    loop {
        ticker.tick().await;
        let t = n as f64 / sample_rate as f64;
        let value = 512.0 + 80.0 * (2.0 * PI * 1.2 * t).sin() + 20.0 * (2.0 * PI * 0.1 * t).sin();
        handle.on_sample(t, value);
        n += 1;
    }
}
