//! Persistent application configuration
//!
//! Stores network, session, stream and filter settings in a JSON file at
//! `<data_dir>/biostream/config.json`. Command-line flags and environment
//! variables are applied on top by the binary.

use biostream_core::FilterConfig;
use biostream_server::source::SourceKind;
use biostream_server::{ServerConfig, StreamConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Password used when none is configured
pub const DEFAULT_PASSWORD: &str = "changeme";

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}

fn default_session_ttl_secs() -> u64 {
    biostream_core::DEFAULT_SESSION_TTL_SECS
}

fn default_sample_rate() -> u32 {
    biostream_core::DEFAULT_SAMPLE_RATE
}

fn default_buffer_capacity() -> usize {
    biostream_core::DEFAULT_BUFFER_CAPACITY
}

fn default_max_clients() -> usize {
    biostream_core::DEFAULT_MAX_CLIENTS
}

fn default_source() -> String {
    "push".to_string()
}

fn default_lowcut() -> f64 {
    0.5
}

fn default_highcut() -> f64 {
    45.0
}

fn default_order() -> usize {
    4
}

fn default_enabled() -> bool {
    true
}

/// Initial band-pass settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    #[serde(default = "default_lowcut")]
    pub lowcut_hz: f64,
    #[serde(default = "default_highcut")]
    pub highcut_hz: f64,
    #[serde(default = "default_order")]
    pub order: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            lowcut_hz: default_lowcut(),
            highcut_hz: default_highcut(),
            order: default_order(),
            enabled: default_enabled(),
        }
    }
}

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address to bind the HTTP server to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// HTTP/WebSocket port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared viewer password
    #[serde(default = "default_password")]
    pub password: String,
    /// Bearer token lifetime in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Sensor sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Samples kept for history queries
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Maximum simultaneous viewers
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default)]
    pub filter: FilterSettings,
    /// `push`, `stdin`, `file:<path>` or `tcp:<host:port>`
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            password: default_password(),
            session_ttl_secs: default_session_ttl_secs(),
            sample_rate: default_sample_rate(),
            buffer_capacity: default_buffer_capacity(),
            max_clients: default_max_clients(),
            filter: FilterSettings::default(),
            source: default_source(),
        }
    }
}

impl AppConfig {
    /// Config file path: `<data_dir>/biostream/config.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("biostream")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Parsed ingestion source
    pub fn source_kind(&self) -> anyhow::Result<SourceKind> {
        self.source.parse().map_err(anyhow::Error::msg)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            bind_addr: self.bind_addr.clone(),
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            password: self.password.clone(),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            sample_rate: self.sample_rate,
            buffer_capacity: self.buffer_capacity,
            max_clients: self.max_clients,
            filter: FilterConfig {
                lowcut_hz: self.filter.lowcut_hz,
                highcut_hz: self.filter.highcut_hz,
                order: self.filter.order,
                sample_rate_hz: self.sample_rate as f64,
                enabled: self.filter.enabled,
            },
            ..StreamConfig::default()
        }
    }
}
