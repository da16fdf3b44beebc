//! Biostream Core - filtering, sample history, link quality and sessions
//!
//! This library holds the synchronous domain logic behind the biostream
//! server: a causal band-pass filter that carries its state across samples,
//! a bounded sample history, per-viewer delivery quality accounting and the
//! bearer-token session authority. Nothing here touches the network.

pub mod dsp;
pub mod ingest;
pub mod session;
pub mod stats;

pub use dsp::{
    buffer::SampleBuffer,
    filter::{FilterConfig, StreamingFilter},
};
pub use session::authority::SessionAuthority;
pub use stats::quality::QualityTracker;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (YYYY-MM-DD), set by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default sensor sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 100;

/// Default number of samples kept for late joiners and windowed queries
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Default maximum number of simultaneously registered viewers
pub const DEFAULT_MAX_CLIENTS: usize = 4;

/// Default bearer token lifetime (24 hours)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 3600;
