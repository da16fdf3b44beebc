//! Biostream - real-time physiological signal streaming
//!
//! Re-exports the signal processing, session and link-quality logic from
//! `biostream-core` and the coordinator, REST API and WebSocket stream from
//! `biostream-server`. The persistent application config lives here.

pub mod config;

pub use biostream_core::dsp;
pub use biostream_core::ingest;
pub use biostream_core::session;
pub use biostream_core::stats;

pub use biostream_core::{FilterConfig, QualityTracker, SampleBuffer, SessionAuthority, StreamingFilter};
pub use biostream_core::{DEFAULT_SAMPLE_RATE, VERSION};
pub use biostream_server::{AppState, Coordinator, CoordinatorHandle, ServerConfig, StreamConfig};
