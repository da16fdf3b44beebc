//! Delivery statistics
//!
//! Per-viewer accounting of sent, acknowledged and lost packets along with
//! round-trip latency history, jitter and a coarse quality classification.

pub mod quality;

pub use quality::{ClientStats, QualityLevel, QualityOverview, QualityReport, QualityTracker};
