//! Signal processing module
//!
//! This module contains the signal path of the stream:
//! - Butterworth band-pass design as second-order sections ([`butterworth`])
//! - Causal streaming filter and zero-phase batch filtering ([`filter`])
//! - Fixed-capacity sample history ([`buffer`])
//! - Spectral pulse-rate estimate over a captured window ([`spectrum`])

pub mod buffer;
pub mod butterworth;
pub mod filter;
pub mod spectrum;

use serde::{Deserialize, Serialize};

/// One processed sample of the stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Source timestamp in seconds
    pub timestamp: f64,
    /// Unfiltered sensor value
    pub raw: f64,
    /// Band-passed value (equal to `raw` while filtering is off or warming up)
    pub filtered: f64,
}
