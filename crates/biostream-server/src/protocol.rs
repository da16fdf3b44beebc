//! WebSocket wire messages
//!
//! Every frame is a JSON object tagged by `"type"`. The server always sends
//! `config` first, then one `data` frame per ingested sample. Clients answer
//! each `data` frame with an `ack` carrying the same `seq`.

use biostream_core::dsp::Sample;
use biostream_core::FilterConfig;
use serde::{Deserialize, Serialize};

/// Server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Config {
        client_id: String,
        filter_config: FilterConfig,
        sample_rate: u32,
    },
    Data {
        seq: u64,
        timestamp: f64,
        raw: f64,
        filtered: f64,
        /// Unix time in seconds when the frame was built
        server_time: f64,
    },
}

impl ServerMessage {
    pub fn data(seq: u64, sample: &Sample, server_time: f64) -> Self {
        ServerMessage::Data {
            seq,
            timestamp: sample.timestamp,
            raw: sample.raw,
            filtered: sample.filtered,
            server_time,
        }
    }

    /// Sequence number of a data frame
    pub fn seq(&self) -> Option<u64> {
        match self {
            ServerMessage::Data { seq, .. } => Some(*seq),
            ServerMessage::Config { .. } => None,
        }
    }
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ack {
        seq: u64,
        #[serde(default)]
        client_time: Option<f64>,
    },
}

/// Current Unix time in fractional seconds
pub fn unix_time() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
