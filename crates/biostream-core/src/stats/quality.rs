//! Per-client link quality tracking
//!
//! Every broadcast packet is recorded as pending for each client until that
//! client acknowledges it. Acknowledged packets yield a round-trip latency
//! sample measured on the server clock; packets still pending after
//! [`STALE_AFTER`] are dropped from the pending set and from then on count
//! as lost.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Pending packets older than this are presumed lost
pub const STALE_AFTER: Duration = Duration::from_secs(10);

/// Maximum number of latency samples kept per client
const MAX_LATENCY_HISTORY: usize = 1000;

/// Loss rate (percent) below which a link is excellent
const EXCELLENT_LOSS_PCT: f64 = 1.0;

/// Loss rate (percent) below which a link is good
const GOOD_LOSS_PCT: f64 = 5.0;

/// Raw per-client counters
#[derive(Debug, Clone)]
struct ClientMetrics {
    registered_at: Instant,
    connected_at: DateTime<Utc>,
    packets_sent: u64,
    packets_received: u64,
    /// seq -> send time
    pending: HashMap<u64, Instant>,
    /// Round-trip latencies in ms, newest last
    latency_history: VecDeque<f64>,
    /// Last acknowledgement received; sends never move it
    last_packet_at: Option<Instant>,
}

impl ClientMetrics {
    fn new(now: Instant) -> Self {
        Self {
            registered_at: now,
            connected_at: Utc::now(),
            packets_sent: 0,
            packets_received: 0,
            pending: HashMap::new(),
            latency_history: VecDeque::with_capacity(MAX_LATENCY_HISTORY),
            last_packet_at: None,
        }
    }

    fn purge_stale(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, sent| now.saturating_duration_since(*sent) <= STALE_AFTER);
        before - self.pending.len()
    }

    fn push_latency(&mut self, latency_ms: f64) {
        if self.latency_history.len() >= MAX_LATENCY_HISTORY {
            self.latency_history.pop_front();
        }
        self.latency_history.push_back(latency_ms);
    }
}

/// Coarse link classification by loss rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Excellent,
    Good,
    Poor,
}

impl QualityLevel {
    pub fn from_loss_rate(loss_rate: f64) -> Self {
        if loss_rate < EXCELLENT_LOSS_PCT {
            QualityLevel::Excellent
        } else if loss_rate < GOOD_LOSS_PCT {
            QualityLevel::Good
        } else {
            QualityLevel::Poor
        }
    }
}

/// Derived statistics for one client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStats {
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub uptime_secs: f64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_pending: usize,
    /// Percent of sent packets lost
    pub loss_rate: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Sample standard deviation of latency
    pub jitter_ms: f64,
    /// Seconds since the last acknowledgement, `None` until one arrives.
    /// Measures how long the viewer has been silent, not how long ago
    /// data was sent to it.
    pub last_packet_age_secs: Option<f64>,
}

/// Stats plus their classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub quality: QualityLevel,
    #[serde(flatten)]
    pub stats: ClientStats,
}

/// Aggregate over all registered clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityOverview {
    pub active_clients: usize,
    pub total_sent: u64,
    pub total_received: u64,
    pub total_lost: u64,
    pub clients: Vec<ClientStats>,
}

/// Tracks delivery quality for every registered client
#[derive(Debug, Default)]
pub struct QualityTracker {
    clients: HashMap<String, ClientMetrics>,
}

impl QualityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a client; re-registering resets its metrics
    pub fn register(&mut self, client_id: &str) {
        self.register_at(client_id, Instant::now());
    }

    pub fn register_at(&mut self, client_id: &str, now: Instant) {
        self.clients
            .insert(client_id.to_string(), ClientMetrics::new(now));
    }

    /// Discard every metric of a client
    pub fn unregister(&mut self, client_id: &str) -> bool {
        self.clients.remove(client_id).is_some()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Record a packet handed to a client's link
    pub fn record_sent(&mut self, client_id: &str, seq: u64) {
        self.record_sent_at(client_id, seq, Instant::now());
    }

    pub fn record_sent_at(&mut self, client_id: &str, seq: u64, now: Instant) {
        let Some(metrics) = self.clients.get_mut(client_id) else {
            return;
        };
        metrics.purge_stale(now);
        metrics.packets_sent += 1;
        metrics.pending.insert(seq, now);
    }

    /// Record a client acknowledgement
    ///
    /// `client_time` is the client's own clock reading. Latency is measured
    /// round-trip on the server clock, so it is accepted and not used.
    /// Unknown or duplicate sequence numbers count as received but add no
    /// latency sample.
    pub fn record_ack(&mut self, client_id: &str, seq: u64, client_time: Option<f64>) {
        self.record_ack_at(client_id, seq, client_time, Instant::now());
    }

    pub fn record_ack_at(
        &mut self,
        client_id: &str,
        seq: u64,
        _client_time: Option<f64>,
        now: Instant,
    ) {
        let Some(metrics) = self.clients.get_mut(client_id) else {
            return;
        };
        metrics.packets_received += 1;
        metrics.last_packet_at = Some(now);

        if let Some(sent) = metrics.pending.remove(&seq) {
            let latency_ms = now.saturating_duration_since(sent).as_secs_f64() * 1000.0;
            metrics.push_latency(latency_ms);
        }
    }

    /// Drop stale pending entries of every client; returns how many were dropped
    pub fn sweep_stale(&mut self, now: Instant) -> usize {
        let dropped: usize = self
            .clients
            .values_mut()
            .map(|metrics| metrics.purge_stale(now))
            .sum();
        if dropped > 0 {
            tracing::debug!(dropped, "stale_pending_swept");
        }
        dropped
    }

    pub fn stats(&self, client_id: &str) -> Option<ClientStats> {
        self.stats_at(client_id, Instant::now())
    }

    pub fn stats_at(&self, client_id: &str, now: Instant) -> Option<ClientStats> {
        let metrics = self.clients.get(client_id)?;
        Some(compute_stats(client_id, metrics, now))
    }

    pub fn quality_report(&self, client_id: &str) -> Option<QualityReport> {
        self.quality_report_at(client_id, Instant::now())
    }

    pub fn quality_report_at(&self, client_id: &str, now: Instant) -> Option<QualityReport> {
        let stats = self.stats_at(client_id, now)?;
        Some(QualityReport {
            quality: QualityLevel::from_loss_rate(stats.loss_rate),
            stats,
        })
    }

    pub fn overview(&self) -> QualityOverview {
        self.overview_at(Instant::now())
    }

    pub fn overview_at(&self, now: Instant) -> QualityOverview {
        let mut clients: Vec<ClientStats> = self
            .clients
            .iter()
            .map(|(id, metrics)| compute_stats(id, metrics, now))
            .collect();
        clients.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));

        QualityOverview {
            active_clients: clients.len(),
            total_sent: clients.iter().map(|c| c.packets_sent).sum(),
            total_received: clients.iter().map(|c| c.packets_received).sum(),
            total_lost: clients.iter().map(|c| c.packets_lost).sum(),
            clients,
        }
    }
}

fn compute_stats(client_id: &str, metrics: &ClientMetrics, now: Instant) -> ClientStats {
    let pending = metrics.pending.len() as u64;
    let packets_lost = metrics
        .packets_sent
        .saturating_sub(metrics.packets_received)
        .saturating_sub(pending);
    let loss_rate = if metrics.packets_sent == 0 {
        0.0
    } else {
        packets_lost as f64 / metrics.packets_sent as f64 * 100.0
    };

    let history = &metrics.latency_history;
    let (avg, min, max) = if history.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let sum: f64 = history.iter().sum();
        let min = history.iter().copied().fold(f64::INFINITY, f64::min);
        let max = history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (sum / history.len() as f64, min, max)
    };

    ClientStats {
        client_id: client_id.to_string(),
        connected_at: metrics.connected_at,
        uptime_secs: now
            .saturating_duration_since(metrics.registered_at)
            .as_secs_f64(),
        packets_sent: metrics.packets_sent,
        packets_received: metrics.packets_received,
        packets_lost,
        packets_pending: metrics.pending.len(),
        loss_rate,
        avg_latency_ms: avg,
        min_latency_ms: min,
        max_latency_ms: max,
        jitter_ms: sample_std_dev(history, avg),
        last_packet_age_secs: metrics
            .last_packet_at
            .map(|t| now.saturating_duration_since(t).as_secs_f64()),
    }
}

fn sample_std_dev(values: &VecDeque<f64>, mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}
