//! Broadcast coordinator
//!
//! One tokio task owns every piece of mutable stream state: the session
//! authority, the streaming filter, the sample history, the quality tracker,
//! the client registry and the sequence counter. Everything else talks to it
//! through [`CoordinatorHandle`], which sends [`Command`]s over an mpsc queue
//! and awaits the reply on a oneshot channel.
//!
//! Clients are represented by a [`ClientLink`]: a bounded outbound queue
//! drained by that client's socket writer. Fan-out never awaits a client; a
//! link that is closed or full fails the delivery and the client is evicted
//! once the pass is complete.

use crate::protocol::{unix_time, ServerMessage};
use biostream_core::dsp::filter::{BatchOutput, FilterConfig, StreamingFilter, ValidationError};
use biostream_core::dsp::spectrum::{estimate_pulse_rate, PulseEstimate};
use biostream_core::dsp::Sample;
use biostream_core::session::{display_id, AuthError, SessionAuthority, SessionInfo, Token};
use biostream_core::stats::{ClientStats, QualityOverview, QualityReport, QualityTracker};
use biostream_core::SampleBuffer;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

/// Opaque client identifier
pub type ClientId = String;

/// Interval of the stale-pending and expired-token sweep
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Depth of the command queue into the coordinator task
const COMMAND_QUEUE_DEPTH: usize = 1024;

/// Depth of the sample queue fed by ingestion sources
const SAMPLE_QUEUE_DEPTH: usize = 4096;

/// Silence after which samples are no longer considered flowing
pub const SOURCE_IDLE_AFTER: Duration = Duration::from_secs(2);

/// Default depth of each client's outbound queue
pub const DEFAULT_CLIENT_QUEUE: usize = 256;

/// Window of filtered history used for the pulse estimate
pub const PULSE_WINDOW_SECS: f64 = 10.0;

/// Explicit stream settings handed to the coordinator
#[derive(Clone)]
pub struct StreamConfig {
    pub password: String,
    pub session_ttl: Duration,
    pub sample_rate: u32,
    pub buffer_capacity: usize,
    pub max_clients: usize,
    /// Outbound queue depth per client
    pub client_queue: usize,
    /// Initial filter; its sample rate is replaced by `sample_rate`
    pub filter: FilterConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            session_ttl: Duration::from_secs(biostream_core::DEFAULT_SESSION_TTL_SECS),
            sample_rate: biostream_core::DEFAULT_SAMPLE_RATE,
            buffer_capacity: biostream_core::DEFAULT_BUFFER_CAPACITY,
            max_clients: biostream_core::DEFAULT_MAX_CLIENTS,
            client_queue: DEFAULT_CLIENT_QUEUE,
            filter: FilterConfig::default(),
        }
    }
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("password", &"***")
            .field("session_ttl", &self.session_ttl)
            .field("sample_rate", &self.sample_rate)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("max_clients", &self.max_clients)
            .field("client_queue", &self.client_queue)
            .field("filter", &self.filter)
            .finish()
    }
}

/// Why a message could not be handed to a client
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("client link closed")]
    Closed,

    #[error("client queue full")]
    Backpressure,
}

/// Why a client could not be registered
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Unauthorized: {0}")]
    Auth(#[from] AuthError),

    #[error("Max clients reached ({max})")]
    Capacity { max: usize },

    #[error("Client link failed: {0}")]
    Link(#[from] DeliveryError),
}

/// Outbound side of one client connection
///
/// Dropping the link closes the queue; the socket writer then sends a
/// Close frame and exits.
#[derive(Debug)]
pub struct ClientLink {
    tx: mpsc::Sender<ServerMessage>,
}

impl ClientLink {
    /// Create a link and the receiver its socket writer drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a message without waiting
    pub fn try_deliver(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Counters reported by the ingestion source task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    /// Lines that yielded a sample
    pub samples_read: u64,
    /// Non-blank lines that could not be parsed, undecodable bytes included
    pub lines_rejected: u64,
    /// Failed opens and read errors
    pub errors: u64,
    /// Successful opens
    pub connections: u64,
}

/// Snapshot for the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub version: String,
    pub uptime_secs: f64,
    pub active_clients: usize,
    pub max_clients: usize,
    /// Source connected, or samples arrived within [`SOURCE_IDLE_AFTER`]
    pub source_active: bool,
    pub source_stats: SourceStats,
    pub sample_rate: u32,
    pub filter_config: FilterConfig,
    pub buffered_samples: usize,
    pub buffer_capacity: usize,
    pub last_seq: u64,
    pub active_sessions: usize,
    /// Samples refused because the sample queue was full
    pub dropped_samples: u64,
}

/// Owner of all stream state; driven by a single task
pub struct Coordinator {
    config: StreamConfig,
    sessions: SessionAuthority,
    filter: StreamingFilter,
    buffer: SampleBuffer,
    quality: QualityTracker,
    clients: HashMap<ClientId, ClientLink>,
    /// Sequence number of the next ingested sample
    next_seq: u64,
    /// Set by the source task while its input is open
    source_connected: bool,
    /// Samples arrived recently; cleared by the sweep
    receiving: bool,
    last_ingest: Option<Instant>,
    source_stats: SourceStats,
    source_task: Option<AbortHandle>,
    started: Instant,
}

impl Coordinator {
    pub fn new(config: StreamConfig) -> Result<Self, ValidationError> {
        let filter_config = FilterConfig {
            sample_rate_hz: config.sample_rate as f64,
            ..config.filter
        };
        let filter = StreamingFilter::new(filter_config)?;

        Ok(Self {
            sessions: SessionAuthority::new(&config.password, config.session_ttl),
            filter,
            buffer: SampleBuffer::new(config.buffer_capacity),
            quality: QualityTracker::new(),
            clients: HashMap::new(),
            next_seq: 1,
            source_connected: false,
            receiving: false,
            last_ingest: None,
            source_stats: SourceStats::default(),
            source_task: None,
            started: Instant::now(),
            config,
        })
    }

    // --- sessions ---

    pub fn authenticate(&mut self, password: &str) -> Result<Token, AuthError> {
        self.sessions.authenticate(password)
    }

    pub fn check_token(&mut self, token: &str) -> Result<(), AuthError> {
        self.sessions.check_token(token)
    }

    pub fn revoke_token(&mut self, token: &str) -> bool {
        self.sessions.revoke_token(token)
    }

    pub fn list_sessions(&mut self) -> Vec<SessionInfo> {
        self.sessions.list_active_sessions()
    }

    // --- clients ---

    /// Admit a client holding a valid token
    ///
    /// A rejected attempt leaves no trace. On success the `config` message is
    /// already queued on the link.
    pub fn register(&mut self, token: &str, link: ClientLink) -> Result<ClientId, RegistrationError> {
        self.register_at(token, link, Instant::now())
    }

    pub fn register_at(
        &mut self,
        token: &str,
        link: ClientLink,
        now: Instant,
    ) -> Result<ClientId, RegistrationError> {
        if let Err(e) = self.sessions.check_token_at(token, now) {
            tracing::warn!(token = %display_id(token), error = %e, "client_rejected");
            return Err(e.into());
        }
        if self.clients.len() >= self.config.max_clients {
            tracing::warn!(max = self.config.max_clients, "client_rejected_capacity");
            return Err(RegistrationError::Capacity {
                max: self.config.max_clients,
            });
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        link.try_deliver(ServerMessage::Config {
            client_id: client_id.clone(),
            filter_config: *self.filter.config(),
            sample_rate: self.config.sample_rate,
        })?;

        self.quality.register_at(&client_id, now);
        self.clients.insert(client_id.clone(), link);

        tracing::info!(
            client = %client_id,
            active = self.clients.len(),
            "client_registered"
        );
        Ok(client_id)
    }

    /// Remove a client from the registry and the quality tracker
    pub fn unregister(&mut self, client_id: &str) -> bool {
        self.remove_client(client_id, "closed")
    }

    fn remove_client(&mut self, client_id: &str, reason: &'static str) -> bool {
        let removed = self.clients.remove(client_id).is_some();
        self.quality.unregister(client_id);
        if removed {
            tracing::info!(
                client = %client_id,
                reason,
                active = self.clients.len(),
                "client_unregistered"
            );
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_registered(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    // --- data path ---

    /// Filter, number, buffer and fan out one sample; returns its sequence number
    pub fn ingest(&mut self, timestamp: f64, raw: f64) -> u64 {
        self.ingest_at(timestamp, raw, Instant::now())
    }

    pub fn ingest_at(&mut self, timestamp: f64, raw: f64, now: Instant) -> u64 {
        self.last_ingest = Some(now);
        if !self.receiving {
            self.receiving = true;
            tracing::info!("samples_flowing");
        }

        let sample = self.filter.process_sample(timestamp, raw);
        self.buffer.append(sample);

        let seq = self.next_seq;
        self.next_seq += 1;

        let message = ServerMessage::data(seq, &sample, unix_time());
        let mut failed = Vec::new();
        for (client_id, link) in &self.clients {
            self.quality.record_sent_at(client_id, seq, now);
            if let Err(e) = link.try_deliver(message.clone()) {
                tracing::warn!(client = %client_id, seq, error = %e, "delivery_failed");
                failed.push(client_id.clone());
            }
        }

        for client_id in failed {
            self.remove_client(&client_id, "delivery_failed");
        }

        tracing::trace!(seq, timestamp, raw, filtered = sample.filtered, "sample_ingested");
        seq
    }

    pub fn ack(&mut self, client_id: &str, seq: u64, client_time: Option<f64>) {
        self.ack_at(client_id, seq, client_time, Instant::now());
    }

    pub fn ack_at(&mut self, client_id: &str, seq: u64, client_time: Option<f64>, now: Instant) {
        self.quality.record_ack_at(client_id, seq, client_time, now);
    }

    /// Sequence number of the most recently ingested sample (0 before any)
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    // --- filter and history ---

    pub fn configure_filter(
        &mut self,
        lowcut_hz: f64,
        highcut_hz: f64,
        order: usize,
        enabled: bool,
    ) -> Result<FilterConfig, ValidationError> {
        self.filter.configure(lowcut_hz, highcut_hz, order, enabled)
    }

    pub fn filter_config(&self) -> FilterConfig {
        *self.filter.config()
    }

    pub fn apply_filter_to_array(&self, data: &[f64]) -> BatchOutput {
        self.filter.apply_to_array(data)
    }

    /// Buffered samples, limited to the last `window` seconds when given
    pub fn history(&self, window: Option<f64>) -> Vec<Sample> {
        match window {
            Some(window) => self.buffer.window_since(window),
            None => self.buffer.iter().copied().collect(),
        }
    }

    /// Drop the history and restart the filter
    pub fn clear_history(&mut self) {
        self.buffer.clear();
        self.filter.reset();
        tracing::info!("history_cleared");
    }

    /// Pulse estimate over the last [`PULSE_WINDOW_SECS`] of filtered data
    pub fn pulse(&self) -> Option<PulseEstimate> {
        let filtered: Vec<f64> = self
            .buffer
            .window_since(PULSE_WINDOW_SECS)
            .iter()
            .map(|s| s.filtered)
            .collect();
        estimate_pulse_rate(&filtered, self.config.sample_rate as f64)
    }

    // --- quality ---

    pub fn client_stats(&self, client_id: &str) -> Option<ClientStats> {
        self.quality.stats(client_id)
    }

    pub fn quality_report(&self, client_id: &str) -> Option<QualityReport> {
        self.quality.quality_report(client_id)
    }

    pub fn quality_overview(&self) -> QualityOverview {
        self.quality.overview()
    }

    // --- lifecycle ---

    /// Record whether the source task currently has its input open
    pub fn set_source_active(&mut self, active: bool) {
        if self.source_connected != active {
            tracing::info!(active, "source_state_changed");
        }
        self.source_connected = active;
    }

    pub fn record_source_stats(&mut self, stats: SourceStats) {
        self.source_stats = stats;
    }

    /// Connected source or recently ingested samples
    pub fn source_active(&self) -> bool {
        self.source_connected || self.receiving
    }

    /// Attach the ingestion task so shutdown can cancel it
    pub fn attach_source(&mut self, task: AbortHandle) {
        if let Some(previous) = self.source_task.replace(task) {
            previous.abort();
        }
    }

    pub fn status(&mut self) -> StreamStatus {
        StreamStatus {
            version: biostream_core::VERSION.to_string(),
            uptime_secs: self.started.elapsed().as_secs_f64(),
            active_clients: self.clients.len(),
            max_clients: self.config.max_clients,
            source_active: self.source_active(),
            source_stats: self.source_stats,
            sample_rate: self.config.sample_rate,
            filter_config: *self.filter.config(),
            buffered_samples: self.buffer.len(),
            buffer_capacity: self.buffer.capacity(),
            last_seq: self.last_seq(),
            active_sessions: self.sessions.list_active_sessions().len(),
            dropped_samples: 0,
        }
    }

    /// Periodic housekeeping: stale pending packets, expired tokens, dead links
    pub fn sweep_at(&mut self, now: Instant) {
        self.quality.sweep_stale(now);
        self.sessions.purge_expired_at(now);

        let idle = self
            .last_ingest
            .is_some_and(|t| now.saturating_duration_since(t) > SOURCE_IDLE_AFTER);
        if self.receiving && idle {
            self.receiving = false;
            tracing::info!("samples_idle");
        }

        let closed: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, link)| link.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        for client_id in closed {
            self.remove_client(&client_id, "link_closed");
        }
    }

    /// Close every client and stop the ingestion task
    pub fn shutdown(&mut self) {
        let ids: Vec<ClientId> = self.clients.keys().cloned().collect();
        for client_id in ids {
            self.remove_client(&client_id, "shutdown");
        }
        if let Some(task) = self.source_task.take() {
            task.abort();
        }
        self.source_connected = false;
        self.receiving = false;
        tracing::info!("coordinator_shutdown");
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Authenticate { password, reply } => {
                let _ = reply.send(self.authenticate(&password));
            }
            Command::CheckToken { token, reply } => {
                let _ = reply.send(self.check_token(&token));
            }
            Command::RevokeToken { token, reply } => {
                let _ = reply.send(self.revoke_token(&token));
            }
            Command::ListSessions { reply } => {
                let _ = reply.send(self.list_sessions());
            }
            Command::Register { token, link, reply } => {
                let _ = reply.send(self.register(&token, link));
            }
            Command::Unregister { client_id } => {
                self.unregister(&client_id);
            }
            Command::Ingest {
                timestamp,
                raw,
                reply,
            } => {
                let _ = reply.send(self.ingest(timestamp, raw));
            }
            Command::Ack {
                client_id,
                seq,
                client_time,
            } => {
                self.ack(&client_id, seq, client_time);
            }
            Command::ConfigureFilter {
                lowcut_hz,
                highcut_hz,
                order,
                enabled,
                reply,
            } => {
                let _ = reply.send(self.configure_filter(lowcut_hz, highcut_hz, order, enabled));
            }
            Command::GetFilterConfig { reply } => {
                let _ = reply.send(self.filter_config());
            }
            Command::History { window, reply } => {
                let _ = reply.send(self.history(window));
            }
            Command::ClearHistory { reply } => {
                self.clear_history();
                let _ = reply.send(());
            }
            Command::QualityReport { client_id, reply } => {
                let _ = reply.send(self.quality_report(&client_id));
            }
            Command::QualityOverview { reply } => {
                let _ = reply.send(self.quality_overview());
            }
            Command::Pulse { reply } => {
                let _ = reply.send(self.pulse());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::SetSourceActive { active } => {
                self.set_source_active(active);
            }
            Command::SourceStats { stats } => {
                self.record_source_stats(stats);
            }
            Command::AttachSource { task } => {
                self.attach_source(task);
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }
}

/// Commands sent to the coordinator task
pub enum Command {
    Authenticate {
        password: String,
        reply: oneshot::Sender<Result<Token, AuthError>>,
    },
    CheckToken {
        token: String,
        reply: oneshot::Sender<Result<(), AuthError>>,
    },
    RevokeToken {
        token: String,
        reply: oneshot::Sender<bool>,
    },
    ListSessions {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Register {
        token: String,
        link: ClientLink,
        reply: oneshot::Sender<Result<ClientId, RegistrationError>>,
    },
    Unregister {
        client_id: ClientId,
    },
    Ingest {
        timestamp: f64,
        raw: f64,
        reply: oneshot::Sender<u64>,
    },
    Ack {
        client_id: ClientId,
        seq: u64,
        client_time: Option<f64>,
    },
    ConfigureFilter {
        lowcut_hz: f64,
        highcut_hz: f64,
        order: usize,
        enabled: bool,
        reply: oneshot::Sender<Result<FilterConfig, ValidationError>>,
    },
    GetFilterConfig {
        reply: oneshot::Sender<FilterConfig>,
    },
    History {
        window: Option<f64>,
        reply: oneshot::Sender<Vec<Sample>>,
    },
    ClearHistory {
        reply: oneshot::Sender<()>,
    },
    QualityReport {
        client_id: ClientId,
        reply: oneshot::Sender<Option<QualityReport>>,
    },
    QualityOverview {
        reply: oneshot::Sender<QualityOverview>,
    },
    Pulse {
        reply: oneshot::Sender<Option<PulseEstimate>>,
    },
    Status {
        reply: oneshot::Sender<StreamStatus>,
    },
    SetSourceActive {
        active: bool,
    },
    SourceStats {
        stats: SourceStats,
    },
    AttachSource {
        task: AbortHandle,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to communicate with the coordinator task
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
    samples: mpsc::Sender<(f64, f64)>,
    dropped: Arc<AtomicU64>,
    client_queue: usize,
}

impl CoordinatorHandle {
    /// Spawn the coordinator on the current tokio runtime and return a handle
    pub fn spawn(coordinator: Coordinator) -> Self {
        let (tx, rx) = mpsc::channel::<Command>(COMMAND_QUEUE_DEPTH);
        let (samples, samples_rx) = mpsc::channel(SAMPLE_QUEUE_DEPTH);
        let client_queue = coordinator.config.client_queue;
        tokio::spawn(run(coordinator, rx, samples_rx));
        Self {
            tx,
            samples,
            dropped: Arc::new(AtomicU64::new(0)),
            client_queue,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> anyhow::Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| anyhow::anyhow!("Coordinator task died"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("Coordinator task died"))
    }

    async fn notify(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            tracing::debug!("coordinator_gone");
        }
    }

    /// New outbound link sized for this coordinator
    pub fn link(&self) -> (ClientLink, mpsc::Receiver<ServerMessage>) {
        ClientLink::channel(self.client_queue)
    }

    pub async fn authenticate(&self, password: String) -> anyhow::Result<Result<Token, AuthError>> {
        self.request(|reply| Command::Authenticate { password, reply })
            .await
    }

    pub async fn check_token(&self, token: String) -> anyhow::Result<Result<(), AuthError>> {
        self.request(|reply| Command::CheckToken { token, reply })
            .await
    }

    pub async fn revoke_token(&self, token: String) -> anyhow::Result<bool> {
        self.request(|reply| Command::RevokeToken { token, reply })
            .await
    }

    pub async fn list_sessions(&self) -> anyhow::Result<Vec<SessionInfo>> {
        self.request(|reply| Command::ListSessions { reply }).await
    }

    pub async fn register(
        &self,
        token: String,
        link: ClientLink,
    ) -> anyhow::Result<Result<ClientId, RegistrationError>> {
        self.request(|reply| Command::Register { token, link, reply })
            .await
    }

    pub async fn unregister(&self, client_id: ClientId) {
        self.notify(Command::Unregister { client_id }).await;
    }

    /// Non-blocking sample hand-off for ingestion sources
    ///
    /// Samples travel on their own queue, which the coordinator drains
    /// before any command. Returns false when the sample was dropped
    /// because that queue is full or the coordinator is gone.
    pub fn on_sample(&self, timestamp: f64, raw: f64) -> bool {
        match self.samples.try_send((timestamp, raw)) {
            Ok(()) => true,
            Err(e) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    let reason = match e {
                        TrySendError::Full(_) => "queue_full",
                        TrySendError::Closed(_) => "coordinator_gone",
                    };
                    tracing::warn!(dropped, reason, "samples_dropped");
                }
                false
            }
        }
    }

    /// Ingest a sample and wait for its sequence number
    pub async fn ingest(&self, timestamp: f64, raw: f64) -> anyhow::Result<u64> {
        self.request(|reply| Command::Ingest {
            timestamp,
            raw,
            reply,
        })
        .await
    }

    pub async fn ack(&self, client_id: ClientId, seq: u64, client_time: Option<f64>) {
        self.notify(Command::Ack {
            client_id,
            seq,
            client_time,
        })
        .await;
    }

    pub async fn configure_filter(
        &self,
        lowcut_hz: f64,
        highcut_hz: f64,
        order: usize,
        enabled: bool,
    ) -> anyhow::Result<Result<FilterConfig, ValidationError>> {
        self.request(|reply| Command::ConfigureFilter {
            lowcut_hz,
            highcut_hz,
            order,
            enabled,
            reply,
        })
        .await
    }

    pub async fn filter_config(&self) -> anyhow::Result<FilterConfig> {
        self.request(|reply| Command::GetFilterConfig { reply })
            .await
    }

    /// Zero-phase filter a captured segment with the current settings
    ///
    /// Runs on the blocking pool so large arrays never stall the stream.
    pub async fn apply_filter_to_array(&self, data: Vec<f64>) -> anyhow::Result<BatchOutput> {
        let config = self.filter_config().await?;
        let filter = StreamingFilter::new(config)?;
        let output = tokio::task::spawn_blocking(move || filter.apply_to_array(&data)).await?;
        Ok(output)
    }

    pub async fn history(&self, window: Option<f64>) -> anyhow::Result<Vec<Sample>> {
        self.request(|reply| Command::History { window, reply })
            .await
    }

    pub async fn clear_history(&self) -> anyhow::Result<()> {
        self.request(|reply| Command::ClearHistory { reply }).await
    }

    pub async fn quality_report(&self, client_id: ClientId) -> anyhow::Result<Option<QualityReport>> {
        self.request(|reply| Command::QualityReport { client_id, reply })
            .await
    }

    pub async fn quality_overview(&self) -> anyhow::Result<QualityOverview> {
        self.request(|reply| Command::QualityOverview { reply })
            .await
    }

    pub async fn pulse(&self) -> anyhow::Result<Option<PulseEstimate>> {
        self.request(|reply| Command::Pulse { reply }).await
    }

    pub async fn status(&self) -> anyhow::Result<StreamStatus> {
        let mut status = self.request(|reply| Command::Status { reply }).await?;
        status.dropped_samples = self.dropped_samples();
        Ok(status)
    }

    pub async fn set_source_active(&self, active: bool) {
        self.notify(Command::SetSourceActive { active }).await;
    }

    pub async fn report_source_stats(&self, stats: SourceStats) {
        self.notify(Command::SourceStats { stats }).await;
    }

    pub async fn attach_source(&self, task: AbortHandle) {
        self.notify(Command::AttachSource { task }).await;
    }

    /// Close all clients, stop the source and end the coordinator task
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run(
    mut coordinator: Coordinator,
    mut rx: mpsc::Receiver<Command>,
    mut samples: mpsc::Receiver<(f64, f64)>,
) {
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        sample_rate = coordinator.config.sample_rate,
        max_clients = coordinator.config.max_clients,
        "coordinator_started"
    );

    loop {
        tokio::select! {
            biased;

            Some((timestamp, raw)) = samples.recv() => {
                coordinator.ingest(timestamp, raw);
            }
            command = rx.recv() => match command {
                Some(command @ Command::Shutdown { .. }) => {
                    coordinator.dispatch(command);
                    break;
                }
                Some(command) => coordinator.dispatch(command),
                None => {
                    coordinator.shutdown();
                    break;
                }
            },
            _ = sweep.tick() => coordinator.sweep_at(Instant::now()),
        }
    }
}
