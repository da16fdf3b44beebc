//! Sensor ingestion tasks
//!
//! A source reads text lines from stdin, a file or FIFO (for example a
//! serial device node), or a TCP peer, parses them with
//! [`biostream_core::ingest::LineParser`] and hands every reading to the
//! coordinator without blocking. File and TCP sources reconnect with
//! exponential backoff; while disconnected the source is reported inactive
//! and clients simply receive no data.

use crate::coordinator::{CoordinatorHandle, SourceStats};
use biostream_core::ingest::LineParser;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

/// First reconnect delay
const BACKOFF_BASE_MS: u64 = 500;

/// Reconnect delay cap
const BACKOFF_MAX_MS: u64 = 5000;

/// Where samples come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Only `POST /api/v1/data/push`
    Push,
    Stdin,
    File(PathBuf),
    /// `host:port`
    Tcp(String),
}

impl FromStr for SourceKind {
    type Err = String;

    /// Parses `push`, `stdin`, `file:<path>` or `tcp:<host:port>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "push" => Ok(SourceKind::Push),
            "stdin" | "-" => Ok(SourceKind::Stdin),
            other => {
                if let Some(path) = other.strip_prefix("file:").filter(|p| !p.is_empty()) {
                    Ok(SourceKind::File(PathBuf::from(path)))
                } else if let Some(addr) = other.strip_prefix("tcp:").filter(|a| a.contains(':')) {
                    Ok(SourceKind::Tcp(addr.to_string()))
                } else {
                    Err(format!(
                        "unknown source '{}' (expected push, stdin, file:<path> or tcp:<host:port>)",
                        other
                    ))
                }
            }
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Push => write!(f, "push"),
            SourceKind::Stdin => write!(f, "stdin"),
            SourceKind::File(path) => write!(f, "file:{}", path.display()),
            SourceKind::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// Reconnect delay for the given attempt (1-based)
///
/// 500ms -> 1000ms -> 2000ms -> 4000ms -> 5000ms (capped)
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = BACKOFF_BASE_MS
        .saturating_mul(1u64 << exp)
        .min(BACKOFF_MAX_MS);
    Duration::from_millis(ms)
}

/// Lines between two stats reports to the coordinator
const STATS_EVERY_LINES: u64 = 100;

/// Spawn the ingestion task for `kind`; `Push` needs none
pub fn spawn_source(kind: SourceKind, coordinator: CoordinatorHandle) -> Option<JoinHandle<()>> {
    match kind {
        SourceKind::Push => None,
        SourceKind::Stdin => Some(tokio::spawn(async move {
            let mut state = SourceState::default();
            state.connections += 1;
            coordinator.set_source_active(true).await;
            let reader = BufReader::new(tokio::io::stdin());
            match pump_lines(reader, &coordinator, &mut state).await {
                Ok(()) => tracing::info!(samples = state.parser.parsed(), "source_eof"),
                Err(e) => {
                    state.errors += 1;
                    tracing::warn!(error = %e, "source_read_failed");
                }
            }
            coordinator.report_source_stats(state.stats()).await;
            coordinator.set_source_active(false).await;
        })),
        kind => Some(tokio::spawn(run_reconnecting(kind, coordinator))),
    }
}

/// Parser and counters that live across reconnects
#[derive(Debug, Default)]
struct SourceState {
    parser: LineParser,
    errors: u64,
    connections: u64,
}

impl SourceState {
    fn stats(&self) -> SourceStats {
        SourceStats {
            samples_read: self.parser.parsed(),
            lines_rejected: self.parser.rejected(),
            errors: self.errors,
            connections: self.connections,
        }
    }
}

/// An opened input; `finite` inputs end for good at EOF
struct Opened {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    finite: bool,
}

async fn run_reconnecting(kind: SourceKind, coordinator: CoordinatorHandle) {
    let mut state = SourceState::default();
    let mut attempt = 0u32;
    loop {
        match open(&kind).await {
            Ok(opened) => {
                attempt = 0;
                state.connections += 1;
                tracing::info!(source = %kind, finite = opened.finite, "source_connected");
                coordinator.set_source_active(true).await;
                let result = pump_lines(opened.reader, &coordinator, &mut state).await;
                match &result {
                    Ok(()) => tracing::info!(source = %kind, samples = state.parser.parsed(), "source_eof"),
                    Err(e) => {
                        state.errors += 1;
                        tracing::warn!(source = %kind, error = %e, "source_read_failed");
                    }
                }
                coordinator.report_source_stats(state.stats()).await;
                coordinator.set_source_active(false).await;

                if opened.finite && result.is_ok() {
                    tracing::info!(source = %kind, "source_finished");
                    return;
                }
            }
            Err(e) => {
                state.errors += 1;
                tracing::warn!(source = %kind, error = %e, attempt, "source_open_failed");
                coordinator.report_source_stats(state.stats()).await;
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = backoff_delay(attempt);
        tracing::debug!(source = %kind, delay_ms = delay.as_millis() as u64, "source_reconnect_scheduled");
        tokio::time::sleep(delay).await;
    }
}

async fn open(kind: &SourceKind) -> std::io::Result<Opened> {
    match kind {
        SourceKind::File(path) => {
            let file = tokio::fs::File::open(path).await?;
            // FIFOs and device nodes keep producing after EOF; regular files do not
            let finite = file.metadata().await?.is_file();
            Ok(Opened {
                reader: Box::new(BufReader::new(file)),
                finite,
            })
        }
        SourceKind::Tcp(addr) => {
            let stream = tokio::net::TcpStream::connect(addr).await?;
            Ok(Opened {
                reader: Box::new(BufReader::new(stream)),
                finite: false,
            })
        }
        SourceKind::Push | SourceKind::Stdin => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "source does not reconnect",
        )),
    }
}

/// Feed every parsed line to the coordinator until EOF
///
/// Bytes that are not UTF-8 are replaced, so a garbled line is rejected by
/// the parser instead of ending the stream.
async fn pump_lines<R>(
    mut reader: R,
    coordinator: &CoordinatorHandle,
    state: &mut SourceState,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(128);
    let mut lines = 0u64;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some((timestamp, value)) = state.parser.parse(&line) {
            coordinator.on_sample(timestamp, value);
        }

        lines += 1;
        if lines % STATS_EVERY_LINES == 0 {
            coordinator.report_source_stats(state.stats()).await;
        }
    }
    tracing::debug!(
        lines,
        parsed = state.parser.parsed(),
        rejected = state.parser.rejected(),
        "source_lines_summary"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Coordinator, StreamConfig};

    #[test]
    fn test_exponential_backoff_schedule() {
        let expected_delays_ms = [500u64, 1000, 2000, 4000, 5000];
        for (i, &expected) in expected_delays_ms.iter().enumerate() {
            assert_eq!(backoff_delay(i as u32 + 1), Duration::from_millis(expected));
        }
        assert_eq!(backoff_delay(100), Duration::from_millis(5000));
    }

    #[test]
    fn test_source_kind_parsing() {
        assert_eq!("push".parse(), Ok(SourceKind::Push));
        assert_eq!("stdin".parse(), Ok(SourceKind::Stdin));
        assert_eq!(
            "file:/dev/ttyUSB0".parse(),
            Ok(SourceKind::File(PathBuf::from("/dev/ttyUSB0")))
        );
        assert_eq!(
            "tcp:127.0.0.1:9000".parse(),
            Ok(SourceKind::Tcp("127.0.0.1:9000".to_string()))
        );
        assert!("serial".parse::<SourceKind>().is_err());
        assert!("tcp:nohost".parse::<SourceKind>().is_err());
        assert!("file:".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_source_kind_display_round_trip() {
        for kind in [
            SourceKind::Push,
            SourceKind::Stdin,
            SourceKind::File(PathBuf::from("/tmp/ppg.fifo")),
            SourceKind::Tcp("sensor.local:7000".to_string()),
        ] {
            assert_eq!(kind.to_string().parse(), Ok(kind));
        }
    }

    #[tokio::test]
    async fn test_pump_lines_ingests_parsed_readings() {
        let handle = CoordinatorHandle::spawn(Coordinator::new(StreamConfig::default()).unwrap());
        let input: &[u8] = b"0.00,10\n0.01,11\nnot a number\n\n0.02,12\n";

        let mut state = SourceState::default();
        pump_lines(input, &handle, &mut state).await.unwrap();
        assert_eq!(state.parser.parsed(), 3);
        assert_eq!(state.parser.rejected(), 1);

        let history = handle.history(None).await.unwrap();
        let raw: Vec<f64> = history.iter().map(|s| s.raw).collect();
        assert_eq!(raw, vec![10.0, 11.0, 12.0]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_rejected_and_stream_continues() {
        let handle = CoordinatorHandle::spawn(Coordinator::new(StreamConfig::default()).unwrap());
        let input: &[u8] = b"0.0,1\n\xff\xfe\n0.02,3\n";

        let mut state = SourceState::default();
        pump_lines(input, &handle, &mut state).await.unwrap();
        assert_eq!(state.parser.parsed(), 2);
        assert_eq!(state.parser.rejected(), 1);

        let history = handle.history(None).await.unwrap();
        let raw: Vec<f64> = history.iter().map(|s| s.raw).collect();
        assert_eq!(raw, vec![1.0, 3.0]);
    }

    #[tokio::test]
    async fn test_regular_file_is_read_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.csv");
        std::fs::write(&path, "0.00,1\n0.01,2\n0.02,3\n").unwrap();

        let handle = CoordinatorHandle::spawn(Coordinator::new(StreamConfig::default()).unwrap());
        let task = spawn_source(SourceKind::File(path), handle.clone()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("file source should finish at EOF")
            .unwrap();

        let history = handle.history(None).await.unwrap();
        assert_eq!(history.len(), 3);

        let status = handle.status().await.unwrap();
        assert_eq!(status.source_stats.samples_read, 3);
        assert_eq!(status.source_stats.connections, 1);
        assert_eq!(status.source_stats.errors, 0);
    }

    #[tokio::test]
    async fn test_missing_file_counts_open_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");

        let handle = CoordinatorHandle::spawn(Coordinator::new(StreamConfig::default()).unwrap());
        let task = spawn_source(SourceKind::File(path), handle.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        let status = handle.status().await.unwrap();
        assert!(!status.source_active);
        assert!(status.source_stats.errors >= 1);
        assert_eq!(status.source_stats.connections, 0);
    }

    #[tokio::test]
    async fn test_push_source_spawns_nothing() {
        let handle = CoordinatorHandle::spawn(Coordinator::new(StreamConfig::default()).unwrap());
        assert!(spawn_source(SourceKind::Push, handle).is_none());
    }
}
