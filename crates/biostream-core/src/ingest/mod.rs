//! Sensor line parsing
//!
//! Sensor firmware prints one reading per line. Three shapes are accepted:
//!
//! - `"t,v"`: explicit timestamp in seconds and value
//! - `"label:X,label:Y,..."`: labelled channels, the first value is the signal
//! - `"v"`: a bare value
//!
//! Lines without their own timestamp are stamped with the time elapsed since
//! the parser was created.

use std::time::Instant;

/// Parse one line, stamping untimed readings with `elapsed_secs`
///
/// Returns `None` for blank or unparseable lines.
pub fn parse_line(line: &str, elapsed_secs: f64) -> Option<(f64, f64)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.contains(':') {
        let first = line.split(',').next()?;
        let (_, value) = first.split_once(':')?;
        let value = parse_finite(value)?;
        return Some((elapsed_secs, value));
    }

    match line.split_once(',') {
        Some((t, v)) => Some((parse_finite(t)?, parse_finite(v)?)),
        None => Some((elapsed_secs, parse_finite(line)?)),
    }
}

fn parse_finite(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Stateful parser that tracks elapsed time for untimed lines
#[derive(Debug, Clone)]
pub struct LineParser {
    started: Instant,
    parsed: u64,
    rejected: u64,
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            parsed: 0,
            rejected: 0,
        }
    }

    /// Parse a line using the time since this parser was created
    pub fn parse(&mut self, line: &str) -> Option<(f64, f64)> {
        self.parse_at(line, Instant::now())
    }

    /// Same as [`Self::parse`] with an explicit clock reading
    pub fn parse_at(&mut self, line: &str, now: Instant) -> Option<(f64, f64)> {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        match parse_line(line, elapsed) {
            Some(reading) => {
                self.parsed += 1;
                Some(reading)
            }
            None => {
                if !line.trim().is_empty() {
                    self.rejected += 1;
                    tracing::debug!(line = line.trim(), "sensor_line_rejected");
                }
                None
            }
        }
    }

    /// Lines turned into readings so far
    pub fn parsed(&self) -> u64 {
        self.parsed
    }

    /// Non-blank lines that could not be parsed
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}
