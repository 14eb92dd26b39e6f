//! Structured JSON logger
//!
//! - Structured logs (JSON)
//! - Deterministic key ordering
//! - Explicit severity levels, with a process-wide minimum
//! - One log line = one event
//! - Synchronous, no buffering

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Info as u8);

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Debug-level detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
    /// Unrecoverable, process exits
    Fatal = 4,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    fn from_u8(value: u8) -> Severity {
        match value {
            0 => Severity::Trace,
            1 => Severity::Info,
            2 => Severity::Warn,
            3 => Severity::Error,
            _ => Severity::Fatal,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Writes one JSON object per line.
///
/// Lines below the minimum severity (INFO unless changed) are dropped.
/// ERROR and FATAL lines go to stderr, everything else to stdout.
pub struct Logger;

impl Logger {
    pub fn set_min_severity(severity: Severity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    pub fn min_severity() -> Severity {
        Severity::from_u8(MIN_SEVERITY.load(Ordering::Relaxed))
    }

    /// Returns true if a line at `severity` would be written
    pub fn enabled(severity: Severity) -> bool {
        severity >= Self::min_severity()
    }

    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if !Self::enabled(severity) {
            return;
        }
        let line = render_line(severity, event, fields);
        // A failed log write never fails the query
        let _ = if severity >= Severity::Error {
            io::stderr().lock().write_all(line.as_bytes())
        } else {
            io::stdout().lock().write_all(line.as_bytes())
        };
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    pub fn fatal(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Fatal, event, fields);
    }
}

/// `{"event":..,"severity":..,<fields sorted by key>}` plus a newline
fn render_line(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);

    let mut line = String::with_capacity(128);
    line.push_str("{\"event\":");
    push_json_str(&mut line, event);
    line.push_str(",\"severity\":\"");
    line.push_str(severity.as_str());
    line.push('"');
    for (key, value) in sorted {
        line.push(',');
        push_json_str(&mut line, key);
        line.push(':');
        push_json_str(&mut line, value);
    }
    line.push_str("}\n");
    line
}

fn push_json_str(line: &mut String, s: &str) {
    match serde_json::to_string(s) {
        Ok(quoted) => line.push_str(&quoted),
        Err(_) => line.push_str("\"\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_severity_ordering_and_names() {
        let all = [
            Severity::Trace,
            Severity::Info,
            Severity::Warn,
            Severity::Error,
            Severity::Fatal,
        ];
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        for sev in all {
            assert_eq!(Severity::from_u8(sev as u8), sev);
        }
        assert_eq!(Severity::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_line_is_one_json_object() {
        let line = render_line(
            Severity::Warn,
            "PLAN_TIE",
            &[("winner_score", "1.5"), ("runner_up_score", "1.5")],
        );
        assert_eq!(line.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "PLAN_TIE");
        assert_eq!(parsed["severity"], "WARN");
        assert_eq!(parsed["runner_up_score"], "1.5");
    }

    #[test]
    fn test_fields_sorted_after_event() {
        let a = render_line(Severity::Info, "NEAR_INTERVAL_OPENED", &[("max", "2"), ("last", "false")]);
        let b = render_line(Severity::Info, "NEAR_INTERVAL_OPENED", &[("last", "false"), ("max", "2")]);
        assert_eq!(a, b);
        assert!(a.find("\"event\"").unwrap() < a.find("\"last\"").unwrap());
        assert!(a.find("\"last\"").unwrap() < a.find("\"max\"").unwrap());
    }

    #[test]
    fn test_values_are_escaped() {
        let line = render_line(Severity::Error, "PLAN_SELECTION_FAILED", &[("reason", "bad \"geo\"\n")]);
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["reason"], "bad \"geo\"\n");
    }

    #[test]
    fn test_default_minimum_keeps_fatal() {
        assert!(Logger::enabled(Severity::Fatal));
    }
}
