//! Begin/complete logging around a unit of execution work
//!
//! A scope logs `{name}_BEGIN` when opened and exactly one of
//! `{name}_COMPLETE`, `{name}_FAILED` or `{name}_INCOMPLETE` when it ends.
//! Every closing line carries `elapsed_ms`.

use std::cell::Cell;
use std::time::Instant;

use super::logger::Logger;

/// A scope that logs the start and end of a phase such as plan selection
///
/// ```ignore
/// let scope = ObservationScope::with_fields("PLAN_SELECTION", &[("candidates", "3")]);
/// // ... trial period ...
/// scope.complete_with_fields(&[("winner", "0")]);
/// ```
///
/// Dropping an unfinished scope logs `{name}_INCOMPLETE` at WARN.
pub struct ObservationScope<'a> {
    name: &'a str,
    completed: Cell<bool>,
    fields: Vec<(&'a str, String)>,
    timer: Timer,
}

impl<'a> ObservationScope<'a> {
    /// Open a scope, logging `{name}_BEGIN`
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Open a scope whose fields are repeated on the closing line
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);

        Self {
            name,
            completed: Cell::new(false),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            timer: Timer::new(),
        }
    }

    /// Logs `{name}_COMPLETE` at INFO
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    pub fn complete_with_fields(self, extra_fields: &[(&str, &str)]) {
        self.completed.set(true);
        let elapsed = self.timer.elapsed_ms();

        let mut all_fields: Vec<(&str, &str)> =
            self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all_fields.extend(extra_fields.iter().copied());
        all_fields.push(("elapsed_ms", elapsed.as_str()));

        Logger::info(&format!("{}_COMPLETE", self.name), &all_fields);
    }

    /// Logs `{name}_FAILED` at ERROR
    pub fn fail(self, reason: &str) {
        self.completed.set(true);
        let elapsed = self.timer.elapsed_ms();
        Logger::error(
            &format!("{}_FAILED", self.name),
            &[("reason", reason), ("elapsed_ms", elapsed.as_str())],
        );
    }

    /// Logs `{name}_FAILED` at FATAL
    pub fn fail_fatal(self, reason: &str) {
        self.completed.set(true);
        let elapsed = self.timer.elapsed_ms();
        Logger::fatal(
            &format!("{}_FAILED", self.name),
            &[("reason", reason), ("elapsed_ms", elapsed.as_str())],
        );
    }

    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed.get() {
            let elapsed = self.timer.elapsed_ms();
            Logger::warn(
                &format!("{}_INCOMPLETE", self.name),
                &[("reason", "scope dropped without completion"), ("elapsed_ms", elapsed.as_str())],
            );
        }
    }
}

/// Wall-clock timer for `elapsed_ms` fields
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed milliseconds as a string
    pub fn elapsed_ms(&self) -> String {
        self.start.elapsed().as_millis().to_string()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
