//! Observability for query execution
//!
//! - Structured logging (JSON lines)
//! - Lock-free counters
//! - Lifecycle event scopes
//!
//! Observability is read-only: nothing here changes what a query returns.
//!
//! # Usage
//!
//! ```ignore
//! use aerodb_exec::observability::{log_event_with_fields, Event, ObservationScope};
//!
//! log_event_with_fields(Event::PlanCached, &[("query_hash", "1A2B3C4D")]);
//!
//! let scope = ObservationScope::new("PLAN_SELECTION");
//! // ... trial period ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{ExecutionMetrics, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
