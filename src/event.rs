//! Routing observability
//!
//! Every routed call can be reported to an [`EventSink`] as a
//! [`RoutingEvent`]. Sinks are injected into the session; nothing here is
//! global.
//!
//! # Event fields
//!
//! Routed calls carry:
//! - `decision`: "WRITER" or "READER"
//! - `operation`: "execute" or "execute_multi"
//! - `db.statement`: the SQL text, truncated to the configured length
//! - `reason`: why the writer was forced, when it was
//!
//! # Example
//!
//! ```
//! use diesel_splitdb::event::{EventSink, Operation, RoutingEvent, Severity, TestSink};
//! use diesel_splitdb::router::RoutingDecision;
//!
//! let sink = TestSink::new();
//! let event = RoutingEvent::routed(
//!     RoutingDecision::Reader,
//!     Operation::Execute,
//!     "SELECT 1",
//!     None,
//!     1000,
//! );
//! sink.emit(Severity::Debug, &event);
//!
//! assert_eq!(sink.len(), 1);
//! assert_eq!(event.message(), "READER->execute: SELECT 1");
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{context::WriterReason, router::RoutingDecision, selector::ReaderTarget};

/// Default maximum SQL length carried in events
pub const DEFAULT_MAX_SQL_LENGTH: usize = 1000;

/// Severity an event is emitted at
///
/// Deserializes through [`FromStr`], so level names are case-insensitive and
/// `"warning"` is accepted for [`Severity::Warn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Severity {
    /// Trace level
    Trace,
    /// Debug level (default)
    #[default]
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level
    Error,
}

impl Severity {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }

    /// The matching `tracing` level
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            Severity::Trace => tracing::Level::TRACE,
            Severity::Debug => tracing::Level::DEBUG,
            Severity::Info => tracing::Level::INFO,
            Severity::Warn => tracing::Level::WARN,
            Severity::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for Severity {
    type Error = crate::config::ConfigError;

    fn try_from(value: String) -> Result<Self, <Severity as TryFrom<String>>::Error> {
        value.parse()
    }
}

impl FromStr for Severity {
    type Err = crate::config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            _ => Err(crate::config::ConfigError::UnknownSeverity(s.to_string())),
        }
    }
}

/// The adapter entry point a call came through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Single statement execution
    Execute,
    /// Multi-statement execution
    ExecuteMulti,
}

impl Operation {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Execute => "execute",
            Operation::ExecuteMulti => "execute_multi",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Something worth reporting about a session
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingEvent {
    /// The session settled on its reader
    ReaderSelected {
        /// The chosen reader
        target: ReaderTarget,
    },
    /// A call was routed
    Routed {
        /// Where the call went
        decision: RoutingDecision,
        /// The entry point used
        operation: Operation,
        /// Statement text, possibly truncated
        sql: String,
        /// Why the writer was forced, if it was
        reason: Option<WriterReason>,
    },
}

impl RoutingEvent {
    /// Build a routed-call event, truncating `sql` to `max_sql_length` chars
    pub fn routed(
        decision: RoutingDecision,
        operation: Operation,
        sql: &str,
        reason: Option<WriterReason>,
        max_sql_length: usize,
    ) -> Self {
        RoutingEvent::Routed {
            decision,
            operation,
            sql: truncate_sql(sql, max_sql_length),
            reason,
        }
    }

    /// The routing decision, for routed-call events
    pub fn decision(&self) -> Option<RoutingDecision> {
        match self {
            RoutingEvent::Routed { decision, .. } => Some(*decision),
            RoutingEvent::ReaderSelected { .. } => None,
        }
    }

    /// Human readable one-line message
    pub fn message(&self) -> String {
        match self {
            RoutingEvent::ReaderSelected { target } => format!("using reader {}", target),
            RoutingEvent::Routed {
                decision,
                operation,
                sql,
                reason,
            } => match reason {
                Some(reason) => format!("{}->{}: {} ({})", decision, operation, sql, reason),
                None => format!("{}->{}: {}", decision, operation, sql),
            },
        }
    }
}

fn truncate_sql(sql: &str, max: usize) -> String {
    match sql.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &sql[..cut]),
        None => sql.to_string(),
    }
}

/// Receiver of routing events
pub trait EventSink: Send + Sync {
    /// Record an event at the given severity
    fn emit(&self, severity: Severity, event: &RoutingEvent);
}

/// A sink that drops everything
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _severity: Severity, _event: &RoutingEvent) {}
}

/// A sink that forwards events to `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Create a tracing sink
    pub fn new() -> Self {
        Self
    }
}

macro_rules! at_severity {
    ($severity:expr, $($arg:tt)+) => {
        match $severity {
            Severity::Trace => tracing::trace!($($arg)+),
            Severity::Debug => tracing::debug!($($arg)+),
            Severity::Info => tracing::info!($($arg)+),
            Severity::Warn => tracing::warn!($($arg)+),
            Severity::Error => tracing::error!($($arg)+),
        }
    };
}

impl EventSink for TracingSink {
    fn emit(&self, severity: Severity, event: &RoutingEvent) {
        match event {
            RoutingEvent::ReaderSelected { target } => {
                at_severity!(
                    severity,
                    reader = %target,
                    reader.index = ?target.index(),
                    "splitdb reader selected"
                );
            }
            RoutingEvent::Routed {
                decision,
                operation,
                sql,
                reason,
            } => {
                let reason = reason.as_ref().map(ToString::to_string).unwrap_or_default();
                at_severity!(
                    severity,
                    decision = %decision,
                    operation = %operation,
                    db.statement = %sql,
                    reason = %reason,
                    "splitdb route"
                );
            }
        }
    }
}

/// A sink that keeps events in memory for inspection
#[derive(Debug, Default)]
pub struct TestSink {
    events: std::sync::Mutex<Vec<(Severity, RoutingEvent)>>,
}

impl TestSink {
    /// Create an empty test sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured events
    pub fn events(&self) -> Vec<(Severity, RoutingEvent)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Decisions of all captured routed-call events, in order
    pub fn decisions(&self) -> Vec<RoutingDecision> {
        self.events()
            .iter()
            .filter_map(|(_, event)| event.decision())
            .collect()
    }

    /// Clear all captured events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// Number of captured events
    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if no events have been captured
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for TestSink {
    fn emit(&self, severity: Severity, event: &RoutingEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((severity, event.clone()));
        }
    }
}
