//! # Diesel Split DB
//!
//! Read/write splitting for Diesel-style async connections. A
//! [`SplitConnection`] holds a writer (primary) and one reader (replica)
//! chosen once per session, and routes each statement:
//!
//! - batch (non-request) execution always uses the writer;
//! - requests other than `GET`, and request paths inside an excluded area
//!   (`/checkout`, `/customer` by default), use the writer;
//! - statements containing a writer marker (`INSERT `, `UPDATE `, `DELETE `,
//!   `DROP `, `CREATE `, `search_tmp`, any case) use the writer;
//! - everything else goes to the session's reader.
//!
//! Statements, bindings, results and errors pass through unchanged.
//!
//! ## Features
//!
//! - `http` - Enable the Cloudflare D1 REST API driver
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! diesel-splitdb = { version = "0.1", features = ["http"] }
//! ```
//!
//! ```ignore
//! use diesel_splitdb::{D1HttpConnector, RoutingContext, SplitConfig, SplitConnection};
//!
//! let config = SplitConfig::from_json_str(&std::fs::read_to_string("splitdb.json")?)?;
//! let mut conn = SplitConnection::establish(config, &D1HttpConnector::new()).await?;
//! conn.set_context(RoutingContext::request("GET", "/catalog/view"));
//! ```

pub mod classifier;
pub mod config;
pub mod connection;
pub mod context;
pub mod event;
pub mod router;
pub mod selector;
pub mod session;

// HTTP-specific modules
#[cfg(feature = "http")]
mod http_connection;

// Re-exports
pub use classifier::{SqlClassifier, StatementClass};
pub use config::{ConfigError, ConnectionParams, SplitConfig};
pub use connection::{Bindings, BoundValue, ConnectionFactory, SqlConnection};
pub use context::{ContextGuard, ExecutionMode, RoutingContext, WriterReason};
pub use event::{EventSink, NoopSink, Operation, RoutingEvent, Severity, TestSink, TracingSink};
pub use router::{Router, RoutingDecision};
pub use selector::{ReaderPool, ReaderSelector, ReaderTarget};
pub use session::{SplitConnection, SplitConnectionBuilder};

#[cfg(feature = "http")]
pub use http_connection::{
    D1Error, D1HttpConfig, D1HttpConnection, D1HttpConnector, D1QueryMeta, D1QueryOutput,
    D1QueryResult,
};
