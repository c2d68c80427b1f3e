//! Split connection configuration
//!
//! The configuration bundle is a JSON object: the recognised split options
//! below, plus whatever connection parameters the driver needs. The
//! connection parameters are shared by the writer and by every reader, each
//! reader entry overriding individual keys.
//!
//! | key | meaning | default |
//! |-----|---------|---------|
//! | `slaves` | list of per-reader overrides | `[]` (reader mirrors writer) |
//! | `excluded_areas` | URL path substrings forced to the writer | `["/checkout", "/customer"]` |
//! | `enable_logging` | emit routing events | `false` |
//! | `log_level` | severity of routing events | `"debug"` |
//! | `writer_identifiers` | extra SQL markers that force the writer | `[]` |
//! | `max_sql_length` | SQL chars kept in events | `1000` |
//!
//! # Example
//!
//! ```
//! use diesel_splitdb::config::SplitConfig;
//!
//! let config = SplitConfig::from_json_str(r#"{
//!     "host": "primary",
//!     "username": "app",
//!     "slaves": [{ "host": "r1" }, { "host": "r2" }]
//! }"#).unwrap();
//!
//! assert_eq!(config.reader_pool().len(), 2);
//! assert_eq!(config.writer_params()["host"], "primary");
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    classifier::SqlClassifier,
    context::{ContextGuard, DEFAULT_EXCLUDED_AREAS},
    event::{Severity, DEFAULT_MAX_SQL_LENGTH},
    router::Router,
    selector::{ReaderPool, ReaderTarget},
};

/// Driver connection parameters as a JSON object
pub type ConnectionParams = Map<String, Value>;

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document is not valid JSON or has the wrong shape
    #[error("invalid split configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The document is valid JSON but not an object
    #[error("split configuration must be a JSON object")]
    NotAnObject,

    /// A log level name was not recognised
    #[error("unknown log level '{0}'")]
    UnknownSeverity(String),

    /// Merged connection parameters did not fit the driver's config type
    #[error("invalid connection parameters: {0}")]
    InvalidConnection(#[source] serde_json::Error),
}

impl From<ConfigError> for diesel::ConnectionError {
    fn from(error: ConfigError) -> Self {
        diesel::ConnectionError::BadConnection(error.to_string())
    }
}

fn default_excluded_areas() -> Vec<String> {
    DEFAULT_EXCLUDED_AREAS.iter().map(|s| s.to_string()).collect()
}

fn default_max_sql_length() -> usize {
    DEFAULT_MAX_SQL_LENGTH
}

/// Configuration for a split connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Reader overrides
    #[serde(default)]
    slaves: ReaderPool,
    /// URL path substrings that force the writer
    #[serde(default = "default_excluded_areas")]
    excluded_areas: Vec<String>,
    /// Whether routing events are emitted
    #[serde(default, alias = "enable_splitdb_logging")]
    enable_logging: bool,
    /// Severity routing events are emitted at
    #[serde(default)]
    log_level: Severity,
    /// Extra classifier markers
    #[serde(default)]
    writer_identifiers: Vec<String>,
    /// Maximum SQL length carried in events
    #[serde(default = "default_max_sql_length")]
    max_sql_length: usize,
    /// Shared connection parameters
    #[serde(flatten)]
    connection: ConnectionParams,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self::new(ConnectionParams::new())
    }
}

impl SplitConfig {
    /// Create a configuration around the writer's connection parameters
    pub fn new(connection: ConnectionParams) -> Self {
        Self {
            slaves: ReaderPool::default(),
            excluded_areas: default_excluded_areas(),
            enable_logging: false,
            log_level: Severity::default(),
            writer_identifiers: Vec::new(),
            max_sql_length: DEFAULT_MAX_SQL_LENGTH,
            connection,
        }
    }

    /// Parse a configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Build a configuration from a JSON value
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        if let Some(level) = value.get("log_level").and_then(Value::as_str) {
            level.parse::<Severity>()?;
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Add a reader override
    pub fn with_reader(mut self, overrides: ConnectionParams) -> Self {
        self.slaves.push(overrides);
        self
    }

    /// Replace the excluded areas
    pub fn with_excluded_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_areas = areas.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable routing events
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    /// Set the severity routing events are emitted at
    pub fn log_level(mut self, level: Severity) -> Self {
        self.log_level = level;
        self
    }

    /// Add a classifier marker
    pub fn with_writer_identifier(mut self, token: impl Into<String>) -> Self {
        self.writer_identifiers.push(token.into());
        self
    }

    /// Set the maximum SQL length carried in events
    pub fn max_sql_length(mut self, max: usize) -> Self {
        self.max_sql_length = max;
        self
    }

    /// The reader overrides
    pub fn reader_pool(&self) -> &ReaderPool {
        &self.slaves
    }

    /// The configured excluded areas
    pub fn excluded_areas(&self) -> &[String] {
        &self.excluded_areas
    }

    /// Whether routing events are emitted
    pub fn logging_enabled(&self) -> bool {
        self.enable_logging
    }

    /// Severity of routing events
    pub fn severity(&self) -> Severity {
        self.log_level
    }

    /// Maximum SQL length carried in events
    pub fn sql_length_limit(&self) -> usize {
        self.max_sql_length
    }

    /// The writer's connection parameters
    pub fn writer_params(&self) -> &ConnectionParams {
        &self.connection
    }

    /// Connection parameters for the given reader target
    ///
    /// The pool entry's keys override the writer's. A target outside the
    /// pool falls back to the writer's parameters.
    pub fn reader_params(&self, target: ReaderTarget) -> ConnectionParams {
        let mut params = self.connection.clone();
        if let Some(overrides) = target.index().and_then(|i| self.slaves.get(i)) {
            for (key, value) in overrides {
                params.insert(key.clone(), value.clone());
            }
        }
        params
    }

    /// Build the router described by this configuration
    pub fn router(&self) -> Router {
        let classifier = self
            .writer_identifiers
            .iter()
            .fold(SqlClassifier::new(), |c, token| c.with_identifier(token));
        Router::new(ContextGuard::new(self.excluded_areas.iter().cloned()), classifier)
    }
}

/// Decode merged connection parameters into a driver's config type
pub fn decode_params<T: DeserializeOwned>(params: ConnectionParams) -> Result<T, ConfigError> {
    serde_json::from_value(Value::Object(params)).map_err(ConfigError::InvalidConnection)
}
