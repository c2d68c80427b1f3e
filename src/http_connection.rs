//! HTTP-based D1 connection for the REST API
//!
//! [`D1HttpConnection`] talks to a Cloudflare D1 database through the
//! `/query` endpoint and implements [`SqlConnection`], so it can serve as
//! both writer and reader of a split connection. [`D1HttpConnector`] builds
//! connections from merged connection parameters; a reader override only
//! needs the keys that differ from the writer, typically `database_id`.
//!
//! ```json
//! {
//!     "account_id": "acc",
//!     "api_token": "token",
//!     "database_id": "primary-db",
//!     "slaves": [{ "database_id": "replica-db" }]
//! }
//! ```

use async_trait::async_trait;
use diesel::{
    result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError},
    ConnectionResult, QueryResult,
};
use diesel_async::SimpleAsyncConnection;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    config::{decode_params, ConnectionParams},
    connection::{Bindings, ConnectionFactory, SqlConnection},
};

const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Configuration for D1 HTTP API connection
///
/// # Example
///
/// ```
/// use diesel_splitdb::D1HttpConfig;
///
/// let config = D1HttpConfig::new(
///     "your-account-id",
///     "your-database-id",
///     "your-api-token",
/// );
/// ```
#[derive(Clone, PartialEq, Deserialize)]
pub struct D1HttpConfig {
    /// Cloudflare account ID
    pub account_id: String,
    /// D1 database ID
    pub database_id: String,
    /// API token with D1 permissions
    pub api_token: String,
    /// Base URL for the API (defaults to Cloudflare API)
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl std::fmt::Debug for D1HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("D1HttpConfig")
            .field("account_id", &self.account_id)
            .field("database_id", &self.database_id)
            .field("api_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl D1HttpConfig {
    /// Create a new configuration with the required parameters
    pub fn new(
        account_id: impl Into<String>,
        database_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            database_id: database_id.into(),
            api_token: api_token.into(),
            base_url: default_base_url(),
        }
    }

    /// Set a custom base URL (useful for testing)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the query URL for this database
    pub fn query_url(&self) -> String {
        format!(
            "{}/accounts/{}/d1/database/{}/query",
            self.base_url.trim_end_matches('/'),
            self.account_id,
            self.database_id
        )
    }

    /// Parse a `d1://account_id:api_token@database_id` URL
    ///
    /// The token may be percent-encoded if it contains `@` or `:`.
    pub fn from_url(database_url: &str) -> ConnectionResult<Self> {
        let bad_format = || {
            diesel::ConnectionError::BadConnection(
                "Invalid D1 URL format. Expected: d1://account_id:api_token@database_id"
                    .to_string(),
            )
        };

        let url_body = database_url.strip_prefix("d1://").ok_or_else(|| {
            diesel::ConnectionError::BadConnection("D1 URL must start with 'd1://'".to_string())
        })?;
        let (auth_part, database_id) = url_body.rsplit_once('@').ok_or_else(bad_format)?;
        let (account_id, api_token) = auth_part.split_once(':').ok_or_else(bad_format)?;
        let api_token = percent_decode(api_token);

        for (name, value) in [
            ("account_id", account_id),
            ("database_id", database_id),
            ("api_token", api_token.as_str()),
        ] {
            if value.is_empty() {
                return Err(diesel::ConnectionError::BadConnection(format!(
                    "{} cannot be empty in D1 URL",
                    name
                )));
            }
        }

        Ok(Self::new(account_id, database_id, api_token))
    }
}

/// D1 HTTP API request body
#[derive(Serialize, Debug)]
struct D1QueryRequest<'a> {
    sql: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    params: Vec<serde_json::Value>,
}

/// D1 HTTP API response
#[derive(Deserialize, Debug)]
struct D1ApiResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<D1ApiError>,
    result: Option<Vec<D1QueryResult>>,
}

#[derive(Deserialize, Debug)]
struct D1ApiError {
    #[serde(default)]
    code: i32,
    message: String,
}

/// Result of one statement
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct D1QueryResult {
    /// Whether the statement succeeded
    #[serde(default)]
    pub success: bool,
    /// Returned rows as JSON objects
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    /// Execution metadata
    pub meta: Option<D1QueryMeta>,
}

/// D1 query metadata
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct D1QueryMeta {
    /// Rows changed
    pub changes: Option<i64>,
    /// Duration in milliseconds
    pub duration: Option<f64>,
    /// Rows read
    pub rows_read: Option<i64>,
    /// Rows written
    pub rows_written: Option<i64>,
    /// Rowid of the last inserted row
    pub last_row_id: Option<i64>,
}

/// Everything the API returned for one request, one entry per statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct D1QueryOutput {
    /// Per-statement results, in statement order
    pub results: Vec<D1QueryResult>,
}

impl D1QueryOutput {
    /// Rows of the first statement
    pub fn rows(&self) -> &[serde_json::Value] {
        self.results
            .first()
            .map(|r| r.results.as_slice())
            .unwrap_or_default()
    }

    /// Total rows changed across all statements
    pub fn changes(&self) -> usize {
        self.results
            .iter()
            .filter_map(|r| r.meta.as_ref().and_then(|m| m.changes))
            .sum::<i64>()
            .max(0) as usize
    }

    /// Rowid of the last insert, if the API reported one
    pub fn last_row_id(&self) -> Option<i64> {
        self.results
            .iter()
            .rev()
            .find_map(|r| r.meta.as_ref().and_then(|m| m.last_row_id))
    }
}

/// Error information from D1
///
/// Wraps error messages from D1 for use with Diesel's error system.
#[derive(Debug, Clone)]
pub struct D1Error {
    message: String,
}

impl D1Error {
    /// Create a new D1 error with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error kind implied by SQLite's constraint messages
    pub fn kind(&self) -> DatabaseErrorKind {
        let message = self.message.to_ascii_uppercase();
        if message.contains("UNIQUE CONSTRAINT FAILED") {
            DatabaseErrorKind::UniqueViolation
        } else if message.contains("FOREIGN KEY CONSTRAINT FAILED") {
            DatabaseErrorKind::ForeignKeyViolation
        } else if message.contains("NOT NULL CONSTRAINT FAILED") {
            DatabaseErrorKind::NotNullViolation
        } else if message.contains("CHECK CONSTRAINT FAILED") {
            DatabaseErrorKind::CheckViolation
        } else {
            DatabaseErrorKind::Unknown
        }
    }

    /// Convert into a Diesel database error
    pub fn into_diesel(self) -> DieselError {
        DieselError::DatabaseError(self.kind(), Box::new(self))
    }
}

impl std::fmt::Display for D1Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for D1Error {}

impl DatabaseErrorInformation for D1Error {
    fn message(&self) -> &str {
        &self.message
    }

    fn details(&self) -> Option<&str> {
        None
    }

    fn hint(&self) -> Option<&str> {
        None
    }

    fn table_name(&self) -> Option<&str> {
        None
    }

    fn column_name(&self) -> Option<&str> {
        None
    }

    fn constraint_name(&self) -> Option<&str> {
        None
    }

    fn statement_position(&self) -> Option<i32> {
        None
    }
}

fn d1_error(message: impl Into<String>) -> DieselError {
    D1Error::new(message).into_diesel()
}

/// D1 connection using the HTTP REST API
///
/// # Example
///
/// ```ignore
/// use diesel_splitdb::{Bindings, D1HttpConnection, SqlConnection};
///
/// let mut conn = D1HttpConnection::establish("d1://account:token@database")?;
/// let output = conn.execute("SELECT 1 AS one", &Bindings::None).await?;
/// println!("{:?}", output.rows());
/// ```
#[derive(Debug, Clone)]
pub struct D1HttpConnection {
    client: Client,
    config: D1HttpConfig,
}

impl D1HttpConnection {
    /// Create a new HTTP connection with the given configuration
    pub fn new(config: D1HttpConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Create a new HTTP connection with a custom reqwest client
    pub fn with_client(config: D1HttpConfig, client: Client) -> Self {
        Self { client, config }
    }

    /// Connect from a `d1://account_id:api_token@database_id` URL
    pub fn establish(database_url: &str) -> ConnectionResult<Self> {
        D1HttpConfig::from_url(database_url).map(Self::new)
    }

    /// The connection's configuration
    pub fn config(&self) -> &D1HttpConfig {
        &self.config
    }

    /// Send statement text with positional parameters to the `/query` endpoint
    pub async fn query(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> QueryResult<D1QueryOutput> {
        let request = D1QueryRequest { sql, params };

        let response = self
            .client
            .post(self.config.query_url())
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| d1_error(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| d1_error(format!("Failed to read response: {}", e)))?;

        parse_response(status, &body)
    }
}

fn parse_response(status: reqwest::StatusCode, body: &str) -> QueryResult<D1QueryOutput> {
    // API errors come back with a non-2xx status and a JSON envelope
    let parsed: Result<D1ApiResponse, _> = serde_json::from_str(body);

    let api_response = match parsed {
        Ok(response) => response,
        Err(_) if !status.is_success() => {
            return Err(d1_error(format!("HTTP error {}: {}", status, body)))
        }
        Err(e) => return Err(d1_error(format!("Failed to parse response: {}", e))),
    };

    if !api_response.success || !status.is_success() {
        let message = api_response
            .errors
            .first()
            .map(|e| format!("{} (code {})", e.message, e.code))
            .unwrap_or_else(|| format!("HTTP error {}", status));
        return Err(d1_error(message));
    }

    let results = api_response
        .result
        .ok_or_else(|| d1_error("No result returned"))?;
    Ok(D1QueryOutput { results })
}

/// Positional JSON parameters for the REST API
fn params_from_bindings(bindings: &Bindings) -> QueryResult<Vec<serde_json::Value>> {
    match bindings {
        Bindings::None => Ok(Vec::new()),
        Bindings::Positional(values) => Ok(values.iter().map(|v| v.to_json_value()).collect()),
        Bindings::Named(_) => Err(d1_error(
            "named parameters are not supported by the D1 HTTP API; use ? placeholders",
        )),
    }
}

#[async_trait]
impl SqlConnection for D1HttpConnection {
    type Output = D1QueryOutput;

    async fn execute(&mut self, sql: &str, bindings: &Bindings) -> QueryResult<D1QueryOutput> {
        let params = params_from_bindings(bindings)?;
        self.query(sql, params).await
    }

    async fn execute_multi(
        &mut self,
        sql: &str,
        bindings: &Bindings,
    ) -> QueryResult<D1QueryOutput> {
        // the endpoint accepts several `;`-separated statements in one body
        let params = params_from_bindings(bindings)?;
        self.query(sql, params).await
    }
}

#[async_trait]
impl SimpleAsyncConnection for D1HttpConnection {
    async fn batch_execute(&mut self, query: &str) -> QueryResult<()> {
        self.query(query, Vec::new()).await?;
        Ok(())
    }
}

/// Builds [`D1HttpConnection`]s from connection parameters
///
/// All connections share one reqwest client and its connection pool.
#[derive(Debug, Clone, Default)]
pub struct D1HttpConnector {
    client: Client,
}

impl D1HttpConnector {
    /// Create a connector with a default client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector with a custom reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConnectionFactory for D1HttpConnector {
    type Connection = D1HttpConnection;

    async fn connect(&self, params: ConnectionParams) -> ConnectionResult<D1HttpConnection> {
        let config: D1HttpConfig = decode_params(params)?;
        tracing::debug!(
            account_id = %config.account_id,
            database_id = %config.database_id,
            "opening D1 HTTP connection"
        );
        Ok(D1HttpConnection::with_client(config, self.client.clone()))
    }
}

/// Simple percent-decode for URL parsing
///
/// Handles ASCII percent-encoding, which is what API tokens need.
fn percent_decode(input: &str) -> String {
    let mut bytes = Vec::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            let valid = hex.len() == 2 && hex.bytes().all(|b| b.is_ascii_hexdigit());
            match u8::from_str_radix(&hex, 16) {
                Ok(byte) if valid => bytes.push(byte),
                _ => {
                    bytes.push(b'%');
                    bytes.extend(hex.as_bytes());
                }
            }
        } else {
            let mut buf = [0u8; 4];
            bytes.extend(c.encode_utf8(&mut buf).as_bytes());
        }
    }

    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SplitConfig,
        connection::BoundValue,
        context::RoutingContext,
        session::SplitConnection,
    };
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn test_d1_http_config_new() {
        let config = D1HttpConfig::new("account", "database", "token");
        assert_eq!(config.account_id, "account");
        assert_eq!(config.database_id, "database");
        assert_eq!(config.api_token, "token");
        assert!(config.base_url.contains("cloudflare.com"));
    }

    #[test]
    fn test_d1_http_config_query_url() {
        let config = D1HttpConfig::new("acc123", "db456", "token")
            .with_base_url("http://localhost:8080/");
        assert_eq!(
            config.query_url(),
            "http://localhost:8080/accounts/acc123/d1/database/db456/query"
        );
    }

    #[test]
    fn test_d1_http_config_debug_hides_token() {
        let config = D1HttpConfig::new("account", "database", "s3cr3t");
        assert!(!format!("{:?}", config).contains("s3cr3t"));
    }

    #[test]
    fn test_establish_valid_url() {
        let conn = D1HttpConnection::establish("d1://account:token@database").unwrap();
        assert_eq!(conn.config().account_id, "account");
        assert_eq!(conn.config().database_id, "database");
    }

    #[test]
    fn test_establish_invalid_url() {
        assert!(D1HttpConnection::establish("invalid://url").is_err());
        assert!(D1HttpConnection::establish("d1://missing-at-sign").is_err());
        assert!(D1HttpConnection::establish("d1://no-colon@database").is_err());
    }

    #[test]
    fn test_establish_url_with_encoded_token() {
        let conn =
            D1HttpConnection::establish("d1://account:token%40with%3Aspecial@database").unwrap();
        assert_eq!(conn.config().api_token, "token@with:special");
    }

    #[test]
    fn test_establish_url_with_empty_fields() {
        assert!(D1HttpConnection::establish("d1://:token@database").is_err());
        assert!(D1HttpConnection::establish("d1://account:token@").is_err());
        assert!(D1HttpConnection::establish("d1://account:@database").is_err());
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("hello%20world"), "hello world");
        assert_eq!(percent_decode("a%3Ab"), "a:b");
        assert_eq!(percent_decode("test%2"), "test%2");
        assert_eq!(percent_decode("test%GG"), "test%GG");
        assert_eq!(percent_decode("%"), "%");
        assert_eq!(percent_decode("%C3%A9"), "é");
    }

    #[test]
    fn test_percent_decode_rejects_signed_hex() {
        assert_eq!(percent_decode("tok%+1en"), "tok%+1en");
        assert_eq!(percent_decode("tok%-1en"), "tok%-1en");
        assert_eq!(percent_decode("%+f%2b"), "%+f+");
    }

    #[test]
    fn test_params_from_bindings() {
        assert!(params_from_bindings(&Bindings::None).unwrap().is_empty());

        let bindings = Bindings::from(vec![
            BoundValue::Integer(7),
            BoundValue::from("sku"),
            BoundValue::Null,
        ]);
        assert_eq!(
            params_from_bindings(&bindings).unwrap(),
            vec![json!(7), json!("sku"), serde_json::Value::Null]
        );
    }

    #[test]
    fn test_named_bindings_rejected() {
        let result = params_from_bindings(&Bindings::named([("sku", "x")]));
        assert!(matches!(
            result,
            Err(DieselError::DatabaseError(DatabaseErrorKind::Unknown, _))
        ));
    }

    #[test]
    fn test_error_kind_mapping() {
        let kind = |m: &str| D1Error::new(m).kind();
        assert!(matches!(
            kind("UNIQUE constraint failed: users.email: SQLITE_CONSTRAINT"),
            DatabaseErrorKind::UniqueViolation
        ));
        assert!(matches!(
            kind("FOREIGN KEY constraint failed"),
            DatabaseErrorKind::ForeignKeyViolation
        ));
        assert!(matches!(
            kind("NOT NULL constraint failed: users.name"),
            DatabaseErrorKind::NotNullViolation
        ));
        assert!(matches!(
            kind("check constraint failed: qty"),
            DatabaseErrorKind::CheckViolation
        ));
        assert!(matches!(kind("no such table: users"), DatabaseErrorKind::Unknown));
    }

    #[test]
    fn test_into_diesel_carries_kind_and_message() {
        match D1Error::new("UNIQUE constraint failed: users.email").into_diesel() {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                assert_eq!(info.message(), "UNIQUE constraint failed: users.email");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_parse_success_response() {
        let body = json!({
            "success": true,
            "errors": [],
            "result": [
                {
                    "success": true,
                    "results": [{"id": 1, "name": "a"}],
                    "meta": {"changes": 0, "duration": 0.2, "rows_read": 1, "rows_written": 0}
                },
                {
                    "success": true,
                    "results": [],
                    "meta": {"changes": 2, "last_row_id": 9}
                }
            ]
        })
        .to_string();

        let output = parse_response(StatusCode::OK, &body).unwrap();
        assert_eq!(output.results.len(), 2);
        assert_eq!(output.rows(), [json!({"id": 1, "name": "a"})]);
        assert_eq!(output.changes(), 2);
        assert_eq!(output.last_row_id(), Some(9));
    }

    #[test]
    fn test_parse_api_error_response() {
        let body = json!({
            "success": false,
            "errors": [{"code": 7500, "message": "UNIQUE constraint failed: users.email"}],
            "result": null
        })
        .to_string();

        match parse_response(StatusCode::BAD_REQUEST, &body) {
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) => {
                assert!(info.message().contains("code 7500"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_parse_non_json_error_response() {
        let result = parse_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        match result {
            Err(DieselError::DatabaseError(DatabaseErrorKind::Unknown, info)) => {
                assert!(info.message().starts_with("HTTP error 502"));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(parse_response(StatusCode::OK, "not json").is_err());
        assert!(parse_response(StatusCode::OK, r#"{"success": true}"#).is_err());
    }

    #[tokio::test]
    async fn test_connector_builds_from_params() {
        let params = match json!({
            "account_id": "acc",
            "database_id": "db",
            "api_token": "token"
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let conn = D1HttpConnector::new().connect(params).await.unwrap();
        assert_eq!(conn.config().database_id, "db");
        assert_eq!(conn.config().base_url, DEFAULT_BASE_URL);
    }

    #[tokio::test]
    async fn test_connector_rejects_incomplete_params() {
        let params = match json!({ "account_id": "acc" }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let result = D1HttpConnector::new().connect(params).await;
        assert!(matches!(result, Err(diesel::ConnectionError::BadConnection(_))));
    }

    #[tokio::test]
    async fn test_split_over_d1_replicas() {
        let config = SplitConfig::from_value(json!({
            "account_id": "acc",
            "api_token": "token",
            "database_id": "primary-db",
            "slaves": [{ "database_id": "replica-db" }]
        }))
        .unwrap();
        let conn = SplitConnection::establish(config, &D1HttpConnector::new())
            .await
            .unwrap()
            .with_context(RoutingContext::request("GET", "/"));

        assert_eq!(conn.writer().config().database_id, "primary-db");
        assert_eq!(conn.reader().config().database_id, "replica-db");
        assert_eq!(conn.reader().config().api_token, "token");
    }
}
