//! Connection capability
//!
//! [`SqlConnection`] is the surface a driver exposes to the split layer:
//! single-statement execution and multi-statement execution, both with bound
//! parameters. [`ConnectionFactory`] builds connections from merged
//! connection parameters so the session can create its writer and reader.
//!
//! Drivers report failures as [`diesel::result::Error`]; the split layer
//! hands them back to the caller untouched.

use async_trait::async_trait;
use diesel::{ConnectionResult, QueryResult};

use crate::config::ConnectionParams;

/// A value bound to a statement placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    /// Null value
    Null,
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// Text value
    Text(String),
    /// Binary data
    Binary(Vec<u8>),
}

impl From<i64> for BoundValue {
    fn from(v: i64) -> Self {
        BoundValue::Integer(v)
    }
}

impl From<i32> for BoundValue {
    fn from(v: i32) -> Self {
        BoundValue::Integer(v as i64)
    }
}

impl From<bool> for BoundValue {
    fn from(v: bool) -> Self {
        BoundValue::Integer(if v { 1 } else { 0 })
    }
}

impl From<f64> for BoundValue {
    fn from(v: f64) -> Self {
        BoundValue::Float(v)
    }
}

impl From<String> for BoundValue {
    fn from(v: String) -> Self {
        BoundValue::Text(v)
    }
}

impl From<&str> for BoundValue {
    fn from(v: &str) -> Self {
        BoundValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for BoundValue {
    fn from(v: Vec<u8>) -> Self {
        BoundValue::Binary(v)
    }
}

impl<T: Into<BoundValue>> From<Option<T>> for BoundValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => BoundValue::Null,
        }
    }
}

impl BoundValue {
    /// Convert to a serde_json Value
    ///
    /// Binary data is base64 encoded.
    #[cfg(feature = "http")]
    pub fn to_json_value(&self) -> serde_json::Value {
        use base64::Engine;

        match self {
            BoundValue::Null => serde_json::Value::Null,
            BoundValue::Integer(i) => serde_json::Value::Number((*i).into()),
            BoundValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            BoundValue::Text(s) => serde_json::Value::String(s.clone()),
            BoundValue::Binary(b) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(b),
            ),
        }
    }
}

/// Parameters bound to a statement
///
/// # Example
///
/// ```
/// use diesel_splitdb::connection::{Bindings, BoundValue};
///
/// let positional = Bindings::from(vec![BoundValue::from(42i64)]);
/// assert_eq!(positional.len(), 1);
///
/// let named = Bindings::named([("sku", "24-MB01")]);
/// assert_eq!(named.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Bindings {
    /// No parameters
    #[default]
    None,
    /// `?` placeholders, in order
    Positional(Vec<BoundValue>),
    /// `:name` placeholders
    Named(Vec<(String, BoundValue)>),
}

impl Bindings {
    /// Build named bindings from `(name, value)` pairs
    ///
    /// A leading `:` on the name is stripped.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<BoundValue>,
    {
        Bindings::Named(
            pairs
                .into_iter()
                .map(|(name, value)| {
                    let name: String = name.into();
                    let name = name.strip_prefix(':').map(str::to_string).unwrap_or(name);
                    (name, value.into())
                })
                .collect(),
        )
    }

    /// Number of bound values
    pub fn len(&self) -> usize {
        match self {
            Bindings::None => 0,
            Bindings::Positional(values) => values.len(),
            Bindings::Named(pairs) => pairs.len(),
        }
    }

    /// Whether nothing is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<BoundValue>> for Bindings {
    fn from(values: Vec<BoundValue>) -> Self {
        Bindings::Positional(values)
    }
}

/// A database connection the split layer can route to
#[async_trait]
pub trait SqlConnection: Send {
    /// Whatever the driver returns for an executed statement
    type Output: Send;

    /// Execute a single statement with bound parameters
    async fn execute(&mut self, sql: &str, bindings: &Bindings) -> QueryResult<Self::Output>;

    /// Execute a string that may contain several statements
    ///
    /// Multiple statements in one call bypass the driver's single-statement
    /// guard. Only use this with statement text that cannot be influenced by
    /// user input.
    async fn execute_multi(&mut self, sql: &str, bindings: &Bindings)
        -> QueryResult<Self::Output>;
}

/// Builds connections from connection parameters
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// The connection type produced
    type Connection: SqlConnection;

    /// Open a connection with the given (already merged) parameters
    async fn connect(&self, params: ConnectionParams) -> ConnectionResult<Self::Connection>;
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_bound_value_from_integer() {
        let v: BoundValue = 42i64.into();
        assert_eq!(v, BoundValue::Integer(42));
        let v: BoundValue = 42i32.into();
        assert_eq!(v, BoundValue::Integer(42));
    }

    #[test]
    fn test_bound_value_from_bool() {
        assert_eq!(BoundValue::from(true), BoundValue::Integer(1));
        assert_eq!(BoundValue::from(false), BoundValue::Integer(0));
    }

    #[test]
    fn test_bound_value_from_option() {
        let v: BoundValue = Some("x").into();
        assert_eq!(v, BoundValue::Text("x".to_string()));

        let v: BoundValue = None::<i64>.into();
        assert_eq!(v, BoundValue::Null);
    }

    #[test]
    fn test_bindings_named_strips_colon() {
        let bindings = Bindings::named([(":sku", "24-MB01"), ("store", "default")]);
        assert_eq!(
            bindings,
            Bindings::Named(vec![
                ("sku".to_string(), BoundValue::Text("24-MB01".to_string())),
                ("store".to_string(), BoundValue::Text("default".to_string())),
            ])
        );
    }

    #[test]
    fn test_bindings_len() {
        assert!(Bindings::default().is_empty());
        assert_eq!(Bindings::from(vec![1i64.into(), 2i64.into()]).len(), 2);
        assert!(Bindings::Positional(vec![]).is_empty());
    }

    #[tokio::test]
    async fn test_recording_connection() {
        let mut conn = RecordingConnection::new(3, "r1");
        let out = conn
            .execute("SELECT ?", &Bindings::from(vec![BoundValue::Integer(1)]))
            .await
            .unwrap();
        assert_eq!(out.connection_id, 3);
        assert_eq!(out.host, "r1");
        assert!(!out.multi);
        assert_eq!(conn.statements(), vec!["SELECT ?"]);
    }

    #[tokio::test]
    async fn test_recording_factory() {
        let factory = RecordingFactory::new();
        let mut params = ConnectionParams::new();
        params.insert("host".to_string(), "db".into());
        let conn = factory.connect(params.clone()).await.unwrap();
        assert_eq!(conn.id, 0);
        assert_eq!(factory.connections_opened(), 1);

        params.insert("unreachable".to_string(), true.into());
        assert!(factory.connect(params).await.is_err());
        assert_eq!(factory.connections_opened(), 1);
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_bound_value_to_json() {
        assert_eq!(BoundValue::Null.to_json_value(), serde_json::Value::Null);
        assert_eq!(BoundValue::Integer(42).to_json_value(), serde_json::json!(42));
        assert_eq!(
            BoundValue::Text("hello".to_string()).to_json_value(),
            serde_json::json!("hello")
        );
        assert_eq!(
            BoundValue::Binary(b"hello".to_vec()).to_json_value(),
            serde_json::json!("aGVsbG8=")
        );
        assert_eq!(BoundValue::Float(f64::NAN).to_json_value(), serde_json::Value::Null);
    }
}
