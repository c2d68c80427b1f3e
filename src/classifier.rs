//! Statement classification
//!
//! Decides from the SQL text alone whether a statement may be served by a
//! replica. The check is a case-insensitive substring scan against a list of
//! writer identifiers, not a parser: a token inside a string literal or an
//! identifier is enough to keep the statement on the writer.
//!
//! # Example
//!
//! ```
//! use diesel_splitdb::classifier::{classify, StatementClass};
//!
//! assert_eq!(classify("SELECT * FROM sales_order"), StatementClass::ReaderEligible);
//! assert_eq!(classify("update sales_order SET state = 'new'"), StatementClass::WriterRequired);
//! ```

/// Writer identifiers checked by every classifier, in scan order.
///
/// `search_tmp` marks the scratch tables the catalog search writes to and
/// then reads back within the same request.
pub const WRITER_SQL_IDENTIFIERS: [&str; 6] = [
    "INSERT ", "UPDATE ", "DELETE ", "DROP ", "CREATE ", "search_tmp",
];

/// Classification of a single SQL statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementClass {
    /// The statement may write, or reads data that must be fresh
    WriterRequired,
    /// The statement can be served by a replica
    ReaderEligible,
}

impl StatementClass {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementClass::WriterRequired => "writer_required",
            StatementClass::ReaderEligible => "reader_eligible",
        }
    }
}

impl std::fmt::Display for StatementClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Substring based SQL classifier
///
/// Always contains [`WRITER_SQL_IDENTIFIERS`]; applications can append their
/// own markers with [`SqlClassifier::with_identifier`] but never remove the
/// defaults.
#[derive(Debug, Clone)]
pub struct SqlClassifier {
    /// Identifiers in scan order, stored lowercased for matching
    identifiers: Vec<Identifier>,
}

#[derive(Debug, Clone)]
struct Identifier {
    original: String,
    lowered: String,
}

impl Identifier {
    fn new(token: &str) -> Self {
        Self {
            original: token.to_string(),
            lowered: token.to_ascii_lowercase(),
        }
    }
}

impl Default for SqlClassifier {
    fn default() -> Self {
        Self {
            identifiers: WRITER_SQL_IDENTIFIERS
                .iter()
                .map(|token| Identifier::new(token))
                .collect(),
        }
    }
}

impl SqlClassifier {
    /// Create a classifier with the default writer identifiers
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an application-specific writer identifier
    ///
    /// Empty tokens are ignored, since they would match every statement.
    pub fn with_identifier(mut self, token: impl AsRef<str>) -> Self {
        let token = token.as_ref();
        if !token.is_empty() && !self.identifiers.iter().any(|i| i.original == token) {
            self.identifiers.push(Identifier::new(token));
        }
        self
    }

    /// The identifiers this classifier scans for, in order
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(|i| i.original.as_str())
    }

    /// Return the first writer identifier found in `sql`, if any
    pub fn matched_identifier(&self, sql: &str) -> Option<&str> {
        let lowered = sql.to_ascii_lowercase();
        self.identifiers
            .iter()
            .find(|i| lowered.contains(&i.lowered))
            .map(|i| i.original.as_str())
    }

    /// Classify a SQL statement
    pub fn classify(&self, sql: &str) -> StatementClass {
        if self.matched_identifier(sql).is_some() {
            StatementClass::WriterRequired
        } else {
            StatementClass::ReaderEligible
        }
    }
}

/// Classify a SQL statement with the default writer identifiers
pub fn classify(sql: &str) -> StatementClass {
    SqlClassifier::default().classify(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_select_is_reader_eligible() {
        assert_eq!(
            classify("SELECT * FROM catalog_product WHERE sku = :sku"),
            StatementClass::ReaderEligible
        );
        assert_eq!(classify("SELECT 1"), StatementClass::ReaderEligible);
        assert_eq!(classify(""), StatementClass::ReaderEligible);
    }

    #[test]
    fn test_writer_identifiers_any_case() {
        for sql in [
            "INSERT INTO quote (id) VALUES (1)",
            "insert into quote (id) values (1)",
            "UPDATE catalog_product SET qty = qty - 1 WHERE id = :id",
            "Update catalog_product set qty = 0",
            "DELETE FROM quote_item WHERE id = 3",
            "DROP TABLE tmp_index",
            "create temporary table foo (id int)",
            "SELECT * FROM search_tmp_5f3a",
            "SELECT * FROM SEARCH_TMP_5F3A",
        ] {
            assert_eq!(classify(sql), StatementClass::WriterRequired, "{}", sql);
        }
    }

    #[test]
    fn test_token_requires_trailing_space() {
        // "updated_at" contains "update" but not "update "
        assert_eq!(
            classify("SELECT updated_at FROM customer_entity"),
            StatementClass::ReaderEligible
        );
    }

    #[test]
    fn test_false_positive_inside_literal() {
        assert_eq!(
            classify("SELECT * FROM cms_page WHERE content LIKE '%delete me%'"),
            StatementClass::WriterRequired
        );
    }

    #[test]
    fn test_matched_identifier_reports_first_in_scan_order() {
        let classifier = SqlClassifier::new();
        assert_eq!(
            classifier.matched_identifier("DELETE FROM a; INSERT INTO b VALUES (1)"),
            Some("INSERT ")
        );
        assert_eq!(classifier.matched_identifier("SELECT 1"), None);
    }

    #[test]
    fn test_custom_identifier() {
        let classifier = SqlClassifier::new().with_identifier("GET_LOCK(");
        assert_eq!(
            classifier.classify("SELECT get_lock('indexer', 5)"),
            StatementClass::WriterRequired
        );
        assert_eq!(
            classifier.matched_identifier("SELECT GET_LOCK('x', 1)"),
            Some("GET_LOCK(")
        );
        // defaults are still present
        assert_eq!(
            classifier.classify("DROP TABLE x"),
            StatementClass::WriterRequired
        );
    }

    #[test]
    fn test_empty_and_duplicate_identifiers_ignored() {
        let classifier = SqlClassifier::new()
            .with_identifier("")
            .with_identifier("DROP ");
        assert_eq!(classifier.identifiers().count(), WRITER_SQL_IDENTIFIERS.len());
        assert_eq!(classifier.classify("SELECT 1"), StatementClass::ReaderEligible);
    }

    #[test]
    fn test_free_function_matches_default_classifier() {
        let classifier = SqlClassifier::default();
        for sql in [
            "SELECT 1",
            "insert into a values (1)",
            "SELECT updated_at FROM t",
            "select * from SEARCH_TMP_1",
        ] {
            assert_eq!(classify(sql), classifier.classify(sql), "{}", sql);
        }
    }

    #[test]
    fn test_statement_class_display() {
        assert_eq!(StatementClass::WriterRequired.to_string(), "writer_required");
        assert_eq!(StatementClass::ReaderEligible.as_str(), "reader_eligible");
    }
}
