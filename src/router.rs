//! Per-statement routing
//!
//! Combines the [`ContextGuard`] and the [`SqlClassifier`]. Context rules are
//! checked first and always win over the statement text.

use crate::{
    classifier::{SqlClassifier, StatementClass},
    context::{ContextGuard, RoutingContext, WriterReason},
};

/// Where a call is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingDecision {
    /// The writer (primary) connection
    Writer,
    /// The session's reader (replica) connection
    Reader,
}

impl RoutingDecision {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingDecision::Writer => "WRITER",
            RoutingDecision::Reader => "READER",
        }
    }
}

impl std::fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Routing policy for one session
#[derive(Debug, Clone, Default)]
pub struct Router {
    guard: ContextGuard,
    classifier: SqlClassifier,
}

impl Router {
    /// Create a router from its two policies
    pub fn new(guard: ContextGuard, classifier: SqlClassifier) -> Self {
        Self { guard, classifier }
    }

    /// The context policy
    pub fn guard(&self) -> &ContextGuard {
        &self.guard
    }

    /// The statement policy
    pub fn classifier(&self) -> &SqlClassifier {
        &self.classifier
    }

    /// Route a statement issued under `context`
    pub fn route(&self, sql: &str, context: &RoutingContext) -> RoutingDecision {
        if self.guard.must_use_writer(context) {
            return RoutingDecision::Writer;
        }
        match self.classifier.classify(sql) {
            StatementClass::WriterRequired => RoutingDecision::Writer,
            StatementClass::ReaderEligible => RoutingDecision::Reader,
        }
    }

    /// Route a statement and report why the writer was chosen
    ///
    /// The reason is `None` exactly when the decision is
    /// [`RoutingDecision::Reader`].
    pub fn route_with_reason(
        &self,
        sql: &str,
        context: &RoutingContext,
    ) -> (RoutingDecision, Option<WriterReason>) {
        if let Some(reason) = self.guard.writer_reason(context) {
            return (RoutingDecision::Writer, Some(reason));
        }
        match self.classifier.matched_identifier(sql) {
            Some(token) => (
                RoutingDecision::Writer,
                Some(WriterReason::WriterIdentifier(token.to_string())),
            ),
            None => (RoutingDecision::Reader, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::WRITER_SQL_IDENTIFIERS;

    fn catalog_get() -> RoutingContext {
        RoutingContext::request("GET", "/catalog/view")
    }

    #[test]
    fn test_writer_tokens_route_to_writer_in_any_context() {
        let router = Router::default();
        let contexts = [
            catalog_get(),
            RoutingContext::request("POST", "/"),
            RoutingContext::batch(),
            RoutingContext::serving(),
        ];
        for token in WRITER_SQL_IDENTIFIERS {
            let upper = format!("{}x", token);
            let lower = upper.to_lowercase();
            for ctx in &contexts {
                assert_eq!(router.route(&upper, ctx), RoutingDecision::Writer);
                assert_eq!(router.route(&lower, ctx), RoutingDecision::Writer);
            }
        }
    }

    #[test]
    fn test_plain_select_on_get_routes_to_reader() {
        let router = Router::default();
        assert_eq!(
            router.route("SELECT * FROM catalog_product WHERE sku = :sku", &catalog_get()),
            RoutingDecision::Reader
        );
    }

    #[test]
    fn test_non_get_routes_select_to_writer() {
        let router = Router::default();
        let ctx = RoutingContext::request("POST", "/catalog/view");
        assert_eq!(router.route("SELECT 1", &ctx), RoutingDecision::Writer);
    }

    #[test]
    fn test_excluded_path_routes_select_to_writer() {
        let router = Router::default();
        let ctx = RoutingContext::request("GET", "/checkout/cart");
        assert_eq!(router.route("SELECT * FROM cart", &ctx), RoutingDecision::Writer);
    }

    #[test]
    fn test_batch_routes_everything_to_writer() {
        let router = Router::default();
        assert_eq!(
            router.route("SELECT * FROM cart", &RoutingContext::batch()),
            RoutingDecision::Writer
        );
    }

    #[test]
    fn test_route_with_reason_context_first() {
        let router = Router::default();
        let ctx = RoutingContext::request("GET", "/checkout/cart");
        let (decision, reason) = router.route_with_reason("UPDATE quote SET x = 1", &ctx);
        assert_eq!(decision, RoutingDecision::Writer);
        assert_eq!(reason, Some(WriterReason::ExcludedArea("/checkout".to_string())));
    }

    #[test]
    fn test_route_with_reason_statement() {
        let router = Router::default();
        let (decision, reason) =
            router.route_with_reason("DELETE FROM quote WHERE id = 1", &catalog_get());
        assert_eq!(decision, RoutingDecision::Writer);
        assert_eq!(
            reason,
            Some(WriterReason::WriterIdentifier("DELETE ".to_string()))
        );

        let (decision, reason) = router.route_with_reason("SELECT 1", &catalog_get());
        assert_eq!(decision, RoutingDecision::Reader);
        assert!(reason.is_none());
    }

    #[test]
    fn test_route_with_reason_agrees_with_route() {
        let router = Router::default();
        let statements = ["SELECT 1", "INSERT INTO a VALUES (1)", "select * from search_tmp"];
        let contexts = [
            catalog_get(),
            RoutingContext::request("PUT", "/"),
            RoutingContext::request("GET", "/customer/account"),
            RoutingContext::batch(),
        ];
        for sql in statements {
            for ctx in &contexts {
                assert_eq!(router.route(sql, ctx), router.route_with_reason(sql, ctx).0);
            }
        }
    }

    #[test]
    fn test_custom_classifier_identifier() {
        let router = Router::new(
            ContextGuard::default(),
            SqlClassifier::new().with_identifier("FOR UPDATE"),
        );
        assert_eq!(
            router.route("SELECT * FROM sequence FOR UPDATE", &catalog_get()),
            RoutingDecision::Writer
        );
    }

    #[test]
    fn test_routing_decision_display() {
        assert_eq!(RoutingDecision::Writer.to_string(), "WRITER");
        assert_eq!(RoutingDecision::Reader.as_str(), "READER");
    }
}
