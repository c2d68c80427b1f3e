//! The split connection
//!
//! [`SplitConnection`] owns one writer and one reader connection for the
//! lifetime of a request. Each call is routed by the session's [`Router`]
//! and forwarded verbatim; results and errors come back exactly as the
//! chosen connection produced them. Nothing is retried and a failed reader
//! call is never replayed on the writer.
//!
//! # Example
//!
//! ```ignore
//! use diesel_splitdb::{RoutingContext, SplitConfig, SplitConnection};
//!
//! let config = SplitConfig::from_json_str(config_json)?;
//! let mut conn = SplitConnection::establish(config, &factory)
//!     .await?
//!     .with_context(RoutingContext::request("GET", "/catalog/view"));
//!
//! // served by the session's replica
//! conn.execute("SELECT * FROM catalog_product WHERE sku = ?", &bindings).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use diesel::{ConnectionResult, QueryResult};
use diesel_async::SimpleAsyncConnection;

use crate::{
    config::SplitConfig,
    connection::{Bindings, ConnectionFactory, SqlConnection},
    context::RoutingContext,
    event::{EventSink, Operation, RoutingEvent, Severity, TracingSink},
    router::{Router, RoutingDecision},
    selector::{ReaderSelector, ReaderTarget},
};

#[derive(Debug, Clone, Copy)]
struct LogSettings {
    enabled: bool,
    severity: Severity,
    max_sql_length: usize,
}

impl LogSettings {
    fn from_config(config: &SplitConfig) -> Self {
        Self {
            enabled: config.logging_enabled(),
            severity: config.severity(),
            max_sql_length: config.sql_length_limit(),
        }
    }
}

/// Read/write splitting connection
///
/// Not meant to be shared between tasks: every call takes `&mut self`, and
/// one instance is expected per request.
pub struct SplitConnection<C> {
    writer: C,
    /// Fixed at construction; never replaced
    reader: C,
    reader_target: Option<ReaderTarget>,
    router: Router,
    context: RoutingContext,
    log: LogSettings,
    sink: Arc<dyn EventSink>,
}

impl<C: SqlConnection> SplitConnection<C> {
    /// Wrap an existing writer and reader with default routing
    ///
    /// The session context starts as [`RoutingContext::batch`], so every call
    /// goes to the writer until the host provides a request context.
    pub fn new(writer: C, reader: C) -> Self {
        SplitConnectionBuilder::new(SplitConfig::default()).build(writer, reader)
    }

    /// Select a reader and open both connections through `factory`
    pub async fn establish<F>(config: SplitConfig, factory: &F) -> ConnectionResult<Self>
    where
        F: ConnectionFactory<Connection = C>,
    {
        SplitConnectionBuilder::new(config).establish(factory).await
    }

    /// Set the request context used by calls without an explicit context
    pub fn with_context(mut self, context: RoutingContext) -> Self {
        self.context = context;
        self
    }

    /// Replace the session's request context
    pub fn set_context(&mut self, context: RoutingContext) {
        self.context = context;
    }

    /// The session's request context
    pub fn context(&self) -> &RoutingContext {
        &self.context
    }

    /// The routing policy
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Decide where `sql` would go under `context`, without executing it
    pub fn route(&self, sql: &str, context: &RoutingContext) -> RoutingDecision {
        self.router.route(sql, context)
    }

    /// Execute one statement under the session context
    pub async fn execute(&mut self, sql: &str, bindings: &Bindings) -> QueryResult<C::Output> {
        self.dispatch(Operation::Execute, None, sql, bindings).await
    }

    /// Execute several statements under the session context
    ///
    /// The statement text is sent as-is. Never pass text built from user
    /// input: multi-statement execution is open to SQL injection and the
    /// split layer does no sanitising.
    pub async fn execute_multi(
        &mut self,
        sql: &str,
        bindings: &Bindings,
    ) -> QueryResult<C::Output> {
        self.dispatch(Operation::ExecuteMulti, None, sql, bindings).await
    }

    /// Execute one statement under an explicit context
    pub async fn execute_with(
        &mut self,
        context: &RoutingContext,
        sql: &str,
        bindings: &Bindings,
    ) -> QueryResult<C::Output> {
        self.dispatch(Operation::Execute, Some(context), sql, bindings)
            .await
    }

    /// Execute several statements under an explicit context
    ///
    /// Same injection caveat as [`SplitConnection::execute_multi`].
    pub async fn execute_multi_with(
        &mut self,
        context: &RoutingContext,
        sql: &str,
        bindings: &Bindings,
    ) -> QueryResult<C::Output> {
        self.dispatch(Operation::ExecuteMulti, Some(context), sql, bindings)
            .await
    }

    async fn dispatch(
        &mut self,
        operation: Operation,
        context: Option<&RoutingContext>,
        sql: &str,
        bindings: &Bindings,
    ) -> QueryResult<C::Output> {
        let decision = self.decide(operation, sql, context.unwrap_or(&self.context));
        let target = match decision {
            RoutingDecision::Writer => &mut self.writer,
            RoutingDecision::Reader => &mut self.reader,
        };
        match operation {
            Operation::Execute => target.execute(sql, bindings).await,
            Operation::ExecuteMulti => target.execute_multi(sql, bindings).await,
        }
    }
}

impl<C> SplitConnection<C> {
    /// The writer connection
    pub fn writer(&self) -> &C {
        &self.writer
    }

    /// The reader connection
    pub fn reader(&self) -> &C {
        &self.reader
    }

    /// Mutable access to the writer, bypassing routing
    pub fn writer_mut(&mut self) -> &mut C {
        &mut self.writer
    }

    /// Mutable access to the reader, bypassing routing
    pub fn reader_mut(&mut self) -> &mut C {
        &mut self.reader
    }

    /// Which reader was selected, if this session selected one
    ///
    /// `None` when the reader was supplied directly.
    pub fn reader_target(&self) -> Option<ReaderTarget> {
        self.reader_target
    }

    /// Pool index of the selected reader
    pub fn reader_index(&self) -> Option<usize> {
        self.reader_target.and_then(|target| target.index())
    }

    /// Take the writer and reader back
    pub fn into_parts(self) -> (C, C) {
        (self.writer, self.reader)
    }

    fn decide(&self, operation: Operation, sql: &str, context: &RoutingContext) -> RoutingDecision {
        if !self.log.enabled {
            return self.router.route(sql, context);
        }
        let (decision, reason) = self.router.route_with_reason(sql, context);
        self.sink.emit(
            self.log.severity,
            &RoutingEvent::routed(decision, operation, sql, reason, self.log.max_sql_length),
        );
        decision
    }

    fn report(&self, event: &RoutingEvent) {
        if self.log.enabled {
            self.sink.emit(self.log.severity, event);
        }
    }
}

#[async_trait]
impl<C: SqlConnection> SqlConnection for SplitConnection<C> {
    type Output = C::Output;

    async fn execute(&mut self, sql: &str, bindings: &Bindings) -> QueryResult<C::Output> {
        self.dispatch(Operation::Execute, None, sql, bindings).await
    }

    async fn execute_multi(&mut self, sql: &str, bindings: &Bindings) -> QueryResult<C::Output> {
        self.dispatch(Operation::ExecuteMulti, None, sql, bindings)
            .await
    }
}

#[async_trait]
impl<C: SqlConnection> SimpleAsyncConnection for SplitConnection<C> {
    async fn batch_execute(&mut self, query: &str) -> QueryResult<()> {
        self.dispatch(Operation::ExecuteMulti, None, query, &Bindings::None)
            .await
            .map(|_| ())
    }
}

/// Builder for [`SplitConnection`]
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use diesel_splitdb::{SplitConfig, SplitConnectionBuilder, TestSink};
///
/// let sink = Arc::new(TestSink::new());
/// let builder = SplitConnectionBuilder::new(SplitConfig::default().enable_logging(true))
///     .sink(sink.clone());
/// # let _ = builder;
/// ```
pub struct SplitConnectionBuilder {
    config: SplitConfig,
    router: Option<Router>,
    sink: Option<Arc<dyn EventSink>>,
    context: RoutingContext,
    selector: ReaderSelector,
}

impl SplitConnectionBuilder {
    /// Create a builder from a configuration
    pub fn new(config: SplitConfig) -> Self {
        Self {
            config,
            router: None,
            sink: None,
            context: RoutingContext::default(),
            selector: ReaderSelector::new(),
        }
    }

    /// Use a router other than the one the configuration describes
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Send routing events to `sink` instead of `tracing`
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the initial session context
    pub fn context(mut self, context: RoutingContext) -> Self {
        self.context = context;
        self
    }

    /// Use a specific selector; an already latched one fixes the reader
    pub fn selector(mut self, selector: ReaderSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Wrap connections that were opened elsewhere
    pub fn build<C>(self, writer: C, reader: C) -> SplitConnection<C> {
        self.assemble(writer, reader, None)
    }

    /// Select a reader and open the reader and writer through `factory`
    ///
    /// The reader's parameters are the writer's with the selected pool entry
    /// merged over them. Connection failures are returned as-is.
    pub async fn establish<F>(
        mut self,
        factory: &F,
    ) -> ConnectionResult<SplitConnection<F::Connection>>
    where
        F: ConnectionFactory,
    {
        let target = self.selector.select(self.config.reader_pool());
        let reader = factory.connect(self.config.reader_params(target)).await?;
        let writer = factory
            .connect(self.config.writer_params().clone())
            .await?;

        let connection = self.assemble(writer, reader, Some(target));
        connection.report(&RoutingEvent::ReaderSelected { target });
        Ok(connection)
    }

    fn assemble<C>(self, writer: C, reader: C, target: Option<ReaderTarget>) -> SplitConnection<C> {
        let log = LogSettings::from_config(&self.config);
        let router = self.router.unwrap_or_else(|| self.config.router());
        SplitConnection {
            writer,
            reader,
            reader_target: target,
            router,
            context: self.context,
            log,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink::new())),
        }
    }
}
