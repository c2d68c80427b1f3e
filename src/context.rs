//! Request context and the writer-forcing guard
//!
//! The hosting layer builds a [`RoutingContext`] from whatever request
//! scoping it has and hands it to the router on every call. The
//! [`ContextGuard`] then decides whether the context alone forces the writer.

/// Default URL areas that always use the writer
pub const DEFAULT_EXCLUDED_AREAS: [&str; 2] = ["/checkout", "/customer"];

/// The only HTTP method allowed to read from replicas
pub const SAFE_READ_METHOD: &str = "GET";

/// How the current process is executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Serving interactive requests
    Serving,
    /// Batch, CLI or maintenance execution with no request
    Batch,
}

impl ExecutionMode {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Serving => "serving",
            ExecutionMode::Batch => "batch",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the request a statement is issued for
///
/// # Example
///
/// ```
/// use diesel_splitdb::context::{ExecutionMode, RoutingContext};
///
/// let ctx = RoutingContext::serving()
///     .with_method("GET")
///     .with_path("/catalog/view");
///
/// assert_eq!(ctx.mode(), ExecutionMode::Serving);
/// assert_eq!(ctx.path(), Some("/catalog/view"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingContext {
    mode: ExecutionMode,
    method: Option<String>,
    path: Option<String>,
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self::batch()
    }
}

impl RoutingContext {
    /// Context for a serving process, with no request details yet
    pub fn serving() -> Self {
        Self {
            mode: ExecutionMode::Serving,
            method: None,
            path: None,
        }
    }

    /// Context for batch/CLI execution
    pub fn batch() -> Self {
        Self {
            mode: ExecutionMode::Batch,
            method: None,
            path: None,
        }
    }

    /// Context for a serving request with method and path
    pub fn request(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::serving().with_method(method).with_path(path)
    }

    /// Set the HTTP method
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set the request path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// The execution mode
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// The HTTP method, if any
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// The request path, if any
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// Why a call was forced onto the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterReason {
    /// The process is not serving a request
    BatchMode,
    /// The request method can have side effects
    UnsafeMethod(String),
    /// The request path is in an excluded area
    ExcludedArea(String),
    /// The statement text contains a writer identifier
    WriterIdentifier(String),
}

impl std::fmt::Display for WriterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterReason::BatchMode => write!(f, "batch execution"),
            WriterReason::UnsafeMethod(method) => write!(f, "method {}", method),
            WriterReason::ExcludedArea(area) => write!(f, "excluded area {}", area),
            WriterReason::WriterIdentifier(token) => {
                write!(f, "writer identifier '{}'", token.trim_end())
            }
        }
    }
}

/// Context-level writer policy
#[derive(Debug, Clone)]
pub struct ContextGuard {
    /// Excluded areas as configured
    excluded_areas: Vec<String>,
    /// Lowercased copies used for matching
    excluded_lowered: Vec<String>,
}

impl Default for ContextGuard {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_AREAS)
    }
}

impl ContextGuard {
    /// Create a guard with the given excluded areas
    ///
    /// Empty entries are dropped; they would match every path.
    pub fn new<I, S>(excluded_areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let excluded_areas: Vec<String> = excluded_areas
            .into_iter()
            .map(Into::into)
            .filter(|area: &String| !area.is_empty())
            .collect();
        let excluded_lowered = excluded_areas
            .iter()
            .map(|area| area.to_ascii_lowercase())
            .collect();
        Self {
            excluded_areas,
            excluded_lowered,
        }
    }

    /// The configured excluded areas
    pub fn excluded_areas(&self) -> &[String] {
        &self.excluded_areas
    }

    /// Return the first rule that forces the writer, if any
    ///
    /// Rules are checked in order: batch mode, non-GET method, excluded area.
    pub fn writer_reason(&self, context: &RoutingContext) -> Option<WriterReason> {
        if context.mode() == ExecutionMode::Batch {
            return Some(WriterReason::BatchMode);
        }

        if let Some(method) = context.method() {
            if !method.eq_ignore_ascii_case(SAFE_READ_METHOD) {
                return Some(WriterReason::UnsafeMethod(method.to_string()));
            }
        }

        if let Some(path) = context.path() {
            let path = path.to_ascii_lowercase();
            if let Some(index) = self
                .excluded_lowered
                .iter()
                .position(|area| path.contains(area.as_str()))
            {
                return Some(WriterReason::ExcludedArea(
                    self.excluded_areas[index].clone(),
                ));
            }
        }

        None
    }

    /// Whether the context alone forces the writer
    pub fn must_use_writer(&self, context: &RoutingContext) -> bool {
        self.writer_reason(context).is_some()
    }
}
