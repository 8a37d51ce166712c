use crate::scope::ScopeId;
use std::sync::Arc;
use thiserror::Error;

/// Structured error context for configuration problems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field or environment variable that caused the error (e.g., "window_ms", "COLLAPSER_MAX_BATCH_SIZE")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "collapser_config")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for collapsing and scope propagation.
///
/// Errors are attached to the future(s) they affect. `Error` is `Clone` so a
/// batch-level failure can be handed to every unit of the batch; all of them
/// share the same underlying cause.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("no execution scope is active on this thread; call ExecutionScope::initialize() first")]
    NoActiveScope,

    #[error("execution scope {0} is already active on this thread")]
    ScopeAlreadyActive(ScopeId),

    #[error("execution scope {0} is no longer active")]
    ScopeNotActive(ScopeId),

    #[error("no response for key {key} from collapser '{collapser}'")]
    MissingResponse { collapser: String, key: String },

    #[error("batch execution failed in collapser '{collapser}': {cause}")]
    BatchExecutionFailed {
        collapser: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("result slot of collapser '{collapser}' was dropped before it was resolved")]
    ResultDropped { collapser: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub(crate) fn batch_failed(collapser: impl Into<String>, cause: Arc<anyhow::Error>) -> Self {
        Error::BatchExecutionFailed {
            collapser: collapser.into(),
            cause,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The executor ran but produced no value for this key.
    pub fn is_missing_response(&self) -> bool {
        matches!(self, Error::MissingResponse { .. })
    }

    /// The executor call itself failed for the whole batch.
    pub fn is_batch_failure(&self) -> bool {
        matches!(self, Error::BatchExecutionFailed { .. })
    }

    pub fn is_scope_error(&self) -> bool {
        matches!(
            self,
            Error::NoActiveScope | Error::ScopeAlreadyActive(_) | Error::ScopeNotActive(_)
        )
    }

    /// Underlying executor failure, if this is a batch-level error.
    pub fn batch_cause(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            Error::BatchExecutionFailed { cause, .. } => Some(cause),
            _ => None,
        }
    }
}
