use rill_ir::Span;

/// The single error type of the frontend.
///
/// Carries a human-readable message and, once known, a source location. The
/// first frame that sees the error with no span attaches the nearest AST
/// node's span; frames above never overwrite it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    pub span: Option<Span>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
        }
    }

    /// Attach a span if none is present yet.
    pub fn annotate(mut self, span: Option<&Span>) -> Self {
        if self.span.is_none() {
            self.span = span.cloned();
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;

/// Shorthand for building a `CompileError` from format arguments.
macro_rules! err {
    ($($arg:tt)*) => {
        $crate::error::CompileError::new(format!($($arg)*))
    };
}

pub(crate) use err;
