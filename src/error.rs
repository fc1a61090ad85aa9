use std::path::PathBuf;

use crate::document::DocumentError;

/// Error returned by every tool call.
///
/// Validation errors are raised before any I/O or mutation starts. The two
/// not-found kinds are kept apart so callers can tell a bad file from an
/// expired or unknown session.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Missing, malformed or unsupported caller input (including unknown
    /// operation names).
    #[error("{0}")]
    Validation(String),
    /// The `path` (or `output_path` parent) does not exist.
    #[error("file not found: {}", .0.display())]
    PathNotFound(PathBuf),
    /// No open session has this id.
    #[error("session not found: {0}")]
    SessionNotFound(String),
    /// The call would break a document invariant (e.g. removing the last sheet).
    #[error("invalid operation state: {0}")]
    InvalidOperationState(String),
    /// The session store is at capacity.
    #[error("maximum number of sessions reached ({0})")]
    SessionLimit(usize),
    /// The document engine failed to read, parse or write a file.
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl ToolError {
    /// A required parameter was absent, null or blank.
    pub fn missing(name: &str) -> Self {
        ToolError::Validation(format!("missing required parameter '{name}'"))
    }

    /// A parameter was present but could not be used as supplied.
    pub fn invalid(name: &str, value: impl std::fmt::Display, expected: &str) -> Self {
        ToolError::Validation(format!(
            "invalid value for parameter '{name}': {value} (expected {expected})"
        ))
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::Validation(_) => "validation",
            ToolError::PathNotFound(_) => "path_not_found",
            ToolError::SessionNotFound(_) => "session_not_found",
            ToolError::InvalidOperationState(_) => "invalid_operation_state",
            ToolError::SessionLimit(_) => "session_limit",
            ToolError::Document(_) => "document_error",
        }
    }

    /// True for errors caused by the caller's input rather than by the
    /// document or the environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ToolError::Validation(_) | ToolError::PathNotFound(_) | ToolError::SessionNotFound(_)
        )
    }
}
