//! Crate-level error types.

use thiserror::Error;

use crate::compiler::{CompileError, ExtractionError};
use crate::executor::ExecutionError;
use crate::format::FormatError;
use crate::llm::LlmError;
use crate::metadata::GroundingError;
use crate::validation::ValidationFailure;

/// Name reported in fatal errors.
pub const TOOL_NAME: &str = "query_datasource";

/// Result type for question answering.
pub type QaResult<T> = Result<T, QaError>;

/// Why one attempt failed. Every variant feeds the next compile.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptError {
    #[error("language model call failed: {0}")]
    Model(LlmError),

    #[error("could not extract a query from the model response: {0}")]
    Extraction(ExtractionError),

    #[error("{0}")]
    Validation(ValidationFailure),

    #[error("{0}")]
    Execution(ExecutionError),
}

impl AttemptError {
    /// Pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Model(_) => "compile",
            Self::Extraction(_) => "extract",
            Self::Validation(_) => "validate",
            Self::Execution(_) => "execute",
        }
    }
}

impl From<CompileError> for AttemptError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Model(e) => Self::Model(e),
            CompileError::Extraction(e) => Self::Extraction(e),
        }
    }
}

/// The single fatal error surfaced to the caller.
#[derive(Error, Debug)]
pub enum QaError {
    /// Metadata could not be fetched. Never retried.
    #[error("{tool}: failed to ground dataset: {source}")]
    Grounding {
        tool: &'static str,
        #[source]
        source: GroundingError,
    },

    /// The model reported that the dataset lacks what the task needs.
    #[error("{tool}: the dataset cannot answer this question: {reason}")]
    Unanswerable {
        tool: &'static str,
        reason: String,
        rationale: String,
    },

    /// Credential rejected and re-authentication unavailable or failed.
    #[error("{tool}: authentication failed: {message}")]
    Auth { tool: &'static str, message: String },

    /// Every attempt failed; carries the last cause.
    #[error("{tool} failed after {attempts} attempt(s): {last}")]
    AttemptsExhausted {
        tool: &'static str,
        attempts: usize,
        #[source]
        last: AttemptError,
    },

    /// The request exceeded its wall-clock budget.
    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: &'static str, secs: u64 },

    #[error("{tool}: {source}")]
    Format {
        tool: &'static str,
        #[source]
        source: FormatError,
    },
}

impl QaError {
    /// Check if the caller should obtain a new credential.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Auth { .. } => true,
            Self::Grounding { source, .. } => source.is_auth(),
            _ => false,
        }
    }
}
