//! Language model boundary.

mod openai;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::OpenAiChatModel;

/// Result type for model calls.
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors from a language model call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Transport(String),

    #[error("model request timed out after {0} seconds")]
    Timeout(u64),

    #[error("model API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to parse model response: {0}")]
    Decode(String),

    #[error("model returned no content")]
    EmptyResponse,
}

/// One chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Role instructions.
    pub system: String,
    /// The grounding document.
    pub user: String,
    pub temperature: f32,
    /// Ask the model for a bare JSON object.
    pub json_mode: bool,
}

/// A text-completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs.
    fn name(&self) -> &str;

    /// Complete one request and return the raw text.
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<String>;
}
