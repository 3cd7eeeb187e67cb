//! Natural language to candidate query compilation.
//!
//! ```text
//! task + DatasetMetadata + SchemaCatalog (+ prior Feedback)
//!        │
//!        ▼
//!  GroundingDocument ──► LanguageModel (temperature 0) ──► extract()
//!                                                             │
//!                                                             ▼
//!                                    Candidate::Query | Candidate::CannotAnswer
//! ```

pub mod extract;
pub mod prompt;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::ModelSettings;
use crate::llm::{CompletionRequest, LanguageModel, LlmError};
use crate::metadata::DatasetMetadata;
use crate::schema::SchemaCatalog;

pub use extract::{extract, ExtractionError, ExtractionMethod, ModelAnswer, PAYLOAD_DELIMITER};
pub use prompt::{Feedback, GroundingDocument, SYSTEM_PROMPT};

// ============================================================================
// Errors
// ============================================================================

/// Errors from one compile step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Model(#[from] LlmError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

// ============================================================================
// Output
// ============================================================================

/// Unvalidated output of one compile.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Query { payload: Value, rationale: String },
    CannotAnswer { reason: String, rationale: String },
}

// ============================================================================
// Compiler
// ============================================================================

/// Turns a task into a candidate query.
pub struct QueryCompiler {
    model: Arc<dyn LanguageModel>,
    catalog: Arc<SchemaCatalog>,
    temperature: f32,
    json_mode: bool,
}

impl QueryCompiler {
    /// Compiler with the standard catalog at temperature 0.
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            catalog: Arc::new(SchemaCatalog::standard()),
            temperature: 0.0,
            json_mode: false,
        }
    }

    pub fn from_settings(model: Arc<dyn LanguageModel>, settings: &ModelSettings) -> Self {
        Self::new(model)
            .with_temperature(settings.temperature)
            .with_json_mode(settings.json_mode)
    }

    pub fn with_catalog(mut self, catalog: Arc<SchemaCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// The request that [`compile`](Self::compile) would send.
    pub fn request(
        &self,
        task: &str,
        metadata: &DatasetMetadata,
        feedback: &[Feedback],
    ) -> CompletionRequest {
        let document = GroundingDocument::build(task, metadata, &self.catalog, feedback);
        CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: document.render(),
            temperature: self.temperature,
            json_mode: self.json_mode,
        }
    }

    /// Compile `task` into a candidate, optionally correcting a prior failure.
    pub async fn compile(
        &self,
        task: &str,
        metadata: &DatasetMetadata,
        feedback: &[Feedback],
    ) -> Result<Candidate, CompileError> {
        let request = self.request(task, metadata, feedback);
        tracing::debug!(
            model = self.model.name(),
            prompt_chars = request.user.len(),
            prior_failures = feedback.len(),
            "compiling task"
        );

        let text = self.model.complete(&request).await?;
        let extracted = extract(&text)?;
        tracing::debug!(method = ?extracted.method, "extracted model answer");

        Ok(match extracted.answer {
            ModelAnswer::Query(payload) => Candidate::Query {
                payload,
                rationale: extracted.rationale,
            },
            ModelAnswer::CannotAnswer(reason) => Candidate::CannotAnswer {
                reason,
                rationale: extracted.rationale,
            },
        })
    }
}
