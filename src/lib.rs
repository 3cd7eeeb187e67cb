//! # vizqa
//!
//! Natural-language question answering over a schema-constrained tabular
//! query service.
//!
//! ## Architecture
//!
//! A question is compiled into a structured query, checked against the
//! dataset's grounded catalog, and executed remotely. Failures at any stage
//! are fed back into the next compile until the attempt budget is spent:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            MetadataGrounder (cached, per dataset)        │
//! │   read-metadata + data dictionary + STRING sampling      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ DatasetMetadata
//! ┌─────────────────────────────────────────────────────────┐
//! │                   RetryController                        │
//! │  ┌──────────────┐   ┌────────────┐   ┌───────────────┐   │
//! │  │QueryCompiler │──►│ validation │──►│ QueryExecutor │   │
//! │  │ (LLM, T = 0) │   │ (offline)  │   │  (+ re-auth)  │   │
//! │  └──────────────┘   └────────────┘   └───────────────┘   │
//! │         ▲                 │                  │           │
//! │         └──── Feedback ◄──┴──────────────────┘           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ rows
//! ┌─────────────────────────────────────────────────────────┐
//! │         format: markdown table + AnswerPayload           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! [`DatasourceQa`] wires the stages together behind a single `ask` call.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod credential;
pub mod error;
pub mod executor;
pub mod format;
pub mod llm;
pub mod metadata;
pub mod pipeline;
pub mod qa;
pub mod schema;
pub mod service;
pub mod validation;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::compiler::{Candidate, Feedback, QueryCompiler};
    pub use crate::config::Settings;
    pub use crate::credential::{Credential, CredentialProvider, StaticCredential};
    pub use crate::error::{AttemptError, QaError, QaResult};
    pub use crate::format::{format_rows, AnswerPayload, FormatOptions};
    pub use crate::llm::{CompletionRequest, LanguageModel, OpenAiChatModel};
    pub use crate::metadata::{DataType, DatasetMetadata, FieldMetadata, MetadataGrounder};
    pub use crate::pipeline::RetryController;
    pub use crate::qa::DatasourceQa;
    pub use crate::schema::{
        FieldSpec, FilterField, FilterSpec, Function, Query, SchemaCatalog, SortDirection,
    };
    pub use crate::service::{HttpTabularService, QueryResult, Row, TabularService};
}

// Also export at crate root for convenience
pub use config::Settings;
pub use credential::{Credential, CredentialProvider};
pub use error::{QaError, QaResult};
pub use format::AnswerPayload;
pub use qa::DatasourceQa;
pub use schema::Query;
