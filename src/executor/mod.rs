//! Sends validated queries to the service.

use std::sync::Arc;

use thiserror::Error;

use crate::credential::Credential;
use crate::schema::Query;
use crate::service::{QueryResult, ServiceError, TabularService};

/// Errors from executing a validated query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// Credential rejected; routes to re-authentication, not to the compiler.
    #[error("authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    /// The service refused or failed the query.
    #[error("query execution failed{}: {message}", status_suffix(.status))]
    Rejected {
        status: Option<u16>,
        /// Raw service message, fed back to the compiler.
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl ExecutionError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

impl From<ServiceError> for ExecutionError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthorized { status, message } => Self::Auth { status, message },
            ServiceError::Rejected { status, message } => Self::Rejected {
                status: Some(status),
                message,
            },
            other => Self::Rejected {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

/// Runs queries against one service.
#[derive(Clone)]
pub struct QueryExecutor {
    service: Arc<dyn TabularService>,
}

impl QueryExecutor {
    pub fn new(service: Arc<dyn TabularService>) -> Self {
        Self { service }
    }

    /// Execute `query` against `dataset_id`. Zero rows is a success.
    pub async fn execute(
        &self,
        query: &Query,
        dataset_id: &str,
        credential: &Credential,
    ) -> Result<QueryResult, ExecutionError> {
        let result = self
            .service
            .query(dataset_id, query, credential)
            .await
            .map_err(ExecutionError::from)?;

        tracing::debug!(dataset_id, rows = result.len(), "query executed");
        Ok(result)
    }
}
