//! Bounded compile → validate → execute loop with error feedback.

use std::sync::Arc;

use serde_json::Value;

use crate::compiler::{Candidate, Feedback, QueryCompiler};
use crate::config::RetrySettings;
use crate::credential::{Credential, CredentialProvider};
use crate::error::{AttemptError, QaError, QaResult, TOOL_NAME};
use crate::executor::{ExecutionError, QueryExecutor};
use crate::metadata::DatasetMetadata;
use crate::schema::Query;
use crate::service::QueryResult;
use crate::validation;

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded { rows: usize },
    Failed(AttemptError),
}

/// One attempt of the loop. Lives only as long as the request.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// 1-based.
    pub index: usize,
    /// Raw payload tried, when the compiler produced one.
    pub payload: Option<Value>,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    /// Feedback for the next compile, if this attempt failed.
    pub fn feedback(&self) -> Option<Feedback> {
        match &self.outcome {
            AttemptOutcome::Failed(error) => {
                Some(Feedback::new(error.to_string(), self.payload.clone()))
            }
            AttemptOutcome::Succeeded { .. } => None,
        }
    }
}

/// A successful run of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub query: Query,
    pub rationale: String,
    pub result: QueryResult,
    /// Attempts used, including the successful one.
    pub attempts: usize,
    /// Set when the credential was refreshed mid-request.
    pub refreshed_credential: Option<Credential>,
}

/// Drives attempts until one succeeds or the budget is spent.
pub struct RetryController {
    compiler: Arc<QueryCompiler>,
    executor: QueryExecutor,
    credentials: Option<Arc<dyn CredentialProvider>>,
    max_attempts: usize,
}

impl RetryController {
    pub fn new(compiler: Arc<QueryCompiler>, executor: QueryExecutor) -> Self {
        Self {
            compiler,
            executor,
            credentials: None,
            max_attempts: RetrySettings::default().max_attempts,
        }
    }

    pub fn from_settings(
        compiler: Arc<QueryCompiler>,
        executor: QueryExecutor,
        settings: &RetrySettings,
    ) -> Self {
        Self::new(compiler, executor).with_max_attempts(settings.max_attempts)
    }

    /// At least one attempt always runs.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run the loop for one task.
    ///
    /// Returns the first successful execution, or exactly one fatal error:
    /// - `Unanswerable` as soon as the compiler declines the task
    /// - `Auth` when the credential is rejected and cannot be refreshed
    /// - `AttemptsExhausted` with the last cause after `max_attempts`
    pub async fn run(
        &self,
        task: &str,
        metadata: &DatasetMetadata,
        credential: Credential,
    ) -> QaResult<Resolution> {
        self.run_with_auth_state(task, metadata, credential, false)
            .await
    }

    /// Like [`run`](Self::run), for a request that may already have spent
    /// its one credential refresh.
    pub async fn run_with_auth_state(
        &self,
        task: &str,
        metadata: &DatasetMetadata,
        credential: Credential,
        refreshed: bool,
    ) -> QaResult<Resolution> {
        let mut credential = credential;
        let mut refreshed = refreshed;
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut index = 0;

        loop {
            index += 1;
            let feedback: Vec<Feedback> =
                history.iter().filter_map(AttemptRecord::feedback).collect();
            tracing::info!(attempt = index, max = self.max_attempts, "starting attempt");

            let (payload, rationale) =
                match self.compiler.compile(task, metadata, &feedback).await {
                    Ok(Candidate::Query { payload, rationale }) => (payload, rationale),
                    Ok(Candidate::CannotAnswer { reason, rationale }) => {
                        tracing::info!(attempt = index, %reason, "model declined the task");
                        return Err(QaError::Unanswerable {
                            tool: TOOL_NAME,
                            reason,
                            rationale,
                        });
                    }
                    Err(e) => {
                        self.fail(&mut history, index, None, AttemptError::from(e))?;
                        continue;
                    }
                };

            let query = match validation::check(&payload, metadata) {
                Ok(query) => query,
                Err(failure) => {
                    let error = AttemptError::Validation(failure);
                    self.fail(&mut history, index, Some(payload), error)?;
                    continue;
                }
            };

            let result = loop {
                match self
                    .executor
                    .execute(&query, &metadata.dataset_id, &credential)
                    .await
                {
                    Err(ExecutionError::Auth { status, message }) => {
                        credential = self
                            .reauthenticate(&credential, refreshed, status, message)
                            .await?;
                        refreshed = true;
                    }
                    other => break other,
                }
            };

            match result {
                Ok(result) => {
                    tracing::info!(attempt = index, rows = result.len(), "attempt succeeded");
                    history.push(AttemptRecord {
                        index,
                        payload: Some(payload),
                        outcome: AttemptOutcome::Succeeded { rows: result.len() },
                    });
                    return Ok(Resolution {
                        query,
                        rationale,
                        result,
                        attempts: index,
                        refreshed_credential: refreshed.then_some(credential),
                    });
                }
                Err(e) => {
                    self.fail(&mut history, index, Some(payload), AttemptError::Execution(e))?;
                }
            }
        }
    }

    /// Record a failed attempt, or end the loop if it was the last one.
    fn fail(
        &self,
        history: &mut Vec<AttemptRecord>,
        index: usize,
        payload: Option<Value>,
        error: AttemptError,
    ) -> QaResult<()> {
        tracing::warn!(attempt = index, stage = error.stage(), error = %error, "attempt failed");

        if index >= self.max_attempts {
            return Err(QaError::AttemptsExhausted {
                tool: TOOL_NAME,
                attempts: index,
                last: error,
            });
        }

        history.push(AttemptRecord {
            index,
            payload,
            outcome: AttemptOutcome::Failed(error),
        });
        Ok(())
    }

    /// One refresh per request; a second rejection is fatal.
    async fn reauthenticate(
        &self,
        stale: &Credential,
        already_refreshed: bool,
        status: u16,
        message: String,
    ) -> QaResult<Credential> {
        let provider = match &self.credentials {
            Some(provider) if !already_refreshed => provider,
            _ => {
                return Err(QaError::Auth {
                    tool: TOOL_NAME,
                    message: format!("HTTP {}: {}", status, message),
                })
            }
        };

        tracing::warn!(
            status,
            credential = %stale.fingerprint(),
            "credential rejected, re-authenticating"
        );
        provider.refresh(stale).await.map_err(|e| QaError::Auth {
            tool: TOOL_NAME,
            message: e.to_string(),
        })
    }
}
