//! Caller-facing entry point: question in, answer payload out.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use crate::compiler::QueryCompiler;
use crate::config::{Settings, SettingsError};
use crate::credential::{Credential, CredentialProvider};
use crate::error::{AttemptError, QaError, QaResult, TOOL_NAME};
use crate::executor::QueryExecutor;
use crate::format::{format_rows, AnswerPayload, FormatOptions};
use crate::llm::{LanguageModel, OpenAiChatModel};
use crate::metadata::{DatasetMetadata, MetadataGrounder};
use crate::pipeline::RetryController;
use crate::service::{HttpTabularService, TabularService};

/// Grounds a dataset, runs the correction loop and formats the answer.
///
/// # Example
///
/// ```ignore
/// use vizqa::{Credential, DatasourceQa, Settings};
///
/// let qa = DatasourceQa::from_settings(&Settings::load()?)?;
/// let answer = qa
///     .ask("total sales by region", "ds-luid", Credential::new(token))
///     .await?;
/// println!("{}", answer.formatted_table);
/// ```
pub struct DatasourceQa {
    grounder: MetadataGrounder,
    compiler: Arc<QueryCompiler>,
    controller: RetryController,
    credentials: Option<Arc<dyn CredentialProvider>>,
    format: FormatOptions,
    overall_timeout: Duration,
}

impl DatasourceQa {
    /// Wire the pipeline over explicit collaborators.
    pub fn new(
        service: Arc<dyn TabularService>,
        model: Arc<dyn LanguageModel>,
        settings: &Settings,
    ) -> Self {
        let grounder = MetadataGrounder::from_settings(Arc::clone(&service), &settings.metadata);
        let compiler = Arc::new(QueryCompiler::from_settings(model, &settings.model));
        let controller = RetryController::from_settings(
            Arc::clone(&compiler),
            QueryExecutor::new(service),
            &settings.retry,
        );

        Self {
            grounder,
            compiler,
            controller,
            credentials: None,
            format: FormatOptions::from(&settings.format),
            overall_timeout: settings.retry.overall_timeout(),
        }
    }

    /// Wire the pipeline over the HTTP service and chat model in `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let service = HttpTabularService::from_settings(&settings.service)?;
        let model = OpenAiChatModel::from_settings(&settings.model)?;
        Ok(Self::new(Arc::new(service), Arc::new(model), settings))
    }

    /// Enable one re-authentication per request.
    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.controller = self
            .controller
            .with_credential_provider(Arc::clone(&provider));
        self.credentials = Some(provider);
        self
    }

    pub fn grounder(&self) -> &MetadataGrounder {
        &self.grounder
    }

    pub fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    /// Answer `task` from the dataset `dataset_id`.
    pub async fn ask(
        &self,
        task: &str,
        dataset_id: &str,
        credential: Credential,
    ) -> QaResult<AnswerPayload> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("ask", %request_id, dataset_id);

        let answer = self.answer(task, dataset_id, credential).instrument(span);
        match tokio::time::timeout(self.overall_timeout, answer).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(%request_id, "request exceeded its time budget");
                Err(QaError::Timeout {
                    tool: TOOL_NAME,
                    secs: self.overall_timeout.as_secs(),
                })
            }
        }
    }

    async fn answer(
        &self,
        task: &str,
        dataset_id: &str,
        credential: Credential,
    ) -> QaResult<AnswerPayload> {
        tracing::info!(credential = %credential.fingerprint(), "request started");

        let (metadata, credential, refreshed) = self.ground(dataset_id, credential).await?;

        let outcome = self
            .controller
            .run_with_auth_state(task, &metadata, credential, refreshed)
            .await;

        // Execution failures on every attempt may mean the cached catalog is stale.
        if let Err(QaError::AttemptsExhausted {
            last: AttemptError::Execution(_),
            ..
        }) = &outcome
        {
            self.grounder.invalidate(dataset_id);
        }
        let resolution = outcome?;

        let formatted_table = format_rows(&resolution.result.rows, &self.format)
            .map_err(|source| QaError::Format {
                tool: TOOL_NAME,
                source,
            })?;

        tracing::info!(
            attempts = resolution.attempts,
            rows = resolution.result.len(),
            "request finished"
        );

        Ok(AnswerPayload {
            rationale: resolution.rationale,
            dataset_id: dataset_id.to_string(),
            row_count: resolution.result.len(),
            executed_query: resolution.query,
            formatted_table,
            datasource: metadata.datasource.clone(),
            attempts: resolution.attempts,
            refreshed_credential: resolution.refreshed_credential,
        })
    }

    /// Ground the dataset, spending the request's one refresh if needed.
    async fn ground(
        &self,
        dataset_id: &str,
        credential: Credential,
    ) -> QaResult<(Arc<DatasetMetadata>, Credential, bool)> {
        let mut credential = credential;
        let mut refreshed = false;

        if credential.is_expired() {
            if let Some(provider) = &self.credentials {
                credential = self.refresh(provider.as_ref(), &credential).await?;
                refreshed = true;
            }
        }

        match self.grounder.ground(dataset_id, &credential).await {
            Ok(metadata) => Ok((metadata, credential, refreshed)),
            Err(err) if err.is_auth() && !refreshed => {
                let Some(provider) = &self.credentials else {
                    return Err(QaError::Grounding {
                        tool: TOOL_NAME,
                        source: err,
                    });
                };
                credential = self.refresh(provider.as_ref(), &credential).await?;
                let metadata = self
                    .grounder
                    .ground(dataset_id, &credential)
                    .await
                    .map_err(|source| QaError::Grounding {
                        tool: TOOL_NAME,
                        source,
                    })?;
                Ok((metadata, credential, true))
            }
            Err(source) => Err(QaError::Grounding {
                tool: TOOL_NAME,
                source,
            }),
        }
    }

    async fn refresh(
        &self,
        provider: &dyn CredentialProvider,
        stale: &Credential,
    ) -> QaResult<Credential> {
        tracing::warn!(credential = %stale.fingerprint(), "refreshing credential");
        provider.refresh(stale).await.map_err(|e| QaError::Auth {
            tool: TOOL_NAME,
            message: e.to_string(),
        })
    }
}
