//! HTTP client for the tabular query service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use super::error::{classify_status, ServiceError, ServiceResult};
use super::protocol::{
    error_message, DataDictionary, DatasourceRef, FieldRecord, GraphqlRequest, GraphqlResponse,
    QueryDatasourceRequest, QueryDatasourceResponse, QueryResult, ReadMetadataRequest,
    ReadMetadataResponse, DICTIONARY_QUERY,
};
use super::TabularService;
use crate::config::{ServiceSettings, SettingsError};
use crate::credential::Credential;
use crate::schema::Query;

/// Default timeout for requests (30 seconds).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default header carrying the credential.
const DEFAULT_AUTH_HEADER: &str = "X-Tableau-Auth";

/// Talks to the data service and the metadata GraphQL endpoint over HTTPS.
///
/// # Example
///
/// ```ignore
/// use vizqa::service::{HttpTabularService, TabularService};
/// use vizqa::credential::Credential;
///
/// let service = HttpTabularService::new("https://tableau.example.com")?;
/// let fields = service.read_metadata("ds-luid", &Credential::new(token)).await?;
/// ```
#[derive(Debug, Clone)]
pub struct HttpTabularService {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    auth_header: String,
    timeout: Duration,
}

impl HttpTabularService {
    /// Client with default API version, header and timeout.
    pub fn new(base_url: impl Into<String>) -> ServiceResult<Self> {
        Self::build(
            base_url.into(),
            "v1".to_string(),
            DEFAULT_AUTH_HEADER.to_string(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    /// Client configured from the `[service]` settings section.
    pub fn from_settings(settings: &ServiceSettings) -> Result<Self, SettingsError> {
        let base_url = settings.resolved_base_url()?;
        Self::build(
            base_url,
            settings.api_version.clone(),
            settings.auth_header.clone(),
            settings.timeout(),
        )
        .map_err(|e| SettingsError::InvalidConfig(e.to_string()))
    }

    fn build(
        base_url: String,
        api_version: String,
        auth_header: String,
        timeout: Duration,
    ) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
            auth_header,
            timeout,
        })
    }

    /// Get the current request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn data_service_url(&self, method: &str) -> String {
        format!(
            "{}/api/{}/vizql-data-service/{}",
            self.base_url, self.api_version, method
        )
    }

    fn graphql_url(&self) -> String {
        format!("{}/api/metadata/graphql", self.base_url)
    }

    /// POST a JSON body and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The request cannot be sent or times out
    /// - The service answers with a non-2xx status
    /// - The response body is not the expected JSON
    async fn post_json<B, R>(
        &self,
        url: &str,
        body: &B,
        credential: &Credential,
    ) -> ServiceResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .header(self.auth_header.as_str(), credential.token())
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| ServiceError::Decode(e.to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::Timeout(self.timeout.as_secs())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl TabularService for HttpTabularService {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn read_metadata(
        &self,
        dataset_id: &str,
        credential: &Credential,
    ) -> ServiceResult<Vec<FieldRecord>> {
        let body = ReadMetadataRequest {
            datasource: DatasourceRef {
                datasource_luid: dataset_id,
            },
        };
        let response: ReadMetadataResponse = self
            .post_json(&self.data_service_url("read-metadata"), &body, credential)
            .await?;
        Ok(response.data)
    }

    async fn query(
        &self,
        dataset_id: &str,
        query: &Query,
        credential: &Credential,
    ) -> ServiceResult<QueryResult> {
        let body = QueryDatasourceRequest {
            datasource: DatasourceRef {
                datasource_luid: dataset_id,
            },
            query,
        };
        let response: QueryDatasourceResponse = self
            .post_json(&self.data_service_url("query-datasource"), &body, credential)
            .await?;

        if let Some(error) = response.error {
            return Err(ServiceError::Reported(error_message(&error)));
        }
        match response.data {
            Some(rows) => Ok(QueryResult::new(rows)),
            None => Err(ServiceError::Decode(
                "response has neither `data` nor `error`".to_string(),
            )),
        }
    }

    async fn data_dictionary(
        &self,
        dataset_id: &str,
        credential: &Credential,
    ) -> ServiceResult<Option<DataDictionary>> {
        let body = GraphqlRequest {
            query: DICTIONARY_QUERY,
            variables: json!({ "luid": dataset_id }),
        };
        let response: GraphqlResponse = self
            .post_json(&self.graphql_url(), &body, credential)
            .await?;

        if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<String> = errors.iter().map(error_message).collect();
            return Err(ServiceError::Reported(messages.join("; ")));
        }

        Ok(response
            .data
            .and_then(|d| d.published_datasources.into_iter().next())
            .map(DataDictionary::from))
    }
}

/// The `query-datasource` body that would be sent for `query`.
pub fn query_request_body(dataset_id: &str, query: &Query) -> Value {
    json!({
        "datasource": { "datasourceLuid": dataset_id },
        "query": query.to_value(),
    })
}
