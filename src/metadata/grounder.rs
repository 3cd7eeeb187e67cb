//! Builds [`DatasetMetadata`] from the service's field listing.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use thiserror::Error;

use super::types::{DatasetMetadata, FieldMetadata};
use crate::cache::MetadataCache;
use crate::config::{MetadataSettings, MAX_SAMPLE_VALUES};
use crate::credential::Credential;
use crate::schema::Query;
use crate::service::{DataDictionary, FieldRecord, ServiceError, TabularService};

/// Result type for grounding.
pub type GroundingResult<T> = Result<T, GroundingError>;

/// Grounding is all-or-nothing: any of these aborts the request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GroundingError {
    #[error("failed to list fields of dataset {dataset_id}: {source}")]
    Metadata {
        dataset_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("failed to read the data dictionary of dataset {dataset_id}: {source}")]
    Dictionary {
        dataset_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("failed to sample values of field '{field}': {source}")]
    Probe {
        field: String,
        #[source]
        source: ServiceError,
    },

    #[error("dataset {0} has no visible fields")]
    EmptyCatalog(String),
}

impl GroundingError {
    /// Check if the service rejected the credential.
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Metadata { source, .. }
            | Self::Dictionary { source, .. }
            | Self::Probe { source, .. } => source.is_auth(),
            Self::EmptyCatalog(_) => false,
        }
    }
}

/// Fetches a dataset's catalog and sample values.
pub struct MetadataGrounder {
    service: Arc<dyn TabularService>,
    cache: Option<Arc<MetadataCache>>,
    sample_values: usize,
    probe_concurrency: usize,
    data_dictionary: bool,
}

impl MetadataGrounder {
    /// Grounder with default sampling and no cache.
    pub fn new(service: Arc<dyn TabularService>) -> Self {
        Self::from_settings(service, &MetadataSettings {
            cache_enabled: false,
            ..MetadataSettings::default()
        })
    }

    pub fn from_settings(service: Arc<dyn TabularService>, settings: &MetadataSettings) -> Self {
        let cache = settings
            .cache_enabled
            .then(|| Arc::new(MetadataCache::new(settings.cache_ttl())));

        Self {
            service,
            cache,
            sample_values: settings.sample_values.min(MAX_SAMPLE_VALUES),
            probe_concurrency: settings.probe_concurrency.max(1),
            data_dictionary: settings.data_dictionary,
        }
    }

    /// Share a cache across grounders.
    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Forget any cached metadata for `dataset_id`.
    pub fn invalidate(&self, dataset_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(self.service.endpoint(), dataset_id);
        }
    }

    /// Ground a dataset: list fields, merge the dictionary, sample STRING fields.
    pub async fn ground(
        &self,
        dataset_id: &str,
        credential: &Credential,
    ) -> GroundingResult<Arc<DatasetMetadata>> {
        let endpoint = self.service.endpoint();
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(endpoint, dataset_id)) {
            tracing::debug!(dataset_id, "metadata cache hit");
            return Ok(hit);
        }

        let records = self
            .service
            .read_metadata(dataset_id, credential)
            .await
            .map_err(|source| GroundingError::Metadata {
                dataset_id: dataset_id.to_string(),
                source,
            })?;

        let dictionary = if self.data_dictionary {
            self.service
                .data_dictionary(dataset_id, credential)
                .await
                .map_err(|source| GroundingError::Dictionary {
                    dataset_id: dataset_id.to_string(),
                    source,
                })?
        } else {
            None
        };

        let mut fields: Vec<FieldMetadata> = records
            .into_iter()
            .map(|record| to_field(record, dictionary.as_ref()))
            .collect();

        if !fields.iter().any(|f| !f.hidden) {
            return Err(GroundingError::EmptyCatalog(dataset_id.to_string()));
        }

        self.sample(dataset_id, credential, &mut fields).await?;

        let mut metadata = DatasetMetadata::new(dataset_id, fields);
        metadata.datasource = dictionary.map(|d| d.datasource);

        tracing::info!(
            dataset_id,
            fields = metadata.fields.len(),
            visible = metadata.visible_fields().count(),
            "grounded dataset"
        );

        let metadata = Arc::new(metadata);
        if let Some(cache) = &self.cache {
            cache.insert(endpoint, Arc::clone(&metadata));
        }
        Ok(metadata)
    }

    /// Fill `sample_values` for every visible STRING field.
    ///
    /// Probes run with bounded concurrency; results keep catalog order.
    async fn sample(
        &self,
        dataset_id: &str,
        credential: &Credential,
        fields: &mut [FieldMetadata],
    ) -> GroundingResult<()> {
        if self.sample_values == 0 {
            return Ok(());
        }

        let targets: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.wants_samples())
            .map(|(i, _)| i)
            .collect();

        let captions: Vec<String> = targets
            .iter()
            .map(|&i| fields[i].field_caption.clone())
            .collect();

        let samples: Vec<Vec<Value>> = stream::iter(captions)
            .map(|caption| self.probe(dataset_id, credential, caption))
            .buffered(self.probe_concurrency)
            .try_collect()
            .await?;

        for (index, values) in targets.into_iter().zip(samples) {
            fields[index].sample_values = values;
        }
        Ok(())
    }

    async fn probe(
        &self,
        dataset_id: &str,
        credential: &Credential,
        caption: String,
    ) -> GroundingResult<Vec<Value>> {
        let result = self
            .service
            .query(dataset_id, &Query::probe(caption.as_str()), credential)
            .await
            .map_err(|source| GroundingError::Probe {
                field: caption.clone(),
                source,
            })?;

        let mut values: Vec<Value> = Vec::with_capacity(self.sample_values);
        for row in &result.rows {
            let value = row
                .get(&caption)
                .or_else(|| row.values().next())
                .cloned()
                .unwrap_or(Value::Null);
            if value.is_null() || values.contains(&value) {
                continue;
            }
            values.push(value);
            if values.len() == self.sample_values {
                break;
            }
        }

        tracing::debug!(field = %caption, samples = values.len(), "probed field");
        Ok(values)
    }
}

/// Drop internal identifiers and merge dictionary documentation.
fn to_field(record: FieldRecord, dictionary: Option<&DataDictionary>) -> FieldMetadata {
    let entry = dictionary.and_then(|d| d.field(&record.field_caption));
    FieldMetadata {
        hidden: entry.map(|e| e.is_hidden).unwrap_or(false),
        description: entry
            .and_then(|e| e.description.clone())
            .filter(|d| !d.trim().is_empty()),
        ..FieldMetadata::new(record.field_caption, record.data_type)
    }
}
