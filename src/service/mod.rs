//! Tabular query service interface.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    TabularService                        │
//! │  - read_metadata()     field catalog (with internal ids) │
//! │  - query()             rows for one query                │
//! │  - data_dictionary()   descriptions, hidden flags, owner │
//! └──────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  HttpTabularService                      │
//! │        (JSON over HTTPS, credential in a header)         │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod client;
mod error;
pub mod protocol;

use async_trait::async_trait;

use crate::credential::Credential;
use crate::schema::Query;

pub use client::{query_request_body, HttpTabularService};
pub use error::{classify_status, ServiceError, ServiceResult};
pub use protocol::{DataDictionary, DictionaryField, FieldRecord, QueryResult, Row};

/// Remote service that lists dataset fields and answers queries.
#[async_trait]
pub trait TabularService: Send + Sync {
    /// Identifies the server, for cache keys and logs.
    fn endpoint(&self) -> &str;

    /// List the dataset's fields.
    async fn read_metadata(
        &self,
        dataset_id: &str,
        credential: &Credential,
    ) -> ServiceResult<Vec<FieldRecord>>;

    /// Run one query. Zero rows is a success.
    async fn query(
        &self,
        dataset_id: &str,
        query: &Query,
        credential: &Credential,
    ) -> ServiceResult<QueryResult>;

    /// Fetch the dataset's data dictionary, if the server publishes one.
    async fn data_dictionary(
        &self,
        _dataset_id: &str,
        _credential: &Credential,
    ) -> ServiceResult<Option<DataDictionary>> {
        Ok(None)
    }
}
