//! Wire types for the tabular query service.
//!
//! These mirror the JSON bodies of:
//! - `POST /api/{version}/vizql-data-service/read-metadata`
//! - `POST /api/{version}/vizql-data-service/query-datasource`
//! - `POST /api/metadata/graphql` (data dictionary)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::metadata::{DataType, DatasourceInfo};
use crate::schema::Query;

/// One result record: column name to scalar, in service order.
pub type Row = Map<String, Value>;

// ============================================================================
// Requests
// ============================================================================

/// Dataset address shared by every request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceRef<'a> {
    pub datasource_luid: &'a str,
}

/// Body of `read-metadata`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadMetadataRequest<'a> {
    pub datasource: DatasourceRef<'a>,
}

/// Body of `query-datasource`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryDatasourceRequest<'a> {
    pub datasource: DatasourceRef<'a>,
    pub query: &'a Query,
}

/// GraphQL request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct GraphqlRequest<'a> {
    pub query: &'a str,
    pub variables: Value,
}

/// Data dictionary lookup for one published datasource.
pub const DICTIONARY_QUERY: &str = r#"query datasourceDictionary($luid: String!) {
  publishedDatasources(filter: {luid: $luid}) {
    name
    description
    owner { name }
    fields { name isHidden description }
  }
}"#;

// ============================================================================
// Responses
// ============================================================================

/// A field as listed by `read-metadata`, internal identifiers included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord {
    /// Internal column name. Never shown to the compiler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,

    pub field_caption: String,

    #[serde(default = "unknown_type")]
    pub data_type: DataType,

    /// Internal table id. Never shown to the compiler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_table_id: Option<String>,
}

fn unknown_type() -> DataType {
    DataType::Unknown
}

impl FieldRecord {
    pub fn new(caption: impl Into<String>, data_type: DataType) -> Self {
        Self {
            field_name: None,
            field_caption: caption.into(),
            data_type,
            logical_table_id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadMetadataResponse {
    #[serde(default)]
    pub data: Vec<FieldRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryDatasourceResponse {
    #[serde(default)]
    pub data: Option<Vec<Row>>,

    #[serde(default)]
    pub error: Option<Value>,
}

/// Rows returned by a successful query. Zero rows is still a success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Column names of the first record, in order.
    pub fn columns(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Per-field entry of the data dictionary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryField {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub is_hidden: bool,
}

/// Datasource descriptor plus field-level documentation.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDictionary {
    pub datasource: DatasourceInfo,
    pub fields: Vec<DictionaryField>,
}

impl DataDictionary {
    pub fn field(&self, caption: &str) -> Option<&DictionaryField> {
        self.fields.iter().find(|f| f.name == caption)
    }
}

#[derive(Debug, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<DictionaryData>,

    #[serde(default)]
    pub errors: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryData {
    #[serde(default)]
    pub published_datasources: Vec<PublishedDatasource>,
}

#[derive(Debug, Deserialize)]
pub struct PublishedDatasource {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub owner: Option<Owner>,

    #[serde(default)]
    pub fields: Vec<DictionaryField>,
}

#[derive(Debug, Deserialize)]
pub struct Owner {
    pub name: String,
}

impl From<PublishedDatasource> for DataDictionary {
    fn from(ds: PublishedDatasource) -> Self {
        let description = ds.description.filter(|d| !d.trim().is_empty());
        Self {
            datasource: DatasourceInfo {
                name: ds.name,
                description,
                owner: ds.owner.map(|o| o.name),
            },
            fields: ds.fields,
        }
    }
}

/// Best human-readable message inside an error payload.
pub fn error_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}
