//! Grounded dataset metadata handed to the compiler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a field, as reported by the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Integer,
    Real,
    String,
    Datetime,
    Boolean,
    Date,
    Spatial,
    #[serde(other)]
    Unknown,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Real)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Datetime)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DataType::Unknown)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::String => "STRING",
            DataType::Datetime => "DATETIME",
            DataType::Boolean => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Spatial => "SPATIAL",
            DataType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// One field of the grounded catalog.
///
/// Internal identifiers reported by the service (raw field name, logical
/// table id) have no place here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    pub field_caption: String,

    pub data_type: DataType,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Up to four distinct values, STRING fields only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<Value>,
}

impl FieldMetadata {
    pub fn new(caption: impl Into<String>, data_type: DataType) -> Self {
        Self {
            field_caption: caption.into(),
            data_type,
            hidden: false,
            description: None,
            sample_values: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Whether the grounder samples values for this field.
    pub fn wants_samples(&self) -> bool {
        !self.hidden && self.data_type == DataType::String
    }
}

/// Descriptor of the published datasource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasourceInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Field catalog, samples and descriptor for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    pub dataset_id: String,

    pub fields: Vec<FieldMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datasource: Option<DatasourceInfo>,
}

impl DatasetMetadata {
    pub fn new(dataset_id: impl Into<String>, fields: Vec<FieldMetadata>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            fields,
            datasource: None,
        }
    }

    pub fn with_datasource(mut self, datasource: DatasourceInfo) -> Self {
        self.datasource = Some(datasource);
        self
    }

    /// Look up a visible field by exact caption.
    pub fn field(&self, caption: &str) -> Option<&FieldMetadata> {
        self.visible_fields().find(|f| f.field_caption == caption)
    }

    pub fn has_field(&self, caption: &str) -> bool {
        self.field(caption).is_some()
    }

    /// Fields the compiler may reference.
    pub fn visible_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.fields.iter().filter(|f| !f.hidden)
    }

    /// Visible captions that differ from `caption` only by case or spacing.
    pub fn similar_captions(&self, caption: &str) -> Vec<&str> {
        let wanted = normalize_caption(caption);
        self.visible_fields()
            .filter(|f| normalize_caption(&f.field_caption) == wanted)
            .map(|f| f.field_caption.as_str())
            .collect()
    }

    /// The catalog as rendered into the grounding document.
    pub fn to_prompt_value(&self) -> Value {
        let fields: Vec<&FieldMetadata> = self.visible_fields().collect();
        let mut doc = serde_json::Map::new();
        if let Some(info) = &self.datasource {
            doc.insert(
                "datasource".to_string(),
                serde_json::to_value(info).unwrap_or(Value::Null),
            );
        }
        doc.insert(
            "fields".to_string(),
            serde_json::to_value(fields).unwrap_or(Value::Null),
        );
        Value::Object(doc)
    }
}

fn normalize_caption(caption: &str) -> String {
    caption
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
