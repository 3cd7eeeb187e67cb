//! Shared fakes for integration tests: an in-memory tabular service, a
//! scripted language model and a counting credential provider.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use vizqa::credential::{AuthError, Credential, CredentialProvider};
use vizqa::llm::{CompletionRequest, LanguageModel, LlmError, LlmResult};
use vizqa::metadata::{DataType, DatasourceInfo};
use vizqa::schema::{FieldSpec, FilterSpec, Function, Query, SortDirection};
use vizqa::service::{
    DataDictionary, DictionaryField, FieldRecord, QueryResult, Row, ServiceError, ServiceResult,
    TabularService,
};

pub const DATASET: &str = "superstore";
pub const TOKEN: &str = "token-1";

// ============================================================================
// Fixture service
// ============================================================================

/// Evaluates queries over a handful of in-memory rows.
///
/// Supports grouping by plain fields, SUM/AVG/MIN/MAX/COUNT/COUNTD, SET
/// filters (with `exclude`) and per-field sorting.
pub struct FixtureService {
    fields: Vec<FieldRecord>,
    rows: Vec<Row>,
    dictionary: Option<DataDictionary>,
    /// Captions the service claims not to know, whatever the catalog says.
    rejected: Vec<String>,
    valid_token: Mutex<String>,
    metadata_calls: AtomicUsize,
    query_log: Mutex<Vec<Query>>,
}

impl FixtureService {
    pub fn superstore() -> Self {
        let fields = vec![
            FieldRecord {
                field_name: Some("region_1".to_string()),
                logical_table_id: Some("orders_7".to_string()),
                ..FieldRecord::new("Region", DataType::String)
            },
            FieldRecord::new("State", DataType::String),
            FieldRecord::new("Category", DataType::String),
            FieldRecord::new("Sales", DataType::Real),
            FieldRecord::new("Profit", DataType::Real),
            FieldRecord::new("Order Date", DataType::Date),
        ];

        let data = [
            ("East", "New York", "Technology", 500.0, 120.0, "2024-01-15"),
            ("East", "New York", "Furniture", 300.0, 30.0, "2024-02-03"),
            ("East", "Vermont", "Technology", 100.0, 10.0, "2024-03-09"),
            ("West", "California", "Technology", 700.0, 210.0, "2024-01-22"),
            ("West", "California", "Office Supplies", 200.0, 40.0, "2024-04-18"),
            ("West", "Oregon", "Furniture", 150.0, -20.0, "2024-05-01"),
            ("Central", "Texas", "Office Supplies", 250.0, 25.0, "2024-06-30"),
            ("South", "Florida", "Technology", 400.0, 80.0, "2024-07-04"),
        ];

        let rows = data
            .iter()
            .map(|(region, state, category, sales, profit, date)| {
                row(json!({
                    "Region": region,
                    "State": state,
                    "Category": category,
                    "Sales": sales,
                    "Profit": profit,
                    "Order Date": date,
                }))
            })
            .collect();

        Self {
            fields,
            rows,
            dictionary: None,
            rejected: Vec::new(),
            valid_token: Mutex::new(TOKEN.to_string()),
            metadata_calls: AtomicUsize::new(0),
            query_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_field(mut self, record: FieldRecord) -> Self {
        self.fields.push(record);
        self
    }

    pub fn with_dictionary(mut self) -> Self {
        self.dictionary = Some(DataDictionary {
            datasource: DatasourceInfo {
                name: "Superstore".to_string(),
                description: Some("Orders for a retail chain".to_string()),
                owner: Some("Analytics Team".to_string()),
            },
            fields: vec![
                DictionaryField {
                    name: "Sales".to_string(),
                    description: Some("Order revenue in USD".to_string()),
                    is_hidden: false,
                },
                DictionaryField {
                    name: "Order Date".to_string(),
                    description: None,
                    is_hidden: true,
                },
            ],
        });
        self
    }

    /// Reject any query that references `caption`.
    pub fn rejecting(mut self, caption: &str) -> Self {
        self.rejected.push(caption.to_string());
        self
    }

    /// Start accepting only `token`, as if the old one expired.
    pub fn rotate_token(&self, token: &str) {
        if let Ok(mut valid) = self.valid_token.lock() {
            *valid = token.to_string();
        }
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    /// Every query received, probes included.
    pub fn queries(&self) -> Vec<Query> {
        self.query_log.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// Received queries that project more than one field or any filter.
    pub fn answer_queries(&self) -> Vec<Query> {
        self.queries()
            .into_iter()
            .filter(|q| {
                q.fields.len() > 1 || !q.filters.is_empty() || q.fields[0].function.is_some()
            })
            .collect()
    }

    fn authorize(&self, credential: &Credential) -> ServiceResult<()> {
        let valid = self
            .valid_token
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default();
        if credential.token() == valid {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized {
                status: 401,
                message: "Signin token expired".to_string(),
            })
        }
    }

    fn evaluate(&self, query: &Query) -> ServiceResult<QueryResult> {
        let referenced = query
            .fields
            .iter()
            .map(|f| f.field_caption.clone())
            .chain(query.filters.iter().filter_map(|f| f.field().field_caption.clone()));
        for caption in referenced {
            if self.rejected.contains(&caption) {
                return Err(ServiceError::Rejected {
                    status: 400,
                    message: format!("Field {} not found in datasource", caption),
                });
            }
        }

        let filtered: Vec<&Row> = self
            .rows
            .iter()
            .filter(|r| query.filters.iter().all(|f| keeps(f, r)))
            .collect();

        let dimensions: Vec<&FieldSpec> =
            query.fields.iter().filter(|f| f.function.is_none()).collect();

        let mut groups: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
        for r in filtered {
            let key: Vec<Value> = dimensions
                .iter()
                .map(|d| r.get(&d.field_caption).cloned().unwrap_or(Value::Null))
                .collect();
            groups.entry(Value::Array(key).to_string()).or_default().push(r);
        }

        let mut out: Vec<Row> = groups
            .values()
            .map(|members| {
                let mut result = Map::new();
                for field in &query.fields {
                    let value = match field.function {
                        None => members[0]
                            .get(&field.field_caption)
                            .cloned()
                            .unwrap_or(Value::Null),
                        Some(function) => aggregate(function, &field.field_caption, members),
                    };
                    result.insert(field.output_name().to_string(), value);
                }
                result
            })
            .collect();

        let mut sorted: Vec<&FieldSpec> =
            query.fields.iter().filter(|f| f.sort_priority.is_some()).collect();
        sorted.sort_by_key(|f| f.sort_priority);
        out.sort_by(|a, b| {
            for field in &sorted {
                let name = field.output_name();
                let ordering = compare(a.get(name), b.get(name));
                let ordering = match field.sort_direction {
                    Some(SortDirection::Desc) => ordering.reverse(),
                    _ => ordering,
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });

        Ok(QueryResult::new(out))
    }
}

#[async_trait]
impl TabularService for FixtureService {
    fn endpoint(&self) -> &str {
        "fixture://superstore"
    }

    async fn read_metadata(
        &self,
        _dataset_id: &str,
        credential: &Credential,
    ) -> ServiceResult<Vec<FieldRecord>> {
        self.authorize(credential)?;
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fields.clone())
    }

    async fn query(
        &self,
        _dataset_id: &str,
        query: &Query,
        credential: &Credential,
    ) -> ServiceResult<QueryResult> {
        self.authorize(credential)?;
        if let Ok(mut log) = self.query_log.lock() {
            log.push(query.clone());
        }
        self.evaluate(query)
    }

    async fn data_dictionary(
        &self,
        _dataset_id: &str,
        credential: &Credential,
    ) -> ServiceResult<Option<DataDictionary>> {
        self.authorize(credential)?;
        Ok(self.dictionary.clone())
    }
}

fn keeps(filter: &FilterSpec, r: &Row) -> bool {
    match filter {
        FilterSpec::Set(set) => {
            let caption = set.field.field_caption.as_deref().unwrap_or_default();
            let value = r.get(caption).cloned().unwrap_or(Value::Null);
            set.values.contains(&value) != set.exclude
        }
        _ => true,
    }
}

fn aggregate(function: Function, caption: &str, members: &[&Row]) -> Value {
    let values: Vec<&Value> = members.iter().filter_map(|r| r.get(caption)).collect();
    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    match function {
        Function::Sum => json!(numbers.iter().sum::<f64>()),
        Function::Avg => json!(numbers.iter().sum::<f64>() / numbers.len().max(1) as f64),
        Function::Min => json!(numbers.iter().cloned().fold(f64::INFINITY, f64::min)),
        Function::Max => json!(numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max)),
        Function::Count => json!(values.len()),
        Function::Countd => {
            let mut distinct: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            distinct.sort();
            distinct.dedup();
            json!(distinct.len())
        }
        _ => Value::Null,
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    match (a.and_then(Value::as_f64), b.and_then(Value::as_f64)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.map(|v| v.to_string()).cmp(&b.map(|v| v.to_string())),
    }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row fixture must be an object, got {}", other),
    }
}

// ============================================================================
// Scripted model
// ============================================================================

/// Replays canned completions and records every request.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<LlmResult<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a failing call.
    pub fn then_error(self, error: LlmError) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Err(error));
        }
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.requests().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> LlmResult<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}

/// A model response carrying `query` in the envelope format.
pub fn answer(rationale: &str, query: Value) -> String {
    json!({ "rationale": rationale, "query": query }).to_string()
}

pub fn cannot_answer(reason: &str) -> String {
    json!({ "rationale": "checked the data model", "cannot_answer": reason }).to_string()
}

// ============================================================================
// Credentials
// ============================================================================

/// Hands out `token-2`, `token-3`, ... and counts refreshes.
pub struct CountingProvider {
    refreshes: AtomicUsize,
    fail: bool,
}

impl CountingProvider {
    pub fn new() -> Self {
        Self {
            refreshes: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            refreshes: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn refresh(&self, _stale: &Credential) -> Result<Credential, AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 2;
        if self.fail {
            return Err(AuthError::RefreshFailed("identity provider unavailable".to_string()));
        }
        Ok(Credential::new(format!("token-{}", n)))
    }
}
