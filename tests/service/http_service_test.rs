use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use vizqa::config::Settings;
use vizqa::credential::Credential;
use vizqa::llm::{CompletionRequest, LanguageModel, LlmError, OpenAiChatModel};
use vizqa::metadata::DataType;
use vizqa::schema::{FieldSpec, Function, Query};
use vizqa::service::{query_request_body, HttpTabularService, ServiceError, TabularService};
use vizqa::DatasourceQa;

const TOKEN: &str = "good-token";
const API_KEY: &str = "sk-test";

/// Bodies received, keyed by route.
#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorded {
    fn push(&self, route: &str, body: Value) {
        self.requests.lock().unwrap().push((route.to_string(), body));
    }

    fn bodies(&self, route: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| r == route)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("X-Tableau-Auth")
        .and_then(|v| v.to_str().ok())
        == Some(TOKEN)
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"errorCode": "401002", "message": "Signin token expired"})),
    )
}

async fn read_metadata(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.push("read-metadata", body);
    if !authorized(&headers) {
        return unauthorized();
    }
    (
        StatusCode::OK,
        Json(json!({
            "data": [
                {"fieldName": "Region", "fieldCaption": "Region", "dataType": "STRING", "logicalTableId": "Orders_1"},
                {"fieldName": "Sales", "fieldCaption": "Sales", "dataType": "REAL", "logicalTableId": "Orders_1"},
                {"fieldName": "Geo", "fieldCaption": "Location", "dataType": "GEOGRAPHY"}
            ]
        })),
    )
}

async fn query_datasource(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.push("query-datasource", body.clone());
    if !authorized(&headers) {
        return unauthorized();
    }

    let captions: Vec<&str> = body["query"]["fields"]
        .as_array()
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f["fieldCaption"].as_str())
                .collect()
        })
        .unwrap_or_default();

    if captions.contains(&"Bogus") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"errorCode": "400803", "message": "Unknown Field: Bogus"})),
        );
    }
    if captions.contains(&"Broken") {
        return (
            StatusCode::OK,
            Json(json!({"error": {"message": "Calculation could not be evaluated"}})),
        );
    }
    if captions == ["Region"] {
        return (
            StatusCode::OK,
            Json(json!({"data": [{"Region": "East"}, {"Region": "West"}]})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "data": [
                {"Region": "West", "Sales": 1050.0},
                {"Region": "East", "Sales": 900.0}
            ]
        })),
    )
}

async fn graphql(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.push("graphql", body);
    if !authorized(&headers) {
        return unauthorized();
    }
    (
        StatusCode::OK,
        Json(json!({
            "data": {
                "publishedDatasources": [{
                    "name": "Superstore",
                    "description": "",
                    "owner": {"name": "Analytics Team"},
                    "fields": [
                        {"name": "Sales", "description": "Order revenue in USD", "isHidden": false},
                        {"name": "Location", "description": null, "isHidden": true}
                    ]
                }]
            }
        })),
    )
}

async fn chat_completions(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.push("chat", body);
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if bearer != format!("Bearer {}", API_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "invalid api key"}})),
        );
    }

    let content = json!({
        "rationale": "Sum Sales for each Region.",
        "query": {
            "fields": [
                {"fieldCaption": "Region"},
                {"fieldCaption": "Sales", "function": "SUM", "sortDirection": "DESC", "sortPriority": 1}
            ]
        }
    })
    .to_string();
    (
        StatusCode::OK,
        Json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })),
    )
}

async fn serve() -> (SocketAddr, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/v1/vizql-data-service/read-metadata", post(read_metadata))
        .route("/api/v1/vizql-data-service/query-datasource", post(query_datasource))
        .route("/api/metadata/graphql", post(graphql))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, recorded)
}

fn service(addr: SocketAddr) -> HttpTabularService {
    HttpTabularService::new(format!("http://{}", addr)).unwrap()
}

#[tokio::test]
async fn test_read_metadata() {
    let (addr, recorded) = serve().await;

    let fields = service(addr)
        .read_metadata("ds-luid", &Credential::new(TOKEN))
        .await
        .unwrap();

    assert_eq!(fields.len(), 3);
    assert_eq!(fields[0].field_caption, "Region");
    assert_eq!(fields[1].data_type, DataType::Real);
    assert_eq!(fields[2].data_type, DataType::Unknown);
    assert_eq!(
        recorded.bodies("read-metadata"),
        vec![json!({"datasource": {"datasourceLuid": "ds-luid"}})]
    );
}

#[tokio::test]
async fn test_query_round_trip() {
    let (addr, recorded) = serve().await;
    let query = Query::new(vec![
        FieldSpec::new("Region"),
        FieldSpec::new("Sales").with_function(Function::Sum),
    ]);

    let result = service(addr)
        .query("ds-luid", &query, &Credential::new(TOKEN))
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result.columns(), vec!["Region", "Sales"]);
    assert_eq!(
        recorded.bodies("query-datasource")[0],
        query_request_body("ds-luid", &query)
    );
}

#[tokio::test]
async fn test_unauthorized_keeps_raw_body() {
    let (addr, _) = serve().await;

    let err = service(addr)
        .read_metadata("ds-luid", &Credential::new("expired"))
        .await
        .unwrap_err();

    assert!(err.is_auth());
    match err {
        ServiceError::Unauthorized { status, message } => {
            assert_eq!(status, 401);
            assert!(message.contains("Signin token expired"));
        }
        other => panic!("expected Unauthorized, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_query_keeps_raw_body() {
    let (addr, _) = serve().await;

    let err = service(addr)
        .query(
            "ds-luid",
            &Query::probe("Bogus"),
            &Credential::new(TOKEN),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert!(!err.is_auth());
    assert!(err.to_string().contains("Unknown Field: Bogus"));
}

#[tokio::test]
async fn test_error_body_with_success_status() {
    let (addr, _) = serve().await;

    let err = service(addr)
        .query(
            "ds-luid",
            &Query::probe("Broken"),
            &Credential::new(TOKEN),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ServiceError::Reported("Calculation could not be evaluated".to_string())
    );
}

#[tokio::test]
async fn test_data_dictionary() {
    let (addr, recorded) = serve().await;

    let dictionary = service(addr)
        .data_dictionary("ds-luid", &Credential::new(TOKEN))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(dictionary.datasource.name, "Superstore");
    assert_eq!(dictionary.datasource.description, None);
    assert_eq!(dictionary.datasource.owner.as_deref(), Some("Analytics Team"));
    assert!(dictionary.field("Location").unwrap().is_hidden);

    let body = &recorded.bodies("graphql")[0];
    assert_eq!(body["variables"], json!({"luid": "ds-luid"}));
    assert!(body["query"].as_str().unwrap().contains("publishedDatasources"));
}

#[tokio::test]
async fn test_chat_model_sends_json_mode() {
    let (addr, recorded) = serve().await;
    let model = OpenAiChatModel::new(
        format!("http://{}/v1", addr),
        Some(API_KEY.to_string()),
        "gpt-4o-mini",
        std::time::Duration::from_secs(5),
    )
    .unwrap();

    let text = model
        .complete(&CompletionRequest {
            system: "system".to_string(),
            user: "user".to_string(),
            temperature: 0.0,
            json_mode: true,
        })
        .await
        .unwrap();
    assert!(text.contains("Sum Sales for each Region."));

    let body = &recorded.bodies("chat")[0];
    assert_eq!(body["model"], json!("gpt-4o-mini"));
    assert_eq!(body["temperature"], json!(0.0));
    assert_eq!(body["response_format"], json!({"type": "json_object"}));
    assert_eq!(body["messages"][0]["role"], json!("system"));
    assert_eq!(body["messages"][1]["content"], json!("user"));
}

#[tokio::test]
async fn test_chat_model_http_error() {
    let (addr, _) = serve().await;
    let model = OpenAiChatModel::new(
        format!("http://{}/v1", addr),
        Some("wrong".to_string()),
        "gpt-4o-mini",
        std::time::Duration::from_secs(5),
    )
    .unwrap();

    let err = model
        .complete(&CompletionRequest {
            system: String::new(),
            user: String::new(),
            temperature: 0.0,
            json_mode: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Http { status: 401, .. }));
}

#[tokio::test]
async fn test_end_to_end_over_http() {
    let (addr, recorded) = serve().await;
    let settings = Settings::from_toml(&format!(
        r#"
[service]
base_url = "http://{addr}"

[model]
base_url = "http://{addr}/v1"
api_key = "{API_KEY}"

[metadata]
data_dictionary = true
"#
    ))
    .unwrap();

    let qa = DatasourceQa::from_settings(&settings).unwrap();
    let answer = qa
        .ask("total sales by region", "ds-luid", Credential::new(TOKEN))
        .await
        .unwrap();

    assert_eq!(answer.attempts, 1);
    assert_eq!(answer.rationale, "Sum Sales for each Region.");
    assert_eq!(
        answer.formatted_table,
        "| Region | Sales |\n| --- | --- |\n| West | 1050.0 |\n| East | 900.0 |"
    );
    assert_eq!(answer.datasource.unwrap().name, "Superstore");

    // One probe for the single visible STRING field, then the answer query.
    assert_eq!(recorded.bodies("query-datasource").len(), 2);

    let chat = &recorded.bodies("chat")[0];
    let prompt = chat["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains("Order revenue in USD"));
    assert!(prompt.contains("\"East\""));
    assert!(!prompt.contains("Location"));
    assert!(!prompt.contains("Orders_1"));
}
