#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{answer, cannot_answer, ScriptedModel};
use serde_json::json;
use vizqa::compiler::{Candidate, CompileError, ExtractionError, Feedback, QueryCompiler};
use vizqa::config::ModelSettings;
use vizqa::llm::LlmError;
use vizqa::metadata::{DataType, DatasetMetadata, FieldMetadata};

fn superstore() -> DatasetMetadata {
    let mut region = FieldMetadata::new("Region", DataType::String);
    region.sample_values = vec![json!("Central"), json!("East"), json!("South"), json!("West")];
    DatasetMetadata::new(
        "superstore",
        vec![
            region,
            FieldMetadata::new("Sales", DataType::Real).with_description("Order revenue in USD"),
            FieldMetadata::new("Row ID", DataType::Integer).hidden(),
        ],
    )
}

#[tokio::test]
async fn test_compile_returns_query_candidate() {
    let model = Arc::new(ScriptedModel::new([answer(
        "Sum Sales per Region.",
        json!({"fields": [{"fieldCaption": "Region"}, {"fieldCaption": "Sales", "function": "SUM"}]}),
    )]));
    let compiler = QueryCompiler::new(model.clone());

    let candidate = compiler
        .compile("total sales by region", &superstore(), &[])
        .await
        .unwrap();

    assert_eq!(
        candidate,
        Candidate::Query {
            payload: json!({
                "fields": [{"fieldCaption": "Region"}, {"fieldCaption": "Sales", "function": "SUM"}]
            }),
            rationale: "Sum Sales per Region.".to_string(),
        }
    );

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].temperature, 0.0);
    assert!(!requests[0].json_mode);
}

#[tokio::test]
async fn test_grounding_document_lists_only_visible_fields() {
    let model = Arc::new(ScriptedModel::new([cannot_answer("no customer field")]));
    let compiler = QueryCompiler::new(model.clone());
    compiler
        .compile("who are our top customers", &superstore(), &[])
        .await
        .unwrap();

    let user = &model.requests()[0].user;
    assert!(user.contains("## Task\n\nwho are our top customers"));
    assert!(user.contains("\"fieldCaption\": \"Region\""));
    assert!(user.contains("Order revenue in USD"));
    assert!(user.contains("\"Central\""));
    assert!(!user.contains("Row ID"));
    assert!(user.contains("## Query grammar"));
    assert!(user.contains("## Worked examples"));
    assert!(user.contains("## Common mistakes"));
    assert!(!user.contains("## Previous attempts failed"));
}

#[tokio::test]
async fn test_cannot_answer_candidate() {
    let model = Arc::new(ScriptedModel::new([cannot_answer(
        "The dataset has no customer information.",
    )]));
    let compiler = QueryCompiler::new(model);

    let candidate = compiler
        .compile("who are our top customers", &superstore(), &[])
        .await
        .unwrap();

    assert_eq!(
        candidate,
        Candidate::CannotAnswer {
            reason: "The dataset has no customer information.".to_string(),
            rationale: "checked the data model".to_string(),
        }
    );
}

#[tokio::test]
async fn test_feedback_reaches_the_model() {
    let model = Arc::new(ScriptedModel::new([answer(
        "Use SUM(Sales) without the missing field.",
        json!({"fields": [{"fieldCaption": "Sales", "function": "SUM"}]}),
    )]));
    let compiler = QueryCompiler::new(model.clone());

    let feedback = vec![
        Feedback::new(
            "query.fields[0]: unknown field 'Revenue' (not in the data model)",
            Some(json!({"fields": [{"fieldCaption": "Revenue"}]})),
        ),
        Feedback::new(
            "query execution failed (HTTP 400): Field Segment not found",
            Some(json!({"fields": [{"fieldCaption": "Segment"}]})),
        ),
    ];
    compiler
        .compile("total sales", &superstore(), &feedback)
        .await
        .unwrap();

    let user = &model.requests()[0].user;
    let section = user
        .split("## Previous attempts failed")
        .nth(1)
        .expect("feedback section present");
    assert!(section.contains("Attempt 1:"));
    assert!(section.contains("unknown field 'Revenue'"));
    assert!(section.contains("Attempt 2:"));
    assert!(section.contains("Field Segment not found"));
    assert!(section.contains(r#"{"fields":[{"fieldCaption":"Segment"}]}"#));
    // The response contract stays last.
    assert!(section.contains("## Response format"));
}

#[tokio::test]
async fn test_settings_control_temperature_and_json_mode() {
    let model = Arc::new(ScriptedModel::new([answer(
        "",
        json!({"fields": [{"fieldCaption": "Region"}]}),
    )]));
    let settings = ModelSettings {
        temperature: 0.2,
        json_mode: true,
        ..ModelSettings::default()
    };
    let compiler = QueryCompiler::from_settings(model.clone(), &settings);
    compiler.compile("regions", &superstore(), &[]).await.unwrap();

    let request = &model.requests()[0];
    assert_eq!(request.temperature, 0.2);
    assert!(request.json_mode);
}

#[tokio::test]
async fn test_unparseable_output_is_an_extraction_error() {
    let model = Arc::new(ScriptedModel::new(["I think you want sales by region."]));
    let compiler = QueryCompiler::new(model);

    let err = compiler
        .compile("sales by region", &superstore(), &[])
        .await
        .unwrap_err();
    assert_eq!(err, CompileError::Extraction(ExtractionError::NoJsonObject));
}

#[tokio::test]
async fn test_model_failure_is_a_model_error() {
    let model = Arc::new(ScriptedModel::new(Vec::<String>::new()).then_error(LlmError::Http {
        status: 429,
        body: "rate limited".to_string(),
    }));
    let compiler = QueryCompiler::new(model);

    let err = compiler
        .compile("sales by region", &superstore(), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::Model(LlmError::Http { status: 429, .. })));
}
