#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{FixtureService, DATASET, TOKEN};
use serde_json::json;
use vizqa::config::MetadataSettings;
use vizqa::credential::Credential;
use vizqa::metadata::{DataType, GroundingError, MetadataGrounder};
use vizqa::service::ServiceError;

fn settings() -> MetadataSettings {
    MetadataSettings {
        cache_enabled: false,
        ..MetadataSettings::default()
    }
}

#[tokio::test]
async fn test_ground_lists_fields_and_samples_strings() {
    let service = Arc::new(FixtureService::superstore());
    let grounder = MetadataGrounder::from_settings(service.clone(), &settings());

    let metadata = grounder
        .ground(DATASET, &Credential::new(TOKEN))
        .await
        .unwrap();

    let captions: Vec<&str> = metadata
        .fields
        .iter()
        .map(|f| f.field_caption.as_str())
        .collect();
    assert_eq!(
        captions,
        vec!["Region", "State", "Category", "Sales", "Profit", "Order Date"]
    );

    let region = metadata.field("Region").unwrap();
    assert_eq!(region.data_type, DataType::String);
    assert_eq!(
        region.sample_values,
        vec![json!("Central"), json!("East"), json!("South"), json!("West")]
    );

    // At most four distinct values per field.
    assert_eq!(metadata.field("State").unwrap().sample_values.len(), 4);

    // Only STRING fields are probed.
    assert!(metadata.field("Sales").unwrap().sample_values.is_empty());
    assert!(metadata.field("Order Date").unwrap().sample_values.is_empty());
    assert_eq!(service.queries().len(), 3);
}

#[tokio::test]
async fn test_internal_identifiers_never_reach_the_catalog() {
    let service = Arc::new(FixtureService::superstore());
    let grounder = MetadataGrounder::from_settings(service, &settings());

    let metadata = grounder
        .ground(DATASET, &Credential::new(TOKEN))
        .await
        .unwrap();

    let rendered = metadata.to_prompt_value().to_string();
    assert!(!rendered.contains("region_1"));
    assert!(!rendered.contains("orders_7"));
    assert!(!rendered.contains("logicalTableId"));
}

#[tokio::test]
async fn test_dictionary_adds_descriptions_and_hides_fields() {
    let service = Arc::new(FixtureService::superstore().with_dictionary());
    let grounder = MetadataGrounder::from_settings(
        service,
        &MetadataSettings {
            data_dictionary: true,
            ..settings()
        },
    );

    let metadata = grounder
        .ground(DATASET, &Credential::new(TOKEN))
        .await
        .unwrap();

    assert_eq!(
        metadata.field("Sales").unwrap().description.as_deref(),
        Some("Order revenue in USD")
    );
    assert!(metadata.field("Order Date").is_none());
    assert!(metadata.fields.iter().any(|f| f.field_caption == "Order Date" && f.hidden));

    let info = metadata.datasource.as_ref().unwrap();
    assert_eq!(info.name, "Superstore");
    assert_eq!(info.owner.as_deref(), Some("Analytics Team"));
}

#[tokio::test]
async fn test_cache_serves_repeat_requests() {
    let service = Arc::new(FixtureService::superstore());
    let grounder = MetadataGrounder::from_settings(
        service.clone(),
        &MetadataSettings {
            cache_enabled: true,
            ..settings()
        },
    );
    let credential = Credential::new(TOKEN);

    let first = grounder.ground(DATASET, &credential).await.unwrap();
    let second = grounder.ground(DATASET, &credential).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(service.metadata_calls(), 1);

    grounder.invalidate(DATASET);
    grounder.ground(DATASET, &credential).await.unwrap();
    assert_eq!(service.metadata_calls(), 2);
}

#[tokio::test]
async fn test_rejected_credential_is_an_auth_error() {
    let service = Arc::new(FixtureService::superstore());
    let grounder = MetadataGrounder::from_settings(service, &settings());

    let err = grounder
        .ground(DATASET, &Credential::new("stale"))
        .await
        .unwrap_err();

    assert!(err.is_auth());
    assert!(matches!(
        err,
        GroundingError::Metadata {
            source: ServiceError::Unauthorized { status: 401, .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_probe_failure_aborts_grounding() {
    let service = Arc::new(FixtureService::superstore().rejecting("State"));
    let grounder = MetadataGrounder::from_settings(service, &settings());

    let err = grounder
        .ground(DATASET, &Credential::new(TOKEN))
        .await
        .unwrap_err();

    match err {
        GroundingError::Probe { field, source } => {
            assert_eq!(field, "State");
            assert_eq!(source.status(), Some(400));
        }
        other => panic!("expected a probe failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sampling_can_be_disabled() {
    let service = Arc::new(FixtureService::superstore());
    let grounder = MetadataGrounder::from_settings(
        service.clone(),
        &MetadataSettings {
            sample_values: 0,
            ..settings()
        },
    );

    let metadata = grounder
        .ground(DATASET, &Credential::new(TOKEN))
        .await
        .unwrap();

    assert!(metadata.fields.iter().all(|f| f.sample_values.is_empty()));
    assert!(service.queries().is_empty());
}
