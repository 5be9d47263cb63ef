use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};
use sync_cell::models::{ReplayBatchRequest, SyncAction, SyncEntityType, SyncItem};
use sync_cell::services::replay::SyncReplayService;

fn service_for(server: &MockServer) -> SyncReplayService {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    SyncReplayService::new(&config)
}

fn appointment_item(client_temp_id: &str, patient_id: Uuid, provider_id: Uuid) -> SyncItem {
    let window_start = Utc::now() + Duration::hours(24);
    SyncItem {
        client_temp_id: client_temp_id.to_string(),
        entity_type: SyncEntityType::Appointment,
        action: SyncAction::Create,
        payload: json!({
            "patient_id": patient_id,
            "provider_id": provider_id,
            "service": "general_consultation",
            "location": "main-clinic",
            "slot_id": null,
            "window_start": window_start.to_rfc3339(),
            "duration_minutes": 30,
            "appointment_type": "online",
            "device_id": null,
            "client_temp_id": null
        }),
        recorded_at: Some(Utc::now() - Duration::hours(2)),
    }
}

#[tokio::test]
async fn test_already_synced_item_is_reported_as_replayed() {
    let mock_server = MockServer::start().await;
    let service = service_for(&mock_server);

    let patient_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let existing_id = Uuid::new_v4();

    let existing = MockSupabaseResponses::appointment_response(
        &existing_id.to_string(),
        &patient_id.to_string(),
        &provider_id.to_string(),
        Utc::now() + Duration::hours(24),
        "scheduled",
    );

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("client_request_id", "eq.device-1:tmp-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
        .mount(&mock_server)
        .await;

    // The original apply already happened; nothing new may be created.
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/sync_log"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = service
        .replay_batch(
            ReplayBatchRequest {
                device_id: "device-1".to_string(),
                items: vec![appointment_item("tmp-1", patient_id, provider_id)],
            },
            "test-token",
        )
        .await
        .unwrap();

    assert_eq!(response.applied, 0);
    assert_eq!(response.replayed, 1);
    assert_eq!(response.failed, 0);
    assert_eq!(response.outcomes[0].entity_id, Some(existing_id));
    assert!(response.outcomes[0].replayed);
    assert!(response.outcomes[0].success);
}

#[tokio::test]
async fn test_unseen_item_is_applied_and_logged() {
    let mock_server = MockServer::start().await;
    let service = service_for(&mock_server);

    let patient_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let created_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("client_request_id", "eq.device-1:tmp-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let mut created = MockSupabaseResponses::appointment_response(
        &created_id.to_string(),
        &patient_id.to_string(),
        &provider_id.to_string(),
        Utc::now() + Duration::hours(24),
        "scheduled",
    );
    created["client_request_id"] = json!("device-1:tmp-2");

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([created])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/sync_log"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = service
        .replay_batch(
            ReplayBatchRequest {
                device_id: "device-1".to_string(),
                items: vec![appointment_item("tmp-2", patient_id, provider_id)],
            },
            "test-token",
        )
        .await
        .unwrap();

    assert_eq!(response.applied, 1);
    assert_eq!(response.replayed, 0);
    assert_eq!(response.failed, 0);
    assert_eq!(response.outcomes[0].entity_id, Some(created_id));
    assert!(!response.outcomes[0].replayed);
}

#[tokio::test]
async fn test_invalid_payload_fails_the_item_not_the_batch() {
    let mock_server = MockServer::start().await;
    let service = service_for(&mock_server);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/sync_log"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = service
        .replay_batch(
            ReplayBatchRequest {
                device_id: "device-1".to_string(),
                items: vec![SyncItem {
                    client_temp_id: "tmp-3".to_string(),
                    entity_type: SyncEntityType::Appointment,
                    action: SyncAction::Create,
                    payload: json!({"patient_id": "not-a-uuid"}),
                    recorded_at: None,
                }],
            },
            "test-token",
        )
        .await
        .unwrap();

    assert_eq!(response.failed, 1);
    assert_eq!(response.applied, 0);
    assert!(!response.outcomes[0].success);
    assert!(response.outcomes[0].error.is_some());
}

#[tokio::test]
async fn test_empty_device_id_is_rejected() {
    let mock_server = MockServer::start().await;
    let service = service_for(&mock_server);

    let result = service
        .replay_batch(
            ReplayBatchRequest {
                device_id: "  ".to_string(),
                items: vec![],
            },
            "test-token",
        )
        .await;

    assert!(matches!(
        result,
        Err(sync_cell::models::SyncError::ValidationError(_))
    ));
}
