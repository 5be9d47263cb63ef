use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::models::{
    AppointmentStatus, AppointmentType, BookAppointmentRequest, SchedulingError,
    TransitionRequest,
};
use scheduling_cell::services::booking::AppointmentBookingService;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn service_for(server: &MockServer) -> AppointmentBookingService {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    AppointmentBookingService::new(&config)
}

fn online_request(patient_id: Uuid, provider_id: Uuid) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id,
        provider_id,
        service: Some("general_consultation".to_string()),
        location: Some("main-clinic".to_string()),
        slot_id: None,
        window_start: Some(Utc::now() + Duration::hours(24)),
        duration_minutes: Some(30),
        appointment_type: AppointmentType::Online,
        device_id: None,
        client_temp_id: None,
    }
}

#[tokio::test]
async fn test_booking_against_a_slot_consumes_one_unit() {
    let mock_server = MockServer::start().await;
    let service = service_for(&mock_server);

    let patient_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();
    let start = Utc::now() + Duration::hours(24);

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                3,
                1,
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("reserved_count", "eq.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                3,
                2,
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut created = MockSupabaseResponses::appointment_response(
        &appointment_id.to_string(),
        &patient_id.to_string(),
        &provider_id.to_string(),
        start,
        "scheduled",
    );
    created["slot_id"] = json!(slot_id);

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([created])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut request = online_request(patient_id, provider_id);
    request.slot_id = Some(slot_id);
    request.window_start = None;

    let appointment = service.book_appointment(request, "test-token").await.unwrap();

    assert_eq!(appointment.id, appointment_id);
    assert_eq!(appointment.slot_id, Some(slot_id));
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
}

#[tokio::test]
async fn test_replayed_booking_returns_the_original_appointment() {
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
        .and(query_param("client_request_id", "eq.kiosk-7:tmp-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut request = online_request(patient_id, provider_id);
    request.device_id = Some("kiosk-7".to_string());
    request.client_temp_id = Some("tmp-42".to_string());

    let appointment = service.book_appointment(request, "test-token").await.unwrap();

    assert_eq!(appointment.id, existing_id);
}

#[tokio::test]
async fn test_booking_in_the_past_is_rejected_before_any_write() {
    let mock_server = MockServer::start().await;
    let service = service_for(&mock_server);

    let mut request = online_request(Uuid::new_v4(), Uuid::new_v4());
    request.window_start = Some(Utc::now() - Duration::hours(1));

    let result = service.book_appointment(request, "test-token").await;

    assert!(matches!(result, Err(SchedulingError::ValidationError(_))));
    // Nothing was mocked: any request would have failed the test through
    // the connection error instead of the validation error above.
}

#[tokio::test]
async fn test_walk_in_booking_without_location_is_rejected() {
    let mock_server = MockServer::start().await;
    let service = service_for(&mock_server);

    // Walk-ins join a location-scoped queue, so the location is mandatory.
    let mut request = online_request(Uuid::new_v4(), Uuid::new_v4());
    request.appointment_type = AppointmentType::WalkIn;
    request.location = None;

    let result = service.book_appointment(request, "test-token").await;

    assert!(matches!(result, Err(SchedulingError::ValidationError(_))));
}

#[tokio::test]
async fn test_completing_an_unstarted_appointment_is_rejected() {
    let mock_server = MockServer::start().await;
    let service = service_for(&mock_server);

    let appointment_id = Uuid::new_v4();
    let body = MockSupabaseResponses::appointment_response(
        &appointment_id.to_string(),
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        Utc::now() + Duration::hours(2),
        "scheduled",
    );

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([body])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let result = service
        .transition_appointment(
            appointment_id,
            TransitionRequest {
                status: AppointmentStatus::Completed,
                reason: None,
            },
            "staff-1",
            "test-token",
        )
        .await;

    assert!(matches!(
        result,
        Err(SchedulingError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_cancelling_releases_the_reserved_slot() {
    let mock_server = MockServer::start().await;
    let service = service_for(&mock_server);

    let appointment_id = Uuid::new_v4();
    let slot_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let start = Utc::now() + Duration::hours(24);

    let mut scheduled = MockSupabaseResponses::appointment_response(
        &appointment_id.to_string(),
        &Uuid::new_v4().to_string(),
        &provider_id.to_string(),
        start,
        "scheduled",
    );
    scheduled["slot_id"] = json!(slot_id);

    let mut cancelled = scheduled.clone();
    cancelled["status"] = json!("cancelled");

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([scheduled])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([cancelled])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                3,
                2,
            )
        ])))
        .mount(&mock_server)
        .await;

    // One unit handed back on cancellation.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("reserved_count", "eq.2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                3,
                1,
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // No pending reminder to cancel.
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/reminder_jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let updated = service
        .transition_appointment(
            appointment_id,
            TransitionRequest {
                status: AppointmentStatus::Cancelled,
                reason: Some("patient request".to_string()),
            },
            "staff-1",
            "test-token",
        )
        .await
        .unwrap();

    assert_eq!(updated.status, AppointmentStatus::Cancelled);
}
