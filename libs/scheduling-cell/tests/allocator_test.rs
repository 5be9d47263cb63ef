use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::models::SchedulingError;
use scheduling_cell::services::allocator::SlotAllocator;
use shared_database::supabase::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

fn allocator_for(mock_server: &MockServer) -> SlotAllocator {
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    SlotAllocator::with_client(Arc::new(SupabaseClient::new(&config)), 48)
}

#[tokio::test]
async fn test_reserve_increments_reserved_count() {
    let mock_server = MockServer::start().await;
    let allocator = allocator_for(&mock_server);

    let slot_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let start = Utc::now() + Duration::hours(2);

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                5,
                2
            )
        ])))
        .mount(&mock_server)
        .await;

    // The conditional update filters on the count that was just read.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .and(query_param("reserved_count", "eq.2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                5,
                3
            )
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = allocator.reserve(slot_id, 1, "test-token").await.unwrap();
    assert_eq!(result.reserved_count, 3);
    assert_eq!(result.slot.free_capacity(), 2);
}

#[tokio::test]
async fn test_full_slot_returns_capacity_exceeded_with_alternatives() {
    let mock_server = MockServer::start().await;
    let allocator = allocator_for(&mock_server);

    let slot_id = Uuid::new_v4();
    let alt_slot_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let start = Utc::now() + Duration::hours(2);

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                1,
                1
            )
        ])))
        .mount(&mock_server)
        .await;

    // Alternatives scan for the same provider and service inside the
    // lookahead window.
    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("provider_id", format!("eq.{}", provider_id)))
        .and(query_param("service", "eq.general_consultation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &alt_slot_id.to_string(),
                &provider_id.to_string(),
                start + Duration::hours(1),
                3,
                0
            )
        ])))
        .mount(&mock_server)
        .await;

    let result = allocator.reserve(slot_id, 1, "test-token").await;

    assert_matches!(result, Err(SchedulingError::CapacityExceeded { ref alternatives }) => {
        assert_eq!(alternatives.len(), 1);
        assert_eq!(alternatives[0].slot_id, alt_slot_id);
        assert_eq!(alternatives[0].free_capacity, 3);
    });
}

#[tokio::test]
async fn test_reserve_refuses_slot_that_already_started() {
    let mock_server = MockServer::start().await;
    let allocator = allocator_for(&mock_server);

    let slot_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let start = Utc::now() - Duration::hours(1);

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                5,
                0
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let result = allocator.reserve(slot_id, 1, "test-token").await;
    assert_matches!(result, Err(SchedulingError::SlotUnavailable));
}

#[tokio::test]
async fn test_lost_update_race_surfaces_stale_read_after_retry() {
    let mock_server = MockServer::start().await;
    let allocator = allocator_for(&mock_server);

    let slot_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let start = Utc::now() + Duration::hours(2);

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                5,
                0
            )
        ])))
        .mount(&mock_server)
        .await;

    // Empty representation means the filtered update matched zero rows,
    // which is how a lost race looks to the caller.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let result = allocator.reserve(slot_id, 1, "test-token").await;
    assert_matches!(result, Err(SchedulingError::StaleRead));
}

#[tokio::test]
async fn test_concurrent_reserves_on_capacity_one_slot_admit_exactly_one() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let supabase = Arc::new(SupabaseClient::new(&config));
    let allocator = Arc::new(SlotAllocator::with_client(supabase, 48));

    let slot_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let start = Utc::now() + Duration::hours(2);

    // Both callers first observe the slot empty; later reads see it taken.
    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                1,
                0
            )
        ])))
        .up_to_n_times(2)
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
                1,
                1
            )
        ])))
        .mount(&mock_server)
        .await;

    // The conditional update can only succeed once.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("reserved_count", "eq.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                1,
                1
            )
        ])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    // No alternatives available for the loser.
    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("provider_id", format!("eq.{}", provider_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let a = {
        let allocator = Arc::clone(&allocator);
        tokio::spawn(async move { allocator.reserve(slot_id, 1, "test-token").await })
    };
    let b = {
        let allocator = Arc::clone(&allocator);
        tokio::spawn(async move { allocator.reserve(slot_id, 1, "test-token").await })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one concurrent reserve may win");

    let loser = if a.is_ok() { b } else { a };
    assert_matches!(
        loser,
        Err(SchedulingError::CapacityExceeded { .. }) | Err(SchedulingError::StaleRead)
    );
}

#[tokio::test]
async fn test_release_is_a_noop_at_zero() {
    let mock_server = MockServer::start().await;
    let allocator = allocator_for(&mock_server);

    let slot_id = Uuid::new_v4();
    let provider_id = Uuid::new_v4();
    let start = Utc::now() + Duration::hours(2);

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_slots"))
        .and(query_param("id", format!("eq.{}", slot_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::slot_response(
                &slot_id.to_string(),
                &provider_id.to_string(),
                start,
                5,
                0
            )
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    allocator.release(slot_id, 1, "test-token").await.unwrap();
}
