use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};
use sla_cell::models::{EscalationEvent, EscalationRule, SlaRecord, TriggerType};
use sla_cell::services::escalation::{evaluate, EscalationRuleEngine};

fn record(due_time: DateTime<Utc>, status: &str) -> SlaRecord {
    serde_json::from_value(MockSupabaseResponses::sla_record_response(
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        due_time,
        status,
    ))
    .unwrap()
}

fn rule(cooldown_hours: i64) -> EscalationRule {
    serde_json::from_value(MockSupabaseResponses::escalation_rule_response(
        &Uuid::new_v4().to_string(),
        cooldown_hours,
    ))
    .unwrap()
}

fn event_at(rule_id: Uuid, entity_id: Uuid, triggered_at: DateTime<Utc>) -> EscalationEvent {
    serde_json::from_value(json!({
        "id": Uuid::new_v4(),
        "rule_id": rule_id,
        "entity_type": "complaint",
        "entity_id": entity_id,
        "escalation_level": 1,
        "reason": "SLA breached",
        "triggered_at": triggered_at.to_rfc3339(),
        "actions_taken": ["notify_role"],
        "success": true,
        "error_message": null,
        "created_at": triggered_at.to_rfc3339()
    }))
    .unwrap()
}

// ==============================================================================
// PURE ELIGIBILITY GUARD TESTS
// ==============================================================================

#[test]
fn test_eligible_rule_passes() {
    let now = Utc::now();
    let breached = record(now - Duration::hours(1), "breached");
    assert!(evaluate(&breached, &rule(24), &[], now).is_ok());
}

#[test]
fn test_inactive_rule_is_skipped() {
    let now = Utc::now();
    let breached = record(now - Duration::hours(1), "breached");
    let mut inactive = rule(24);
    inactive.active = false;
    assert!(evaluate(&breached, &inactive, &[], now).is_err());
}

#[test]
fn test_empty_filters_match_everything() {
    let now = Utc::now();
    let mut breached = record(now - Duration::hours(1), "breached");
    breached.source = None;
    // The builder leaves all filter lists empty, so even a record with no
    // source is eligible.
    assert!(evaluate(&breached, &rule(24), &[], now).is_ok());
}

#[test]
fn test_filter_mismatches_are_rejected() {
    let now = Utc::now();
    let breached = record(now - Duration::hours(1), "breached");

    let mut by_category = rule(24);
    by_category.categories = vec![sla_cell::models::SlaCategory::Billing];
    assert!(evaluate(&breached, &by_category, &[], now).is_err());

    let mut by_urgency = rule(24);
    by_urgency.urgencies = vec![sla_cell::models::Urgency::Low];
    assert!(evaluate(&breached, &by_urgency, &[], now).is_err());

    let mut by_source = rule(24);
    by_source.sources = vec!["phone".to_string()];
    assert!(evaluate(&breached, &by_source, &[], now).is_err());

    // A record with no source never matches a non-empty source filter.
    let mut sourceless = record(now - Duration::hours(1), "breached");
    sourceless.source = None;
    assert!(evaluate(&sourceless, &by_source, &[], now).is_err());
}

#[test]
fn test_trigger_delay_must_elapse() {
    let now = Utc::now();
    // Record started one hour ago (builder sets start two hours before due).
    let breached = record(now + Duration::hours(1), "at_risk");

    let mut delayed = rule(24);
    delayed.trigger_delay_minutes = 180;
    assert!(evaluate(&breached, &delayed, &[], now).is_err());

    delayed.trigger_delay_minutes = 60;
    assert!(evaluate(&breached, &delayed, &[], now).is_ok());
}

#[test]
fn test_cooldown_blocks_refire_until_elapsed() {
    let now = Utc::now();
    let breached = record(now - Duration::hours(30), "breached");
    let daily = rule(24);

    let recent = event_at(daily.id, breached.entity_id, now - Duration::hours(1));
    assert!(evaluate(&breached, &daily, &[recent], now).is_err());

    let stale = event_at(daily.id, breached.entity_id, now - Duration::hours(25));
    assert!(evaluate(&breached, &daily, &[stale], now).is_ok());
}

#[test]
fn test_cooldown_reads_the_most_recent_event() {
    let now = Utc::now();
    let breached = record(now - Duration::hours(30), "breached");
    let daily = rule(24);

    let old = event_at(daily.id, breached.entity_id, now - Duration::hours(26));
    let recent = event_at(daily.id, breached.entity_id, now - Duration::hours(2));
    assert!(evaluate(&breached, &daily, &[old, recent], now).is_err());
}

#[test]
fn test_max_triggers_caps_refires() {
    let now = Utc::now();
    let breached = record(now - Duration::days(30), "breached");
    let mut capped = rule(1);
    capped.max_triggers = 2;

    let history = vec![
        event_at(capped.id, breached.entity_id, now - Duration::days(10)),
        event_at(capped.id, breached.entity_id, now - Duration::days(5)),
    ];
    assert!(evaluate(&breached, &capped, &history, now).is_err());
    assert!(evaluate(&breached, &capped, &history[..1], now).is_ok());
}

// ==============================================================================
// WIREMOCK-BACKED ENGINE TESTS
// ==============================================================================

fn event_body(
    event_id: Uuid,
    rule_id: Option<Uuid>,
    entity_id: Uuid,
    level: i32,
    success: bool,
) -> serde_json::Value {
    let now = Utc::now();
    json!({
        "id": event_id,
        "rule_id": rule_id,
        "entity_type": "complaint",
        "entity_id": entity_id,
        "escalation_level": level,
        "reason": "SLA breached",
        "triggered_at": now.to_rfc3339(),
        "actions_taken": ["notify_role", "change_priority"],
        "success": success,
        "error_message": if success { json!(null) } else { json!("change_priority: upstream error") },
        "created_at": now.to_rfc3339()
    })
}

#[tokio::test]
async fn test_breach_fires_rule_and_bumps_level() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let engine = EscalationRuleEngine::new(&config);

    let now = Utc::now();
    let breached = record(now - Duration::hours(1), "breached");
    let breach_rule = rule(24);
    let event_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/escalation_rules"))
        .and(query_param("trigger_type", "eq.sla_breach"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            serde_json::to_value(&breach_rule).unwrap()
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/escalation_events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    // Exactly one durable event for the fired rule.
    Mock::given(method("POST"))
        .and(path("/rest/v1/escalation_events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([event_body(
            event_id,
            Some(breach_rule.id),
            breached.entity_id,
            1,
            true
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // change_priority lands on the owning complaint row.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/complaints"))
        .and(query_param("id", format!("eq.{}", breached.entity_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/sla_records"))
        .and(query_param("id", format!("eq.{}", breached.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fired = engine
        .evaluate_and_execute(&breached, TriggerType::SlaBreach, "SLA breached", "test-token")
        .await
        .unwrap();

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].escalation_level, 1);
    assert!(fired[0].success);
}

#[tokio::test]
async fn test_rule_in_cooldown_does_not_fire() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let engine = EscalationRuleEngine::new(&config);

    let now = Utc::now();
    let breached = record(now - Duration::hours(3), "breached");
    let breach_rule = rule(24);

    Mock::given(method("GET"))
        .and(path("/rest/v1/escalation_rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            serde_json::to_value(&breach_rule).unwrap()
        ])))
        .mount(&mock_server)
        .await;

    // Fired two hours ago with a 24 hour cooldown: still cooling down.
    Mock::given(method("GET"))
        .and(path("/rest/v1/escalation_events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([event_body(
            Uuid::new_v4(),
            Some(breach_rule.id),
            breached.entity_id,
            1,
            true
        )])))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/escalation_events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let fired = engine
        .evaluate_and_execute(&breached, TriggerType::SlaBreach, "SLA breached", "test-token")
        .await
        .unwrap();

    assert!(fired.is_empty());
}

#[tokio::test]
async fn test_failed_action_is_stamped_on_the_event() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let engine = EscalationRuleEngine::new(&config);

    let now = Utc::now();
    let breached = record(now - Duration::hours(1), "breached");
    let breach_rule = rule(24);
    let event_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/escalation_events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([event_body(
            event_id,
            Some(breach_rule.id),
            breached.entity_id,
            1,
            true
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    // The entity patch fails, the event insert already happened.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/complaints"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "message": "upstream error"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/sla_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/escalation_events"))
        .and(query_param("id", format!("eq.{}", event_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([event_body(
            event_id,
            Some(breach_rule.id),
            breached.entity_id,
            1,
            false
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let event = engine
        .execute(&breached, &breach_rule, "SLA breached", 1, "test-token")
        .await
        .unwrap();

    assert!(!event.success);
    assert!(event.error_message.is_some());
}

#[tokio::test]
async fn test_manual_escalation_skips_the_guards() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::with_supabase_url(&mock_server.uri()).to_app_config();
    let engine = EscalationRuleEngine::new(&config);

    let now = Utc::now();
    // Still on track; a rule would not fire, a human can.
    let open = record(now + Duration::hours(4), "on_track");
    let event_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/escalation_events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([event_body(
            event_id,
            None,
            open.entity_id,
            2,
            true
        )])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/sla_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let event = engine
        .escalate_manual(&open, "supervisor review requested", Some(2), "test-token")
        .await
        .unwrap();

    assert_eq!(event.escalation_level, 2);
    assert!(event.rule_id.is_none());
}
