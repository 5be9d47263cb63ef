use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            notification_webhook_url: String::new(),
            sweep_interval_seconds: 60,
            escalation_interval_seconds: 120,
            reminder_interval_seconds: 300,
            queue_recompute_interval_seconds: 60,
            sla_risk_window_hours: 2,
            slot_lookahead_hours: 48,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn staff(email: &str) -> Self {
        Self::new(email, "staff")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST row bodies for wiremock-backed tests.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn slot_response(
        slot_id: &str,
        provider_id: &str,
        start: DateTime<Utc>,
        capacity: i32,
        reserved_count: i32,
    ) -> serde_json::Value {
        json!({
            "id": slot_id,
            "provider_id": provider_id,
            "service": "general_consultation",
            "location": "main-clinic",
            "start_time": start.to_rfc3339(),
            "end_time": (start + Duration::minutes(30)).to_rfc3339(),
            "capacity": capacity,
            "reserved_count": reserved_count,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn appointment_response(
        appointment_id: &str,
        patient_id: &str,
        provider_id: &str,
        start: DateTime<Utc>,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "appointment_number": "A-20240101-0001",
            "patient_id": patient_id,
            "provider_id": provider_id,
            "service": "general_consultation",
            "location": "main-clinic",
            "slot_id": null,
            "appointment_type": "online",
            "status": status,
            "scheduled_start_time": start.to_rfc3339(),
            "scheduled_end_time": (start + Duration::minutes(30)).to_rfc3339(),
            "queue_token_id": null,
            "client_request_id": null,
            "checked_in_at": null,
            "last_transition_by": null,
            "last_transition_at": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn queue_token_response(
        token_id: &str,
        patient_id: &str,
        provider_id: &str,
        token_number: i64,
        priority_score: f64,
        issued_at: DateTime<Utc>,
    ) -> serde_json::Value {
        json!({
            "id": token_id,
            "token_number": token_number,
            "patient_id": patient_id,
            "provider_id": provider_id,
            "service": "general_consultation",
            "location": "main-clinic",
            "appointment_id": null,
            "status": "waiting",
            "urgency": 0.5,
            "priority_modifier": 0.0,
            "priority_score": priority_score,
            "position": null,
            "estimated_wait_minutes": null,
            "client_request_id": null,
            "issued_at": issued_at.to_rfc3339(),
            "called_at": null,
            "started_at": null,
            "completed_at": null,
            "created_at": issued_at.to_rfc3339(),
            "updated_at": issued_at.to_rfc3339()
        })
    }

    pub fn sla_record_response(
        record_id: &str,
        entity_id: &str,
        due_time: DateTime<Utc>,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": record_id,
            "entity_type": "complaint",
            "entity_id": entity_id,
            "category": "medical_care",
            "urgency": "high",
            "source": "web",
            "start_time": (due_time - Duration::hours(2)).to_rfc3339(),
            "due_time": due_time.to_rfc3339(),
            "end_time": null,
            "status": status,
            "breached_at": null,
            "breach_duration_minutes": null,
            "breach_severity": null,
            "escalation_level": 0,
            "created_at": (due_time - Duration::hours(2)).to_rfc3339(),
            "updated_at": (due_time - Duration::hours(2)).to_rfc3339()
        })
    }

    pub fn escalation_rule_response(rule_id: &str, cooldown_hours: i64) -> serde_json::Value {
        json!({
            "id": rule_id,
            "name": "breach-notify-supervisor",
            "trigger_type": "sla_breach",
            "active": true,
            "categories": [],
            "urgencies": [],
            "sources": [],
            "actions": [
                {
                    "type": "notify_role",
                    "role": "supervisor",
                    "channel": "email",
                    "message": "SLA breached, review required"
                },
                {"type": "change_priority", "priority": 1}
            ],
            "trigger_delay_minutes": 0,
            "cooldown_hours": cooldown_hours,
            "max_triggers": 3,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn empty_list() -> serde_json::Value {
        json!([])
    }
}
