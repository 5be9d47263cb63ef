// libs/sla-cell/src/services/tracker.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{MonitoringEntry, RegisterSlaRequest, SlaError, SlaRecord, SlaStatus};
use crate::services::deadline;

/// Owns `sla_records` rows: registration, status refresh, resolution.
/// The deadline math itself lives in `deadline`; this service only moves
/// rows through it.
pub struct SlaTrackerService {
    supabase: Arc<SupabaseClient>,
    risk_window: ChronoDuration,
}

impl SlaTrackerService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            risk_window: ChronoDuration::hours(config.sla_risk_window_hours),
        }
    }

    pub async fn register(
        &self,
        request: RegisterSlaRequest,
        auth_token: &str,
    ) -> Result<SlaRecord, SlaError> {
        let now = Utc::now();
        let start_time = request.start_time.unwrap_or(now);
        let due = deadline::due_time(request.category, request.urgency, start_time);
        let status = deadline::classify(due, None, now, self.risk_window);

        let body = json!({
            "entity_type": request.entity_type.to_string(),
            "entity_id": request.entity_id,
            "category": request.category.to_string(),
            "urgency": request.urgency.to_string(),
            "source": request.source,
            "start_time": start_time.to_rfc3339(),
            "due_time": due.to_rfc3339(),
            "status": status.to_string(),
            "escalation_level": 0,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/sla_records",
                Some(auth_token),
                Some(body),
                Some(headers),
            )
            .await
            .map_err(|e| SlaError::DatabaseError(e.to_string()))?;

        let record: SlaRecord = result
            .into_iter()
            .next()
            .ok_or_else(|| SlaError::DatabaseError("Failed to create SLA record".to_string()))
            .and_then(parse_record)?;

        info!(
            "SLA record {} registered for {} {} due {}",
            record.id, record.entity_type, record.entity_id, record.due_time
        );
        Ok(record)
    }

    /// Close a record. The outcome is final: resolved if the end time beat
    /// the deadline, breached (with breach metadata) otherwise.
    pub async fn resolve(
        &self,
        record_id: Uuid,
        end_time: Option<DateTime<Utc>>,
        auth_token: &str,
    ) -> Result<SlaRecord, SlaError> {
        let record = self.get_record(record_id, auth_token).await?;
        let now = Utc::now();
        let end = end_time.unwrap_or(now);

        if end < record.start_time {
            return Err(SlaError::ValidationError(
                "end_time cannot precede start_time".to_string(),
            ));
        }

        let status = deadline::classify(record.due_time, Some(end), now, self.risk_window);

        let mut update = serde_json::Map::new();
        update.insert("end_time".to_string(), json!(end.to_rfc3339()));
        update.insert("status".to_string(), json!(status.to_string()));
        update.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        if status == SlaStatus::Breached {
            let overrun = end - record.due_time;
            update.insert("breached_at".to_string(), json!(record.due_time.to_rfc3339()));
            update.insert(
                "breach_duration_minutes".to_string(),
                json!(overrun.num_minutes()),
            );
            update.insert(
                "breach_severity".to_string(),
                json!(deadline::breach_severity(overrun)),
            );
        }

        self.patch_record(record_id, Value::Object(update), auth_token)
            .await
    }

    pub async fn cancel(&self, record_id: Uuid, auth_token: &str) -> Result<SlaRecord, SlaError> {
        let now = Utc::now();
        self.patch_record(
            record_id,
            json!({
                "status": SlaStatus::Cancelled.to_string(),
                "updated_at": now.to_rfc3339(),
            }),
            auth_token,
        )
        .await
    }

    pub async fn get_record(
        &self,
        record_id: Uuid,
        auth_token: &str,
    ) -> Result<SlaRecord, SlaError> {
        let path = format!("/rest/v1/sla_records?id=eq.{}", record_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SlaError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(SlaError::NotFound).and_then(parse_record)
    }

    pub async fn find_by_entity(
        &self,
        entity_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<SlaRecord>, SlaError> {
        let path = format!(
            "/rest/v1/sla_records?entity_id=eq.{}&status=in.(on_track,at_risk,breached)&limit=1",
            entity_id
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SlaError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(value) => parse_record(value).map(Some),
            None => Ok(None),
        }
    }

    /// Every record still moving toward a deadline.
    pub async fn list_open(&self, auth_token: &str) -> Result<Vec<SlaRecord>, SlaError> {
        let path =
            "/rest/v1/sla_records?status=in.(on_track,at_risk,breached)&order=due_time.asc";
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| SlaError::DatabaseError(e.to_string()))?;

        result.into_iter().map(parse_record).collect()
    }

    /// Re-classify an open record and persist the transition when it moved.
    /// Returns the previous and current status so the caller can react to
    /// fresh at-risk/breached transitions.
    pub async fn refresh_record(
        &self,
        record: &SlaRecord,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<(SlaStatus, SlaRecord), SlaError> {
        let new_status =
            deadline::classify(record.due_time, record.end_time, now, self.risk_window);

        if new_status == record.status {
            return Ok((record.status, record.clone()));
        }

        debug!(
            "SLA record {} moving {} -> {}",
            record.id, record.status, new_status
        );

        let mut update = serde_json::Map::new();
        update.insert("status".to_string(), json!(new_status.to_string()));
        update.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        if new_status == SlaStatus::Breached && record.breached_at.is_none() {
            let overrun = now - record.due_time;
            update.insert("breached_at".to_string(), json!(record.due_time.to_rfc3339()));
            update.insert(
                "breach_duration_minutes".to_string(),
                json!(overrun.num_minutes()),
            );
            update.insert(
                "breach_severity".to_string(),
                json!(deadline::breach_severity(overrun)),
            );
        }

        // Conditional on the status we read: if a concurrent resolve or
        // cancel already moved the record, this refresh stands down rather
        // than dragging it back and firing escalations for it.
        let path = format!(
            "/rest/v1/sla_records?id=eq.{}&status=eq.{}",
            record.id, record.status
        );
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update)),
                Some(headers),
            )
            .await
            .map_err(|e| SlaError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(value) => Ok((record.status, parse_record(value)?)),
            None => {
                debug!(
                    "SLA record {} changed since read, skipping refresh",
                    record.id
                );
                Ok((record.status, record.clone()))
            }
        }
    }

    /// Dashboard view: every open record with its alert level and time
    /// remaining.
    pub async fn monitoring_snapshot(
        &self,
        auth_token: &str,
    ) -> Result<Vec<MonitoringEntry>, SlaError> {
        let now = Utc::now();
        let records = self.list_open(auth_token).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let status =
                    deadline::classify(record.due_time, record.end_time, now, self.risk_window);
                let remaining = if record.end_time.is_none() {
                    Some((record.due_time - now).num_minutes())
                } else {
                    None
                };
                MonitoringEntry {
                    alert_level: deadline::alert_level(status),
                    remaining_minutes: remaining,
                    record,
                }
            })
            .collect())
    }

    async fn patch_record(
        &self,
        record_id: Uuid,
        body: Value,
        auth_token: &str,
    ) -> Result<SlaRecord, SlaError> {
        let path = format!("/rest/v1/sla_records?id=eq.{}", record_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(headers))
            .await
            .map_err(|e| SlaError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(SlaError::NotFound).and_then(parse_record)
    }
}

fn parse_record(value: Value) -> Result<SlaRecord, SlaError> {
    serde_json::from_value(value)
        .map_err(|e| SlaError::DatabaseError(format!("Failed to parse SLA record: {}", e)))
}
