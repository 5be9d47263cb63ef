// libs/sla-cell/src/services/escalation.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    EntityType, EscalationAction, EscalationEvent, EscalationRule, SlaError, SlaRecord,
    TriggerType,
};
use crate::services::notify::NotificationDispatcher;

/// Pure eligibility guard. All conditions must hold: the rule is active,
/// the record matches every filter (empty filters match everything), the
/// trigger delay has elapsed since the record started, the cooldown since
/// the last event for this entity+rule has passed, and the trigger count
/// is still under the cap.
///
/// The guard reads only durable event history, never in-memory state, so
/// overlapping sweeps cannot double-fire a rule.
pub fn evaluate(
    record: &SlaRecord,
    rule: &EscalationRule,
    prior_events: &[EscalationEvent],
    now: DateTime<Utc>,
) -> Result<(), String> {
    if !rule.active {
        return Err("rule is inactive".to_string());
    }

    if !rule.categories.is_empty() && !rule.categories.contains(&record.category) {
        return Err(format!("category {} does not match", record.category));
    }
    if !rule.urgencies.is_empty() && !rule.urgencies.contains(&record.urgency) {
        return Err(format!("urgency {} does not match", record.urgency));
    }
    if !rule.sources.is_empty() {
        let matches = record
            .source
            .as_ref()
            .map(|s| rule.sources.contains(s))
            .unwrap_or(false);
        if !matches {
            return Err("source does not match".to_string());
        }
    }

    if now < record.start_time + ChronoDuration::minutes(rule.trigger_delay_minutes) {
        return Err("trigger delay has not elapsed".to_string());
    }

    let trigger_count = prior_events.len() as i32;
    if trigger_count >= rule.max_triggers {
        return Err(format!(
            "max trigger count {} reached",
            rule.max_triggers
        ));
    }

    if let Some(last) = prior_events.iter().map(|e| e.triggered_at).max() {
        let cooldown_end = last + ChronoDuration::hours(rule.cooldown_hours);
        if now < cooldown_end {
            return Err(format!("cooldown active until {}", cooldown_end));
        }
    }

    Ok(())
}

pub struct EscalationRuleEngine {
    supabase: Arc<SupabaseClient>,
    dispatcher: NotificationDispatcher,
}

impl EscalationRuleEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            dispatcher: NotificationDispatcher::new(config),
        }
    }

    /// Run every matching rule of one trigger type against a record.
    /// Ineligible rules are skipped quietly; each fired rule produces one
    /// event. Errors on individual rules are recorded and do not stop the
    /// remaining rules.
    pub async fn evaluate_and_execute(
        &self,
        record: &SlaRecord,
        trigger_type: TriggerType,
        reason: &str,
        auth_token: &str,
    ) -> Result<Vec<EscalationEvent>, SlaError> {
        let rules = self.active_rules(trigger_type, auth_token).await?;
        let now = Utc::now();
        let mut fired = Vec::new();
        let mut current_level = record.escalation_level;

        for rule in rules {
            let history = self
                .events_for(record.entity_id, Some(rule.id), auth_token)
                .await?;

            if let Err(skip) = evaluate(record, &rule, &history, now) {
                debug!(
                    "Rule {} not eligible for record {}: {}",
                    rule.name, record.id, skip
                );
                continue;
            }

            match self
                .execute(record, &rule, reason, current_level + 1, auth_token)
                .await
            {
                Ok(event) => {
                    current_level = event.escalation_level;
                    fired.push(event);
                }
                Err(e) => {
                    warn!(
                        "Rule {} failed for record {}: {}",
                        rule.name, record.id, e
                    );
                }
            }
        }

        Ok(fired)
    }

    /// Fire one rule for one record.
    ///
    /// The event row is inserted before any action runs; it is the durable
    /// fact the cooldown and max-trigger guards read, so a crash mid-way
    /// under-escalates instead of double-escalating. Per-action failures
    /// are stamped onto the event afterwards without undoing actions that
    /// already applied, since each action is idempotent on its own.
    pub async fn execute(
        &self,
        record: &SlaRecord,
        rule: &EscalationRule,
        reason: &str,
        new_level: i32,
        auth_token: &str,
    ) -> Result<EscalationEvent, SlaError> {
        let now = Utc::now();
        let actions_taken: Vec<String> =
            rule.actions.iter().map(|a| a.kind().to_string()).collect();

        let event = self
            .insert_event(
                Some(rule.id),
                record,
                new_level,
                reason,
                &actions_taken,
                now,
                auth_token,
            )
            .await?;

        let mut errors = Vec::new();
        for action in &rule.actions {
            if let Err(e) = self.apply_action(record, action, auth_token).await {
                warn!(
                    "Action {} failed for record {}: {}",
                    action.kind(),
                    record.id,
                    e
                );
                errors.push(format!("{}: {}", action.kind(), e));
            }
        }

        self.set_record_level(record.id, new_level, auth_token).await?;

        let event = if errors.is_empty() {
            event
        } else {
            self.mark_event_failed(event.id, &errors.join("; "), auth_token)
                .await?
        };

        info!(
            "Rule {} fired for {} {} at level {} ({} action errors)",
            rule.name,
            record.entity_type,
            record.entity_id,
            new_level,
            errors.len()
        );
        Ok(event)
    }

    /// Operator-initiated escalation, recorded without a rule reference and
    /// exempt from the rule guards.
    pub async fn escalate_manual(
        &self,
        record: &SlaRecord,
        reason: &str,
        level: Option<i32>,
        auth_token: &str,
    ) -> Result<EscalationEvent, SlaError> {
        let now = Utc::now();
        let new_level = level.unwrap_or(record.escalation_level + 1);

        let event = self
            .insert_event(None, record, new_level, reason, &[], now, auth_token)
            .await?;
        self.set_record_level(record.id, new_level, auth_token).await?;

        info!(
            "Manual escalation of {} {} to level {}",
            record.entity_type, record.entity_id, new_level
        );
        Ok(event)
    }

    pub async fn active_rules(
        &self,
        trigger_type: TriggerType,
        auth_token: &str,
    ) -> Result<Vec<EscalationRule>, SlaError> {
        let trigger = match trigger_type {
            TriggerType::TimeBased => "time_based",
            TriggerType::StatusBased => "status_based",
            TriggerType::SlaBreach => "sla_breach",
            TriggerType::Manual => "manual",
        };
        let path = format!(
            "/rest/v1/escalation_rules?active=eq.true&trigger_type=eq.{}&order=created_at.asc",
            trigger
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SlaError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(|v| {
                serde_json::from_value(v).map_err(|e| {
                    SlaError::DatabaseError(format!("Failed to parse escalation rule: {}", e))
                })
            })
            .collect()
    }

    pub async fn events_for(
        &self,
        entity_id: Uuid,
        rule_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<EscalationEvent>, SlaError> {
        let mut path = format!(
            "/rest/v1/escalation_events?entity_id=eq.{}&order=triggered_at.desc",
            entity_id
        );
        if let Some(rule_id) = rule_id {
            path.push_str(&format!("&rule_id=eq.{}", rule_id));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SlaError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(|v| {
                serde_json::from_value(v).map_err(|e| {
                    SlaError::DatabaseError(format!("Failed to parse escalation event: {}", e))
                })
            })
            .collect()
    }

    async fn apply_action(
        &self,
        record: &SlaRecord,
        action: &EscalationAction,
        auth_token: &str,
    ) -> Result<(), String> {
        match action {
            EscalationAction::AssignToUser { user_id } => {
                self.patch_entity(record, json!({ "assigned_to": user_id }), auth_token)
                    .await
            }
            EscalationAction::AssignToRole { role } => {
                self.patch_entity(record, json!({ "assigned_role": role }), auth_token)
                    .await
            }
            EscalationAction::NotifyRole { role, channel, message } => {
                self.dispatcher.dispatch(role, channel, message).await
            }
            EscalationAction::ChangeStatus { status } => {
                self.patch_entity(record, json!({ "status": status }), auth_token)
                    .await
            }
            EscalationAction::ChangePriority { priority } => {
                self.patch_entity(record, json!({ "priority": priority }), auth_token)
                    .await
            }
        }
    }

    /// Unconditional set on the owning entity row. Replaying the same
    /// action lands on the same value, which is what makes partial
    /// failures safe to leave in place.
    async fn patch_entity(
        &self,
        record: &SlaRecord,
        mut body: Value,
        auth_token: &str,
    ) -> Result<(), String> {
        let table = match record.entity_type {
            EntityType::Complaint => "complaints",
            EntityType::Appointment => "appointments",
        };
        if let Some(map) = body.as_object_mut() {
            map.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        }

        let path = format!("/rest/v1/{}?id=eq.{}", table, record.entity_id);
        self.supabase
            .request::<Vec<Value>>(Method::PATCH, &path, Some(auth_token), Some(body))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn insert_event(
        &self,
        rule_id: Option<Uuid>,
        record: &SlaRecord,
        level: i32,
        reason: &str,
        actions_taken: &[String],
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<EscalationEvent, SlaError> {
        let body = json!({
            "rule_id": rule_id,
            "entity_type": record.entity_type.to_string(),
            "entity_id": record.entity_id,
            "escalation_level": level,
            "reason": reason,
            "triggered_at": now.to_rfc3339(),
            "actions_taken": actions_taken,
            "success": true,
            "created_at": now.to_rfc3339()
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
                "/rest/v1/escalation_events",
                Some(auth_token),
                Some(body),
                Some(headers),
            )
            .await
            .map_err(|e| SlaError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .next()
            .ok_or_else(|| SlaError::DatabaseError("Failed to create escalation event".to_string()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| {
                    SlaError::DatabaseError(format!("Failed to parse escalation event: {}", e))
                })
            })
    }

    async fn mark_event_failed(
        &self,
        event_id: Uuid,
        error_message: &str,
        auth_token: &str,
    ) -> Result<EscalationEvent, SlaError> {
        let path = format!("/rest/v1/escalation_events?id=eq.{}", event_id);
        let body = json!({
            "success": false,
            "error_message": error_message,
        });

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

        result
            .into_iter()
            .next()
            .ok_or(SlaError::NotFound)
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| {
                    SlaError::DatabaseError(format!("Failed to parse escalation event: {}", e))
                })
            })
    }

    async fn set_record_level(
        &self,
        record_id: Uuid,
        level: i32,
        auth_token: &str,
    ) -> Result<(), SlaError> {
        let path = format!("/rest/v1/sla_records?id=eq.{}", record_id);
        let body = json!({
            "escalation_level": level,
            "updated_at": Utc::now().to_rfc3339(),
        });

        self.supabase
            .request::<Vec<Value>>(Method::PATCH, &path, Some(auth_token), Some(body))
            .await
            .map(|_| ())
            .map_err(|e| SlaError::DatabaseError(e.to_string()))
    }
}
