// libs/sla-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{ManualEscalateRequest, RegisterSlaRequest, SlaError};
use crate::services::escalation::EscalationRuleEngine;
use crate::services::tracker::SlaTrackerService;

#[axum::debug_handler]
pub async fn get_monitoring(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !is_staff(&user) {
        return Err(AppError::Auth(
            "SLA monitoring requires staff privileges".to_string(),
        ));
    }

    let tracker = SlaTrackerService::new(&state);
    let entries = tracker
        .monitoring_snapshot(token)
        .await
        .map_err(map_sla_error)?;

    Ok(Json(json!({
        "records": entries,
        "count": entries.len()
    })))
}

#[axum::debug_handler]
pub async fn register_sla_record(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RegisterSlaRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !is_staff(&user) {
        return Err(AppError::Auth(
            "Registering SLA records requires staff privileges".to_string(),
        ));
    }

    let tracker = SlaTrackerService::new(&state);
    let record = tracker.register(request, token).await.map_err(map_sla_error)?;

    Ok(Json(json!({
        "success": true,
        "record": record
    })))
}

#[axum::debug_handler]
pub async fn resolve_sla_record(
    State(state): State<Arc<AppConfig>>,
    Path(record_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !is_staff(&user) {
        return Err(AppError::Auth(
            "Resolving SLA records requires staff privileges".to_string(),
        ));
    }

    let tracker = SlaTrackerService::new(&state);
    let record = tracker
        .resolve(record_id, None, token)
        .await
        .map_err(map_sla_error)?;

    Ok(Json(json!({
        "success": true,
        "record": record
    })))
}

/// Operator-initiated escalation for the entity's open SLA record.
#[axum::debug_handler]
pub async fn escalate_entity(
    State(state): State<Arc<AppConfig>>,
    Path(entity_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ManualEscalateRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !is_staff(&user) {
        return Err(AppError::Auth(
            "Manual escalation requires staff privileges".to_string(),
        ));
    }

    let tracker = SlaTrackerService::new(&state);
    let record = tracker
        .find_by_entity(entity_id, token)
        .await
        .map_err(map_sla_error)?
        .ok_or_else(|| AppError::NotFound("No open SLA record for this entity".to_string()))?;

    let engine = EscalationRuleEngine::new(&state);
    let event = engine
        .escalate_manual(&record, &request.reason, request.level, token)
        .await
        .map_err(map_sla_error)?;

    Ok(Json(json!({
        "success": true,
        "event": event
    })))
}

#[axum::debug_handler]
pub async fn get_escalation_events(
    State(state): State<Arc<AppConfig>>,
    Path(entity_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !is_staff(&user) {
        return Err(AppError::Auth(
            "Escalation history requires staff privileges".to_string(),
        ));
    }

    let engine = EscalationRuleEngine::new(&state);
    let events = engine
        .events_for(entity_id, None, token)
        .await
        .map_err(map_sla_error)?;

    Ok(Json(json!({
        "events": events,
        "count": events.len()
    })))
}

fn is_staff(user: &User) -> bool {
    matches!(user.role.as_deref(), Some("staff") | Some("admin"))
}

fn map_sla_error(e: SlaError) -> AppError {
    match e {
        SlaError::NotFound => AppError::NotFound("SLA record not found".to_string()),
        SlaError::RuleNotFound => AppError::NotFound("Escalation rule not found".to_string()),
        SlaError::NotEligible(msg) => AppError::Unprocessable(msg),
        SlaError::ValidationError(msg) => AppError::BadRequest(msg),
        SlaError::ActionFailed(msg) | SlaError::DatabaseError(msg) => AppError::Internal(msg),
    }
}
