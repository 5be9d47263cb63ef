// libs/queue-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{JoinQueueRequest, QueueError, UpdateTokenStatusRequest};
use crate::services::scheduler::QueueSchedulerService;

#[derive(Debug, Deserialize)]
pub struct QueueQueryParams {
    pub provider_id: Uuid,
    pub service: String,
    pub location: String,
}

#[axum::debug_handler]
pub async fn join_queue(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<JoinQueueRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let is_patient = request.patient_id.to_string() == user.id;
    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));

    if !is_patient && !is_staff {
        return Err(AppError::Auth(
            "Not authorized to join the queue for this patient".to_string(),
        ));
    }

    // Only staff may boost or demote a token beyond its clinical urgency.
    if !is_staff && request.priority_modifier != 0.0 {
        return Err(AppError::Auth(
            "Priority modifiers require staff privileges".to_string(),
        ));
    }

    let scheduler = QueueSchedulerService::new(&state);
    let queue_token = scheduler
        .join_queue(request, token)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "success": true,
        "token": queue_token,
        "message": "Joined queue successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_queue(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<QueueQueryParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let scheduler = QueueSchedulerService::new(&state);

    let snapshot = scheduler
        .get_queue(params.provider_id, &params.service, &params.location, token)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!(snapshot)))
}

#[axum::debug_handler]
pub async fn get_token(
    State(state): State<Arc<AppConfig>>,
    Path(token_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let scheduler = QueueSchedulerService::new(&state);

    let queue_token = scheduler
        .get_token(token_id, token)
        .await
        .map_err(map_queue_error)?;

    let is_patient = queue_token.patient_id.to_string() == user.id;
    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));
    if !is_patient && !is_staff {
        return Err(AppError::Auth(
            "Not authorized to view this queue token".to_string(),
        ));
    }

    Ok(Json(json!(queue_token)))
}

#[axum::debug_handler]
pub async fn update_token_status(
    State(state): State<Arc<AppConfig>>,
    Path(token_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateTokenStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Calling, skipping, and completing are front-desk operations.
    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));
    if !is_staff {
        return Err(AppError::Auth(
            "Queue status changes require staff privileges".to_string(),
        ));
    }

    let scheduler = QueueSchedulerService::new(&state);
    let updated = scheduler
        .update_token_status(token_id, request.status, token)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "success": true,
        "token": updated
    })))
}

#[axum::debug_handler]
pub async fn recompute_queue(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<QueueQueryParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));
    if !is_staff {
        return Err(AppError::Auth(
            "Queue recompute requires staff privileges".to_string(),
        ));
    }

    let scheduler = QueueSchedulerService::new(&state);
    let snapshot = scheduler
        .recompute_queue(params.provider_id, &params.service, &params.location, token)
        .await
        .map_err(map_queue_error)?;

    Ok(Json(json!({
        "success": true,
        "queue": snapshot
    })))
}

fn map_queue_error(e: QueueError) -> AppError {
    match e {
        QueueError::NotFound => AppError::NotFound("Queue token not found".to_string()),
        QueueError::InvalidTransition { from, to } => AppError::Unprocessable(format!(
            "Cannot transition queue token from {} to {}",
            from, to
        )),
        QueueError::StaleRead => {
            AppError::Conflict("Concurrent modification, please retry".to_string())
        }
        QueueError::ValidationError(msg) => AppError::BadRequest(msg),
        QueueError::DatabaseError(msg) => AppError::Internal(msg),
    }
}
