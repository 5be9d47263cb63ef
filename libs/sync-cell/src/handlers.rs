// libs/sync-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{ReplayBatchRequest, SyncError};
use crate::services::replay::SyncReplayService;

#[axum::debug_handler]
pub async fn replay_batch(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ReplayBatchRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    tracing::debug!(
        "Sync replay requested by user {} for device {}",
        user.id,
        request.device_id
    );

    let replay_service = SyncReplayService::new(&state);
    let response = replay_service
        .replay_batch(request, token)
        .await
        .map_err(|e| match e {
            SyncError::ValidationError(msg) => AppError::BadRequest(msg),
            SyncError::DatabaseError(msg) => AppError::Internal(msg),
        })?;

    Ok(Json(json!(response)))
}
