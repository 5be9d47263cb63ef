// libs/sync-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// One offline action captured on a device, to be replayed server-side.
/// `client_temp_id` plus the batch's `device_id` form the idempotency key,
/// so re-uploading a batch after a dropped connection is harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItem {
    pub client_temp_id: String,
    pub entity_type: SyncEntityType,
    pub action: SyncAction,
    pub payload: Value,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntityType {
    Appointment,
    QueueToken,
}

impl fmt::Display for SyncEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEntityType::Appointment => write!(f, "appointment"),
            SyncEntityType::QueueToken => write!(f, "queue_token"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Create => write!(f, "create"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayBatchRequest {
    pub device_id: String,
    pub items: Vec<SyncItem>,
}

/// Per-item result. `replayed` marks an idempotent duplicate: the item had
/// already been applied and the original entity was returned untouched.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub client_temp_id: String,
    pub entity_type: SyncEntityType,
    pub entity_id: Option<Uuid>,
    pub replayed: bool,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayBatchResponse {
    pub device_id: String,
    pub outcomes: Vec<ReplayOutcome>,
    pub applied: usize,
    pub replayed: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
