// libs/queue-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// QUEUE TOKEN MODELS
// ==============================================================================

/// A patient's place in a provider's waiting queue.
///
/// `position` and `estimated_wait_minutes` are derived fields, refreshed by
/// every recompute pass; they are snapshots, not the source of truth. The
/// ordering source of truth is `(priority_score desc, issued_at asc)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueToken {
    pub id: Uuid,
    pub token_number: i64,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub service: String,
    pub location: String,
    pub appointment_id: Option<Uuid>,
    pub status: TokenStatus,
    pub urgency: f64,
    pub priority_modifier: f64,
    pub priority_score: f64,
    pub position: Option<i32>,
    pub estimated_wait_minutes: Option<i64>,
    pub client_request_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueToken {
    /// Active tokens occupy a queue position and compete for the next call.
    pub fn is_active(&self) -> bool {
        matches!(self.status, TokenStatus::Waiting | TokenStatus::Called)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Waiting,
    Called,
    InConsultation,
    Completed,
    Skipped,
    Cancelled,
}

impl TokenStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TokenStatus::Completed | TokenStatus::Skipped | TokenStatus::Cancelled
        )
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenStatus::Waiting => write!(f, "waiting"),
            TokenStatus::Called => write!(f, "called"),
            TokenStatus::InConsultation => write!(f, "in_consultation"),
            TokenStatus::Completed => write!(f, "completed"),
            TokenStatus::Skipped => write!(f, "skipped"),
            TokenStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per location/service/day counter backing gap-free token numbers.
/// Providers sharing a location draw from the same sequence. The scheduler
/// bumps `last_token_number` with a conditional update so two concurrent
/// joins can never mint the same number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCounter {
    pub id: Uuid,
    pub location: String,
    pub service: String,
    pub counter_date: NaiveDate,
    pub last_token_number: i64,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinQueueRequest {
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub service: String,
    pub location: String,
    /// Clinical urgency in `[0.0, 1.0]`, mapped onto half the score range.
    pub urgency: f64,
    /// Staff adjustment, positive or negative, applied after urgency and
    /// wait bonuses.
    pub priority_modifier: f64,
    pub appointment_id: Option<Uuid>,
    pub device_id: Option<String>,
    pub client_temp_id: Option<String>,
}

impl JoinQueueRequest {
    pub fn idempotency_key(&self) -> Option<String> {
        match (&self.device_id, &self.client_temp_id) {
            (Some(device), Some(temp)) => Some(format!("{}:{}", device, temp)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTokenStatusRequest {
    pub status: TokenStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub provider_id: Uuid,
    pub service: String,
    pub location: String,
    pub tokens: Vec<QueueToken>,
    pub average_consult_minutes: i64,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue token not found")]
    NotFound,

    #[error("Invalid token status transition from {from} to {to}")]
    InvalidTransition { from: TokenStatus, to: TokenStatus },

    #[error("Concurrent modification detected")]
    StaleRead,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
