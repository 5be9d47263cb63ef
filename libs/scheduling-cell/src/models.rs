// libs/scheduling-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate};
use std::fmt;

// ==============================================================================
// AVAILABILITY SLOT MODELS
// ==============================================================================

/// A bookable time window with finite concurrent capacity.
///
/// `reserved_count` is owned exclusively by the `SlotAllocator`; every
/// mutation goes through a conditional update against the previously read
/// value so two concurrent reservations can never both win the same unit
/// of capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub service: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: i32,
    pub reserved_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilitySlot {
    pub fn free_capacity(&self) -> i32 {
        (self.capacity - self.reserved_count).max(0)
    }

    pub fn has_capacity_for(&self, requested: i32) -> bool {
        self.reserved_count + requested <= self.capacity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationResult {
    pub slot: AvailabilitySlot,
    pub reserved_count: i32,
}

/// Suggested nearby slot returned alongside a `CapacityExceeded` failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativeSlot {
    pub slot_id: Uuid,
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub free_capacity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeWindow {
    pub slot_id: Uuid,
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub free_capacity: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    pub provider_id: Option<Uuid>,
    pub date: NaiveDate,
    pub duration_minutes: Option<i32>,
    pub service: Option<String>,
    pub location: Option<String>,
}

// ==============================================================================
// APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub appointment_number: String,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub service: Option<String>,
    pub location: Option<String>,
    pub slot_id: Option<Uuid>,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
    pub queue_token_id: Option<Uuid>,
    pub client_request_id: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub last_transition_by: Option<String>,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed
                | AppointmentStatus::Cancelled
                | AppointmentStatus::NoShow
                | AppointmentStatus::Rescheduled
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::CheckedIn => write!(f, "checked_in"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
            AppointmentStatus::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    Online,
    WalkIn,
    Kiosk,
    Emergency,
    FollowUp,
}

impl AppointmentType {
    /// Walk-in style bookings get a waiting-queue token on creation.
    pub fn joins_queue(&self) -> bool {
        matches!(self, AppointmentType::WalkIn | AppointmentType::Kiosk)
    }
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::Online => write!(f, "online"),
            AppointmentType::WalkIn => write!(f, "walk_in"),
            AppointmentType::Kiosk => write!(f, "kiosk"),
            AppointmentType::Emergency => write!(f, "emergency"),
            AppointmentType::FollowUp => write!(f, "follow_up"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub service: Option<String>,
    pub location: Option<String>,
    /// Either a concrete slot or an explicit window must be supplied.
    pub slot_id: Option<Uuid>,
    pub window_start: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub appointment_type: AppointmentType,
    /// Offline-sync idempotency key parts; replays with the same pair
    /// return the originally created appointment.
    pub device_id: Option<String>,
    pub client_temp_id: Option<String>,
}

impl BookAppointmentRequest {
    pub fn idempotency_key(&self) -> Option<String> {
        match (&self.device_id, &self.client_temp_id) {
            (Some(device), Some(temp)) => Some(format!("{}:{}", device, temp)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRequest {
    pub status: AppointmentStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_slot_id: Option<Uuid>,
    pub new_window_start: Option<DateTime<Utc>>,
    pub new_duration_minutes: Option<i32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentSearchQuery {
    pub patient_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingResponse {
    pub id: Uuid,
    pub appointment_number: String,
    pub status: AppointmentStatus,
    pub queue_token_id: Option<Uuid>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("Slot capacity exceeded")]
    CapacityExceeded { alternatives: Vec<AlternativeSlot> },

    #[error("Slot not available")]
    SlotUnavailable,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Appointment not found")]
    NotFound,

    #[error("Invalid status transition from {from} to {to}: {detail}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
        detail: String,
    },

    #[error("Concurrent modification detected")]
    StaleRead,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Queue error: {0}")]
    QueueError(String),
}

// ==============================================================================
// VALIDATION RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct BookingValidationRules {
    pub min_appointment_duration: i32,
    pub max_appointment_duration: i32,
    pub max_advance_booking_days: i64,
}

impl Default for BookingValidationRules {
    fn default() -> Self {
        Self {
            min_appointment_duration: 5,
            max_appointment_duration: 120,
            max_advance_booking_days: 90,
        }
    }
}
