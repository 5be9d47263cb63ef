// libs/sla-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// SLA RECORD MODELS
// ==============================================================================

/// A tracked deadline attached to a complaint or appointment.
///
/// `status` and `escalation_level` are owned by the SLA machinery; the
/// owning entity never writes them directly. Category, urgency, and source
/// are denormalized from the owning entity so rule matching needs no join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaRecord {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub category: SlaCategory,
    pub urgency: Urgency,
    pub source: Option<String>,
    pub start_time: DateTime<Utc>,
    pub due_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SlaStatus,
    pub breached_at: Option<DateTime<Utc>>,
    pub breach_duration_minutes: Option<i64>,
    pub breach_severity: Option<BreachSeverity>,
    pub escalation_level: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Complaint,
    Appointment,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Complaint => write!(f, "complaint"),
            EntityType::Appointment => write!(f, "appointment"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlaCategory {
    MedicalCare,
    StaffBehavior,
    Billing,
    Waiting,
    Facility,
    Other,
}

impl fmt::Display for SlaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlaCategory::MedicalCare => write!(f, "medical_care"),
            SlaCategory::StaffBehavior => write!(f, "staff_behavior"),
            SlaCategory::Billing => write!(f, "billing"),
            SlaCategory::Waiting => write!(f, "waiting"),
            SlaCategory::Facility => write!(f, "facility"),
            SlaCategory::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Critical => write!(f, "critical"),
            Urgency::High => write!(f, "high"),
            Urgency::Medium => write!(f, "medium"),
            Urgency::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    OnTrack,
    AtRisk,
    Breached,
    Resolved,
    Cancelled,
}

impl SlaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlaStatus::Resolved | SlaStatus::Cancelled)
    }
}

impl fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlaStatus::OnTrack => write!(f, "on_track"),
            SlaStatus::AtRisk => write!(f, "at_risk"),
            SlaStatus::Breached => write!(f, "breached"),
            SlaStatus::Resolved => write!(f, "resolved"),
            SlaStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Graded by how long past the deadline the record ran.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreachSeverity {
    Minor,
    Moderate,
    Severe,
    Critical,
}

/// Dashboard-facing roll-up of `SlaStatus`; callers never see raw internal
/// error codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertLevel {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "CRITICAL")]
    Critical,
}

// ==============================================================================
// ESCALATION RULE MODELS
// ==============================================================================

/// Immutable configuration matched against SLA records. Empty filter
/// arrays match everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub id: Uuid,
    pub name: String,
    pub trigger_type: TriggerType,
    pub active: bool,
    #[serde(default)]
    pub categories: Vec<SlaCategory>,
    #[serde(default)]
    pub urgencies: Vec<Urgency>,
    #[serde(default)]
    pub sources: Vec<String>,
    pub actions: Vec<EscalationAction>,
    pub trigger_delay_minutes: i64,
    pub cooldown_hours: i64,
    pub max_triggers: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    TimeBased,
    StatusBased,
    SlaBreach,
    Manual,
}

/// Closed set of actions a rule may carry. Each variant has one executor
/// and each is idempotent at the entity level (reassignment is a set, not
/// an increment).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationAction {
    AssignToUser { user_id: Uuid },
    AssignToRole { role: String },
    NotifyRole { role: String, channel: String, message: String },
    ChangeStatus { status: String },
    ChangePriority { priority: i32 },
}

impl EscalationAction {
    pub fn kind(&self) -> &'static str {
        match self {
            EscalationAction::AssignToUser { .. } => "assign_to_user",
            EscalationAction::AssignToRole { .. } => "assign_to_role",
            EscalationAction::NotifyRole { .. } => "notify_role",
            EscalationAction::ChangeStatus { .. } => "change_status",
            EscalationAction::ChangePriority { .. } => "change_priority",
        }
    }
}

/// Append-only audit row; the cooldown and max-trigger guards read these,
/// which is what makes overlapping sweeps safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub id: Uuid,
    pub rule_id: Option<Uuid>,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub escalation_level: i32,
    pub reason: String,
    pub triggered_at: DateTime<Utc>,
    pub actions_taken: Vec<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterSlaRequest {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub category: SlaCategory,
    pub urgency: Urgency,
    pub source: Option<String>,
    /// Defaults to now when omitted.
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualEscalateRequest {
    pub reason: String,
    pub level: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringEntry {
    pub record: SlaRecord,
    pub alert_level: AlertLevel,
    pub remaining_minutes: Option<i64>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SlaError {
    #[error("SLA record not found")]
    NotFound,

    #[error("Escalation rule not found")]
    RuleNotFound,

    #[error("Rule not eligible: {0}")]
    NotEligible(String),

    #[error("Action execution failed: {0}")]
    ActionFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
