// libs/sla-cell/src/services/deadline.rs
//
// Pure deadline arithmetic. Everything here takes literal timestamps and
// returns values, with no storage access, so the tables and classifier can
// be tested directly.
use chrono::{DateTime, Duration, Utc};

use crate::models::{AlertLevel, BreachSeverity, SlaCategory, SlaStatus, Urgency};

/// Base resolution window by urgency, in hours.
pub fn base_hours(urgency: Urgency) -> i64 {
    match urgency {
        Urgency::Critical => 2,
        Urgency::High => 4,
        Urgency::Medium => 24,
        Urgency::Low => 72,
    }
}

/// Category adjustment on the urgency base. Clinical and conduct issues
/// get half the window, billing gets double.
pub fn category_multiplier(category: SlaCategory) -> f64 {
    match category {
        SlaCategory::MedicalCare | SlaCategory::StaffBehavior => 0.5,
        SlaCategory::Billing => 2.0,
        SlaCategory::Waiting | SlaCategory::Facility | SlaCategory::Other => 1.0,
    }
}

/// Deadline for an entity created at `created_at`.
pub fn due_time(
    category: SlaCategory,
    urgency: Urgency,
    created_at: DateTime<Utc>,
) -> DateTime<Utc> {
    let adjusted_minutes =
        (base_hours(urgency) as f64 * 60.0 * category_multiplier(category)).round() as i64;
    created_at + Duration::minutes(adjusted_minutes)
}

/// Classify a record. Once `end_time` is set the outcome is final:
/// resolved if it beat the deadline, breached otherwise. Open records are
/// breached at the deadline and at-risk inside the configured window
/// before it.
pub fn classify(
    due_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    risk_window: Duration,
) -> SlaStatus {
    if let Some(end) = end_time {
        return if end <= due_time {
            SlaStatus::Resolved
        } else {
            SlaStatus::Breached
        };
    }

    if now >= due_time {
        SlaStatus::Breached
    } else if due_time - now <= risk_window {
        SlaStatus::AtRisk
    } else {
        SlaStatus::OnTrack
    }
}

/// Severity by how long the deadline has been missed.
pub fn breach_severity(breach_duration: Duration) -> BreachSeverity {
    let hours = breach_duration.num_hours();
    if hours < 1 {
        BreachSeverity::Minor
    } else if hours < 4 {
        BreachSeverity::Moderate
    } else if hours < 24 {
        BreachSeverity::Severe
    } else {
        BreachSeverity::Critical
    }
}

/// Roll-up shown on dashboards.
pub fn alert_level(status: SlaStatus) -> AlertLevel {
    match status {
        SlaStatus::Breached => AlertLevel::Critical,
        SlaStatus::AtRisk => AlertLevel::Warning,
        SlaStatus::OnTrack | SlaStatus::Resolved | SlaStatus::Cancelled => AlertLevel::Ok,
    }
}
