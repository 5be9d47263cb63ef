use chrono::{Duration, Utc};

use sla_cell::models::{AlertLevel, BreachSeverity, SlaCategory, SlaStatus, Urgency};
use sla_cell::services::deadline::{
    alert_level, base_hours, breach_severity, category_multiplier, classify, due_time,
};

#[test]
fn test_base_hours_by_urgency() {
    assert_eq!(base_hours(Urgency::Critical), 2);
    assert_eq!(base_hours(Urgency::High), 4);
    assert_eq!(base_hours(Urgency::Medium), 24);
    assert_eq!(base_hours(Urgency::Low), 72);
}

#[test]
fn test_clinical_categories_halve_the_window() {
    let created = Utc::now();
    // Critical medical care: 2h base halved to 1h.
    assert_eq!(
        due_time(SlaCategory::MedicalCare, Urgency::Critical, created),
        created + Duration::hours(1)
    );
    assert_eq!(
        due_time(SlaCategory::StaffBehavior, Urgency::High, created),
        created + Duration::hours(2)
    );
}

#[test]
fn test_billing_doubles_the_window() {
    let created = Utc::now();
    assert_eq!(
        due_time(SlaCategory::Billing, Urgency::High, created),
        created + Duration::hours(8)
    );
    assert_eq!(
        due_time(SlaCategory::Billing, Urgency::Low, created),
        created + Duration::hours(144)
    );
}

#[test]
fn test_neutral_categories_keep_the_base() {
    let created = Utc::now();
    for category in [SlaCategory::Waiting, SlaCategory::Facility, SlaCategory::Other] {
        assert_eq!(
            due_time(category, Urgency::Medium, created),
            created + Duration::hours(24)
        );
    }
    assert_eq!(category_multiplier(SlaCategory::Other), 1.0);
}

#[test]
fn test_open_record_breaches_at_the_deadline() {
    let now = Utc::now();
    let risk_window = Duration::hours(2);

    let overdue = now - Duration::minutes(10);
    assert_eq!(classify(overdue, None, now, risk_window), SlaStatus::Breached);

    // Exactly at the deadline counts as breached.
    assert_eq!(classify(now, None, now, risk_window), SlaStatus::Breached);
}

#[test]
fn test_open_record_at_risk_inside_window() {
    let now = Utc::now();
    let risk_window = Duration::hours(2);

    let due_soon = now + Duration::minutes(90);
    assert_eq!(classify(due_soon, None, now, risk_window), SlaStatus::AtRisk);

    let due_later = now + Duration::hours(3);
    assert_eq!(classify(due_later, None, now, risk_window), SlaStatus::OnTrack);
}

#[test]
fn test_end_time_makes_the_outcome_final() {
    let now = Utc::now();
    let risk_window = Duration::hours(2);
    let due = now - Duration::hours(1);

    // Finished a minute before the deadline: resolved, even though the
    // deadline itself has since passed.
    let early = due - Duration::minutes(1);
    assert_eq!(
        classify(due, Some(early), now, risk_window),
        SlaStatus::Resolved
    );

    // Finished right on the deadline still counts.
    assert_eq!(classify(due, Some(due), now, risk_window), SlaStatus::Resolved);

    let late = due + Duration::minutes(5);
    assert_eq!(
        classify(due, Some(late), now, risk_window),
        SlaStatus::Breached
    );
}

#[test]
fn test_breach_severity_thresholds() {
    assert_eq!(breach_severity(Duration::minutes(59)), BreachSeverity::Minor);
    assert_eq!(breach_severity(Duration::hours(1)), BreachSeverity::Moderate);
    assert_eq!(
        breach_severity(Duration::hours(3) + Duration::minutes(59)),
        BreachSeverity::Moderate
    );
    assert_eq!(breach_severity(Duration::hours(4)), BreachSeverity::Severe);
    assert_eq!(breach_severity(Duration::hours(23)), BreachSeverity::Severe);
    assert_eq!(breach_severity(Duration::hours(24)), BreachSeverity::Critical);
    assert_eq!(breach_severity(Duration::days(3)), BreachSeverity::Critical);
}

#[test]
fn test_alert_level_rollup() {
    assert_eq!(alert_level(SlaStatus::Breached), AlertLevel::Critical);
    assert_eq!(alert_level(SlaStatus::AtRisk), AlertLevel::Warning);
    assert_eq!(alert_level(SlaStatus::OnTrack), AlertLevel::Ok);
    assert_eq!(alert_level(SlaStatus::Resolved), AlertLevel::Ok);
    assert_eq!(alert_level(SlaStatus::Cancelled), AlertLevel::Ok);
}
