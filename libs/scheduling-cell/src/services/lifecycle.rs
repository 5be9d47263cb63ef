// libs/scheduling-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::{AppointmentStatus, SchedulingError};

/// What the caller should do about reminders after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderAction {
    Schedule,
    Cancel,
    None,
}

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed, including the timed
    /// guards: `completed` requires a prior check-in, and `no_show` is only
    /// settable once the scheduled start has elapsed without a check-in.
    pub fn validate_transition(
        &self,
        current: AppointmentStatus,
        new: AppointmentStatus,
        scheduled_start: DateTime<Utc>,
        checked_in_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        debug!("Validating appointment transition {} -> {}", current, new);

        if !self.valid_transitions(current).contains(&new) {
            warn!("Invalid appointment transition attempted: {} -> {}", current, new);
            return Err(SchedulingError::InvalidTransition {
                from: current,
                to: new,
                detail: "transition not allowed from current status".to_string(),
            });
        }

        match new {
            AppointmentStatus::Completed if checked_in_at.is_none() => {
                Err(SchedulingError::InvalidTransition {
                    from: current,
                    to: new,
                    detail: "appointment was never checked in".to_string(),
                })
            }
            AppointmentStatus::NoShow if now <= scheduled_start => {
                Err(SchedulingError::InvalidTransition {
                    from: current,
                    to: new,
                    detail: "scheduled start time has not elapsed".to_string(),
                })
            }
            AppointmentStatus::NoShow if checked_in_at.is_some() => {
                Err(SchedulingError::InvalidTransition {
                    from: current,
                    to: new,
                    detail: "patient already checked in".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// All statuses reachable from the given one. The alternate terminals
    /// (cancelled, no_show, rescheduled) are reachable from any non-terminal
    /// state; their timed guards live in `validate_transition`.
    pub fn valid_transitions(&self, current: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
                AppointmentStatus::Rescheduled,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::CheckedIn,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
                AppointmentStatus::Rescheduled,
            ],
            AppointmentStatus::CheckedIn => vec![
                AppointmentStatus::InProgress,
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rescheduled,
            ],
            AppointmentStatus::InProgress => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Rescheduled,
            ],
            // Terminal states admit nothing.
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow
            | AppointmentStatus::Rescheduled => vec![],
        }
    }

    /// Reminder scheduling is an external collaborator: entry to `confirmed`
    /// schedules one, entry to any terminal state other than `completed`
    /// cancels it.
    pub fn reminder_action(&self, new: AppointmentStatus) -> ReminderAction {
        match new {
            AppointmentStatus::Confirmed => ReminderAction::Schedule,
            AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow
            | AppointmentStatus::Rescheduled => ReminderAction::Cancel,
            _ => ReminderAction::None,
        }
    }

    /// Whether a slot reservation should be given back for this transition.
    pub fn releases_capacity(&self, new: AppointmentStatus) -> bool {
        matches!(
            new,
            AppointmentStatus::Cancelled
                | AppointmentStatus::NoShow
                | AppointmentStatus::Rescheduled
        )
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}
