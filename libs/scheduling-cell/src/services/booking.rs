// libs/scheduling-cell/src/services/booking.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use queue_cell::models::{JoinQueueRequest, TokenStatus};
use queue_cell::services::scheduler::QueueSchedulerService;

use crate::models::{
    Appointment, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest,
    BookingValidationRules, CancelAppointmentRequest, RescheduleAppointmentRequest,
    SchedulingError, TransitionRequest,
};
use crate::services::allocator::SlotAllocator;
use crate::services::lifecycle::{AppointmentLifecycleService, ReminderAction};

const REMINDER_LEAD_HOURS: i64 = 24;

pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    allocator: SlotAllocator,
    lifecycle_service: AppointmentLifecycleService,
    queue_service: QueueSchedulerService,
    validation_rules: BookingValidationRules,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            allocator: SlotAllocator::with_client(
                Arc::clone(&supabase),
                config.slot_lookahead_hours,
            ),
            lifecycle_service: AppointmentLifecycleService::new(),
            queue_service: QueueSchedulerService::new(config),
            supabase,
            validation_rules: BookingValidationRules::default(),
        }
    }

    /// Book an appointment against a slot or an explicit time window.
    ///
    /// Replays carrying the same device/client idempotency key return the
    /// originally created appointment instead of booking twice. Walk-in
    /// style bookings additionally receive a waiting-queue token.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        info!(
            "Booking {} appointment for patient {} with provider {}",
            request.appointment_type, request.patient_id, request.provider_id
        );

        self.validate_booking_request(&request)?;

        // Idempotent replay check before touching any capacity.
        if let Some(key) = request.idempotency_key() {
            if let Some(existing) = self.find_by_request_id(&key, auth_token).await? {
                info!(
                    "Idempotent replay for key {}, returning appointment {}",
                    key, existing.id
                );
                return Ok(existing);
            }
        }

        let (start_time, end_time, reserved_slot_id) = match request.slot_id {
            Some(slot_id) => {
                let reservation = self.allocator.reserve(slot_id, 1, auth_token).await?;
                (
                    reservation.slot.start_time,
                    reservation.slot.end_time,
                    Some(slot_id),
                )
            }
            None => {
                let start = request.window_start.ok_or_else(|| {
                    SchedulingError::ValidationError(
                        "either slot_id or window_start is required".to_string(),
                    )
                })?;
                let duration = request.duration_minutes.unwrap_or(30);
                (start, start + ChronoDuration::minutes(duration as i64), None)
            }
        };

        let appointment = match self
            .create_appointment_record(&request, start_time, end_time, reserved_slot_id, auth_token)
            .await
        {
            Ok(appointment) => appointment,
            Err(e) => {
                // The reserved unit must not leak if the insert fails.
                if let Some(slot_id) = reserved_slot_id {
                    if let Err(release_err) = self.allocator.release(slot_id, 1, auth_token).await {
                        warn!(
                            "Failed to release slot {} after booking failure: {}",
                            slot_id, release_err
                        );
                    }
                }
                return Err(e);
            }
        };

        let appointment = if request.appointment_type.joins_queue() {
            self.attach_queue_token(appointment, &request, auth_token).await?
        } else {
            appointment
        };

        info!(
            "Appointment {} ({}) booked for patient {}",
            appointment.id, appointment.appointment_number, appointment.patient_id
        );
        Ok(appointment)
    }

    /// Apply a lifecycle transition and its side effects: check-in stamps,
    /// slot release on the cancel-type terminals, reminder scheduling on
    /// confirmation, and queue-token cancellation for abandoned walk-ins.
    pub async fn transition_appointment(
        &self,
        appointment_id: Uuid,
        request: TransitionRequest,
        actor: &str,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!(
            "Transitioning appointment {} to {}",
            appointment_id, request.status
        );

        let current = self.get_appointment(appointment_id, auth_token).await?;
        let now = Utc::now();

        self.lifecycle_service.validate_transition(
            current.status,
            request.status,
            current.scheduled_start_time,
            current.checked_in_at,
            now,
        )?;

        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(request.status.to_string()));
        update_data.insert("last_transition_by".to_string(), json!(actor));
        update_data.insert("last_transition_at".to_string(), json!(now.to_rfc3339()));
        update_data.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        if request.status == AppointmentStatus::CheckedIn {
            update_data.insert("checked_in_at".to_string(), json!(now.to_rfc3339()));
        }

        let updated = self
            .patch_appointment(appointment_id, Value::Object(update_data), auth_token)
            .await?;

        self.run_transition_side_effects(&updated, request.status, auth_token)
            .await;

        info!(
            "Appointment {} transitioned {} -> {} by {}",
            appointment_id, current.status, request.status, actor
        );
        Ok(updated)
    }

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        actor: &str,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Cancelling appointment {}: {}", appointment_id, request.reason);

        self.transition_appointment(
            appointment_id,
            TransitionRequest {
                status: AppointmentStatus::Cancelled,
                reason: Some(request.reason),
            },
            actor,
            auth_token,
        )
        .await
    }

    /// Rescheduling books the replacement first, then retires the original.
    /// The original keeps its history and ends in the `rescheduled`
    /// terminal, which also gives its slot capacity back.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        actor: &str,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Rescheduling appointment {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;

        if current.status.is_terminal() {
            return Err(SchedulingError::InvalidTransition {
                from: current.status,
                to: AppointmentStatus::Rescheduled,
                detail: "appointment is already in a terminal state".to_string(),
            });
        }

        let duration = request.new_duration_minutes.unwrap_or_else(|| {
            (current.scheduled_end_time - current.scheduled_start_time).num_minutes() as i32
        });

        let replacement = self
            .book_appointment(
                BookAppointmentRequest {
                    patient_id: current.patient_id,
                    provider_id: current.provider_id,
                    service: current.service.clone(),
                    location: current.location.clone(),
                    slot_id: request.new_slot_id,
                    window_start: request.new_window_start,
                    duration_minutes: Some(duration),
                    appointment_type: current.appointment_type,
                    device_id: None,
                    client_temp_id: None,
                },
                auth_token,
            )
            .await?;

        self.transition_appointment(
            appointment_id,
            TransitionRequest {
                status: AppointmentStatus::Rescheduled,
                reason: request.reason,
            },
            actor,
            auth_token,
        )
        .await?;

        info!(
            "Appointment {} rescheduled, replacement is {}",
            appointment_id, replacement.id
        );
        Ok(replacement)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(SchedulingError::NotFound);
        }

        serde_json::from_value(result[0].clone()).map_err(|e| {
            SchedulingError::DatabaseError(format!("Failed to parse appointment: {}", e))
        })
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        debug!("Searching appointments with filters: {:?}", query);

        let mut query_parts = Vec::new();

        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(provider_id) = query.provider_id {
            query_parts.push(format!("provider_id=eq.{}", provider_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(appointment_type) = query.appointment_type {
            query_parts.push(format!("appointment_type=eq.{}", appointment_type));
        }
        if let Some(from_date) = query.from_date {
            let encoded = urlencoding::encode(&from_date.to_rfc3339()).into_owned();
            query_parts.push(format!("scheduled_start_time=gte.{}", encoded));
        }
        if let Some(to_date) = query.to_date {
            let encoded = urlencoding::encode(&to_date.to_rfc3339()).into_owned();
            query_parts.push(format!("scheduled_start_time=lte.{}", encoded));
        }

        let mut path = format!(
            "/rest/v1/appointments?{}&order=scheduled_start_time.desc",
            query_parts.join("&")
        );
        if let Some(limit) = query.limit {
            path.push_str(&format!("&limit={}", limit));
        }
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset));
        }

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| {
                SchedulingError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })
    }

    pub async fn find_by_request_id(
        &self,
        request_id: &str,
        auth_token: &str,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let path = format!(
            "/rest/v1/appointments?client_request_id=eq.{}&limit=1",
            urlencoding::encode(request_id)
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                SchedulingError::DatabaseError(format!("Failed to parse appointment: {}", e))
            }),
            None => Ok(None),
        }
    }

    fn validate_booking_request(
        &self,
        request: &BookAppointmentRequest,
    ) -> Result<(), SchedulingError> {
        let now = Utc::now();

        if let Some(duration) = request.duration_minutes {
            if duration < self.validation_rules.min_appointment_duration
                || duration > self.validation_rules.max_appointment_duration
            {
                return Err(SchedulingError::ValidationError(format!(
                    "duration must be between {} and {} minutes",
                    self.validation_rules.min_appointment_duration,
                    self.validation_rules.max_appointment_duration
                )));
            }
        }

        if let Some(start) = request.window_start {
            if start <= now {
                return Err(SchedulingError::ValidationError(
                    "appointment window must start in the future".to_string(),
                ));
            }
            let max_advance =
                now + ChronoDuration::days(self.validation_rules.max_advance_booking_days);
            if start > max_advance {
                return Err(SchedulingError::ValidationError(format!(
                    "appointments can be booked at most {} days in advance",
                    self.validation_rules.max_advance_booking_days
                )));
            }
        }

        if request.slot_id.is_none() && request.window_start.is_none() {
            return Err(SchedulingError::ValidationError(
                "either slot_id or window_start is required".to_string(),
            ));
        }

        // Walk-in and kiosk bookings join a location-scoped queue.
        if request.appointment_type.joins_queue() && request.location.is_none() {
            return Err(SchedulingError::ValidationError(
                "location is required for walk-in and kiosk appointments".to_string(),
            ));
        }

        Ok(())
    }

    async fn create_appointment_record(
        &self,
        request: &BookAppointmentRequest,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        slot_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let now = Utc::now();
        let appointment_number = generate_appointment_number(now);

        let appointment_data = json!({
            "appointment_number": appointment_number,
            "patient_id": request.patient_id,
            "provider_id": request.provider_id,
            "service": request.service,
            "location": request.location,
            "slot_id": slot_id,
            "appointment_type": request.appointment_type.to_string(),
            "status": AppointmentStatus::Scheduled.to_string(),
            "scheduled_start_time": start_time.to_rfc3339(),
            "scheduled_end_time": end_time.to_rfc3339(),
            "client_request_id": request.idempotency_key(),
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(headers),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(SchedulingError::DatabaseError(
                "Failed to create appointment".to_string(),
            ));
        }

        serde_json::from_value(result[0].clone()).map_err(|e| {
            SchedulingError::DatabaseError(format!("Failed to parse created appointment: {}", e))
        })
    }

    async fn attach_queue_token(
        &self,
        appointment: Appointment,
        request: &BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        // Guaranteed by validate_booking_request for queue-joining types.
        let location = request.location.clone().ok_or_else(|| {
            SchedulingError::ValidationError(
                "location is required for walk-in and kiosk appointments".to_string(),
            )
        })?;

        let token = self
            .queue_service
            .join_queue(
                JoinQueueRequest {
                    patient_id: request.patient_id,
                    provider_id: request.provider_id,
                    service: request.service.clone().unwrap_or_else(|| "general".to_string()),
                    location,
                    urgency: 0.5,
                    priority_modifier: 0.0,
                    appointment_id: Some(appointment.id),
                    device_id: request.device_id.clone(),
                    client_temp_id: request.client_temp_id.clone(),
                },
                auth_token,
            )
            .await
            .map_err(|e| SchedulingError::QueueError(e.to_string()))?;

        let updated = self
            .patch_appointment(
                appointment.id,
                json!({
                    "queue_token_id": token.id,
                    "updated_at": Utc::now().to_rfc3339(),
                }),
                auth_token,
            )
            .await?;

        info!(
            "Queue token {} (number {}) attached to appointment {}",
            token.id, token.token_number, appointment.id
        );
        Ok(updated)
    }

    async fn patch_appointment(
        &self,
        appointment_id: Uuid,
        body: Value,
        auth_token: &str,
    ) -> Result<Appointment, SchedulingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(Method::PATCH, &path, Some(auth_token), Some(body), Some(headers))
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(SchedulingError::NotFound);
        }

        serde_json::from_value(result[0].clone()).map_err(|e| {
            SchedulingError::DatabaseError(format!("Failed to parse updated appointment: {}", e))
        })
    }

    /// Side effects never fail the transition itself; failures are logged
    /// and left for the sweeper or an operator to reconcile.
    async fn run_transition_side_effects(
        &self,
        appointment: &Appointment,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) {
        if self.lifecycle_service.releases_capacity(new_status) {
            if let Some(slot_id) = appointment.slot_id {
                if let Err(e) = self.allocator.release(slot_id, 1, auth_token).await {
                    warn!(
                        "Failed to release slot {} for appointment {}: {}",
                        slot_id, appointment.id, e
                    );
                }
            }

            if let Some(token_id) = appointment.queue_token_id {
                if let Err(e) = self
                    .queue_service
                    .update_token_status(token_id, TokenStatus::Cancelled, auth_token)
                    .await
                {
                    warn!(
                        "Failed to cancel queue token {} for appointment {}: {}",
                        token_id, appointment.id, e
                    );
                }
            }
        }

        match self.lifecycle_service.reminder_action(new_status) {
            ReminderAction::Schedule => {
                if let Err(e) = self.schedule_reminder(appointment, auth_token).await {
                    warn!(
                        "Failed to schedule reminder for appointment {}: {}",
                        appointment.id, e
                    );
                }
            }
            ReminderAction::Cancel => {
                if let Err(e) = self.cancel_reminder(appointment.id, auth_token).await {
                    warn!(
                        "Failed to cancel reminder for appointment {}: {}",
                        appointment.id, e
                    );
                }
            }
            ReminderAction::None => {}
        }
    }

    async fn schedule_reminder(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let now = Utc::now();
        let remind_at = (appointment.scheduled_start_time
            - ChronoDuration::hours(REMINDER_LEAD_HOURS))
        .max(now);

        let body = json!({
            "appointment_id": appointment.id,
            "patient_id": appointment.patient_id,
            "remind_at": remind_at.to_rfc3339(),
            "sent_at": Option::<String>::None,
            "created_at": now.to_rfc3339(),
        });

        self.supabase
            .request::<Vec<Value>>(
                Method::POST,
                "/rest/v1/reminder_jobs",
                Some(auth_token),
                Some(body),
            )
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        debug!(
            "Reminder for appointment {} scheduled at {}",
            appointment.id, remind_at
        );
        Ok(())
    }

    async fn cancel_reminder(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        let path = format!(
            "/rest/v1/reminder_jobs?appointment_id=eq.{}&sent_at=is.null",
            appointment_id
        );
        self.supabase
            .request::<Vec<Value>>(Method::DELETE, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

/// Human-readable booking reference, unique enough for front-desk use.
fn generate_appointment_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("APT-{}-{}", now.format("%Y%m%d"), &suffix[..6].to_uppercase())
}
