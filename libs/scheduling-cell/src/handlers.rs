// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, NaiveDate, Utc};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentSearchQuery, AppointmentStatus, AppointmentType, AvailabilityQuery,
    BookAppointmentRequest, CancelAppointmentRequest, RescheduleAppointmentRequest,
    SchedulingError, TransitionRequest,
};
use crate::services::allocator::SlotAllocator;
use crate::services::booking::AppointmentBookingService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub patient_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub appointment_type: Option<AppointmentType>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQueryParams {
    pub provider_id: Option<Uuid>,
    pub date: NaiveDate,
    pub duration_minutes: Option<i32>,
    pub service: Option<String>,
    pub location: Option<String>,
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Response, AppError> {
    let token = auth.token();

    let is_patient = request.patient_id.to_string() == user.id;
    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));

    if !is_patient && !is_staff {
        return Err(AppError::Auth(
            "Not authorized to book appointment for this patient".to_string(),
        ));
    }

    let booking_service = AppointmentBookingService::new(&state);

    match booking_service.book_appointment(request, token).await {
        Ok(appointment) => Ok(Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment booked successfully"
        }))
        .into_response()),
        // A full slot answers 409 and carries bookable alternatives so the
        // client can re-offer without another round trip.
        Err(SchedulingError::CapacityExceeded { alternatives }) => Ok((
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "error": "Slot capacity exceeded",
                "alternatives": alternatives
            })),
        )
            .into_response()),
        Err(e) => Err(map_scheduling_error(e)),
    }
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    let is_patient = appointment.patient_id.to_string() == user.id;
    let is_provider = appointment.provider_id.to_string() == user.id;
    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));

    if !is_patient && !is_provider && !is_staff {
        return Err(AppError::Auth(
            "Not authorized to view this appointment".to_string(),
        ));
    }

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<AppointmentQueryParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));
    let is_own_search = params
        .patient_id
        .map(|id| id.to_string() == user.id)
        .unwrap_or(false);

    if !is_staff && !is_own_search {
        return Err(AppError::Auth(
            "Patients can only search their own appointments".to_string(),
        ));
    }

    let booking_service = AppointmentBookingService::new(&state);
    let appointments = booking_service
        .search_appointments(
            AppointmentSearchQuery {
                patient_id: params.patient_id,
                provider_id: params.provider_id,
                status: params.status,
                appointment_type: params.appointment_type,
                from_date: params.from_date,
                to_date: params.to_date,
                limit: params.limit,
                offset: params.offset,
            },
            token,
        )
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "count": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn transition_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));
    let is_patient = appointment.patient_id.to_string() == user.id;

    // Patients may confirm, check in, or cancel their own appointment.
    // Everything else is staff-side.
    let patient_allowed = matches!(
        request.status,
        AppointmentStatus::Confirmed | AppointmentStatus::CheckedIn | AppointmentStatus::Cancelled
    );
    if !is_staff && !(is_patient && patient_allowed) {
        return Err(AppError::Auth(
            "Not authorized to apply this status change".to_string(),
        ));
    }

    let updated = booking_service
        .transition_appointment(appointment_id, request, &user.id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": updated
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    let is_patient = appointment.patient_id.to_string() == user.id;
    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));
    if !is_patient && !is_staff {
        return Err(AppError::Auth(
            "Not authorized to reschedule this appointment".to_string(),
        ));
    }

    let replacement = booking_service
        .reschedule_appointment(appointment_id, request, &user.id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": replacement,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, token)
        .await
        .map_err(map_scheduling_error)?;

    let is_patient = appointment.patient_id.to_string() == user.id;
    let is_staff = matches!(user.role.as_deref(), Some("staff") | Some("admin"));
    if !is_patient && !is_staff {
        return Err(AppError::Auth(
            "Not authorized to cancel this appointment".to_string(),
        ));
    }

    let cancelled = booking_service
        .cancel_appointment(appointment_id, request, &user.id, token)
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": cancelled,
        "message": "Appointment cancelled successfully"
    })))
}

// ==============================================================================
// AVAILABILITY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_free_windows(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<AvailabilityQueryParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let allocator = SlotAllocator::new(&state);

    let windows = allocator
        .find_free_windows(
            &AvailabilityQuery {
                provider_id: params.provider_id,
                date: params.date,
                duration_minutes: params.duration_minutes,
                service: params.service,
                location: params.location,
            },
            token,
        )
        .await
        .map_err(map_scheduling_error)?;

    Ok(Json(json!({
        "windows": windows,
        "count": windows.len()
    })))
}

fn map_scheduling_error(e: SchedulingError) -> AppError {
    match e {
        SchedulingError::SlotNotFound => AppError::NotFound("Slot not found".to_string()),
        SchedulingError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        SchedulingError::SlotUnavailable => {
            AppError::BadRequest("Slot no longer available".to_string())
        }
        SchedulingError::CapacityExceeded { .. } => {
            AppError::Conflict("Slot capacity exceeded".to_string())
        }
        SchedulingError::StaleRead => {
            AppError::Conflict("Concurrent modification, please retry".to_string())
        }
        SchedulingError::InvalidTransition { from, to, detail } => AppError::Unprocessable(format!(
            "Cannot transition from {} to {}: {}",
            from, to, detail
        )),
        SchedulingError::ValidationError(msg) => AppError::BadRequest(msg),
        _ => AppError::Internal(e.to_string()),
    }
}
