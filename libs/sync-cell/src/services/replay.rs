// libs/sync-cell/src/services/replay.rs
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use queue_cell::models::JoinQueueRequest;
use queue_cell::services::scheduler::QueueSchedulerService;
use scheduling_cell::models::BookAppointmentRequest;
use scheduling_cell::services::booking::AppointmentBookingService;

use crate::models::{
    ReplayBatchRequest, ReplayBatchResponse, ReplayOutcome, SyncAction, SyncEntityType, SyncError,
    SyncItem,
};

/// Replays offline-captured actions through the same booking and queue
/// services the online paths use. Those services already dedupe on the
/// device/client idempotency key, so this layer only routes payloads,
/// detects whether an item was a replay, and appends the audit log.
pub struct SyncReplayService {
    supabase: Arc<SupabaseClient>,
    booking_service: AppointmentBookingService,
    queue_service: QueueSchedulerService,
}

impl SyncReplayService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            booking_service: AppointmentBookingService::new(config),
            queue_service: QueueSchedulerService::new(config),
        }
    }

    pub async fn replay_batch(
        &self,
        request: ReplayBatchRequest,
        auth_token: &str,
    ) -> Result<ReplayBatchResponse, SyncError> {
        if request.device_id.trim().is_empty() {
            return Err(SyncError::ValidationError(
                "device_id is required".to_string(),
            ));
        }

        info!(
            "Replaying sync batch of {} items from device {}",
            request.items.len(),
            request.device_id
        );

        let mut outcomes = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let outcome = self
                .replay_item(&request.device_id, item, auth_token)
                .await;
            self.append_log(&request.device_id, item, &outcome, auth_token)
                .await;
            outcomes.push(outcome);
        }

        let applied = outcomes.iter().filter(|o| o.success && !o.replayed).count();
        let replayed = outcomes.iter().filter(|o| o.replayed).count();
        let failed = outcomes.iter().filter(|o| !o.success).count();

        info!(
            "Sync batch from device {} done: {} applied, {} replayed, {} failed",
            request.device_id, applied, replayed, failed
        );

        Ok(ReplayBatchResponse {
            device_id: request.device_id,
            outcomes,
            applied,
            replayed,
            failed,
        })
    }

    async fn replay_item(
        &self,
        device_id: &str,
        item: &SyncItem,
        auth_token: &str,
    ) -> ReplayOutcome {
        let key = format!("{}:{}", device_id, item.client_temp_id);

        let result = match (item.entity_type, item.action) {
            (SyncEntityType::Appointment, SyncAction::Create) => {
                self.replay_appointment(device_id, item, &key, auth_token).await
            }
            (SyncEntityType::QueueToken, SyncAction::Create) => {
                self.replay_queue_join(device_id, item, &key, auth_token).await
            }
        };

        match result {
            Ok((entity_id, replayed)) => ReplayOutcome {
                client_temp_id: item.client_temp_id.clone(),
                entity_type: item.entity_type,
                entity_id: Some(entity_id),
                replayed,
                success: true,
                error: None,
            },
            Err(e) => {
                warn!(
                    "Sync item {} from device {} failed: {}",
                    item.client_temp_id, device_id, e
                );
                ReplayOutcome {
                    client_temp_id: item.client_temp_id.clone(),
                    entity_type: item.entity_type,
                    entity_id: None,
                    replayed: false,
                    success: false,
                    error: Some(e),
                }
            }
        }
    }

    async fn replay_appointment(
        &self,
        device_id: &str,
        item: &SyncItem,
        key: &str,
        auth_token: &str,
    ) -> Result<(Uuid, bool), String> {
        // Distinguish a fresh apply from an idempotent replay before the
        // booking path collapses the two.
        let existing = self
            .booking_service
            .find_by_request_id(key, auth_token)
            .await
            .map_err(|e| e.to_string())?;
        if let Some(appointment) = existing {
            return Ok((appointment.id, true));
        }

        let mut booking: BookAppointmentRequest =
            serde_json::from_value(item.payload.clone())
                .map_err(|e| format!("invalid appointment payload: {}", e))?;
        booking.device_id = Some(device_id.to_string());
        booking.client_temp_id = Some(item.client_temp_id.clone());

        let appointment = self
            .booking_service
            .book_appointment(booking, auth_token)
            .await
            .map_err(|e| e.to_string())?;
        Ok((appointment.id, false))
    }

    async fn replay_queue_join(
        &self,
        device_id: &str,
        item: &SyncItem,
        key: &str,
        auth_token: &str,
    ) -> Result<(Uuid, bool), String> {
        let existing = self
            .queue_service
            .find_by_request_id(key, auth_token)
            .await
            .map_err(|e| e.to_string())?;
        if let Some(token) = existing {
            return Ok((token.id, true));
        }

        let mut join: JoinQueueRequest = serde_json::from_value(item.payload.clone())
            .map_err(|e| format!("invalid queue payload: {}", e))?;
        join.device_id = Some(device_id.to_string());
        join.client_temp_id = Some(item.client_temp_id.clone());

        let token = self
            .queue_service
            .join_queue(join, auth_token)
            .await
            .map_err(|e| e.to_string())?;
        Ok((token.id, false))
    }

    /// Append-only audit row per replayed item. Log failures never fail
    /// the replay itself.
    async fn append_log(
        &self,
        device_id: &str,
        item: &SyncItem,
        outcome: &ReplayOutcome,
        auth_token: &str,
    ) {
        let body = json!({
            "device_id": device_id,
            "client_temp_id": item.client_temp_id,
            "entity_type": item.entity_type.to_string(),
            "action": item.action.to_string(),
            "payload": item.payload,
            "result_entity_id": outcome.entity_id,
            "replayed": outcome.replayed,
            "success": outcome.success,
            "error_message": outcome.error,
            "created_at": Utc::now().to_rfc3339(),
        });

        if let Err(e) = self
            .supabase
            .request::<Vec<Value>>(Method::POST, "/rest/v1/sync_log", Some(auth_token), Some(body))
            .await
        {
            warn!(
                "Failed to append sync log for item {} from device {}: {}",
                item.client_temp_id, device_id, e
            );
        }
    }
}
