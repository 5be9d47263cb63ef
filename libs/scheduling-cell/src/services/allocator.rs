// libs/scheduling-cell/src/services/allocator.rs
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    AlternativeSlot, AvailabilityQuery, AvailabilitySlot, FreeWindow, ReservationResult,
    SchedulingError,
};

const MAX_RESERVE_ATTEMPTS: u32 = 2;

/// Guards `availability_slots.reserved_count`. Every mutation is a
/// conditional PATCH filtered on the count we last read, so a concurrent
/// writer makes the update match zero rows instead of silently
/// overbooking.
pub struct SlotAllocator {
    supabase: Arc<SupabaseClient>,
    lookahead_hours: i64,
}

impl SlotAllocator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            lookahead_hours: config.slot_lookahead_hours,
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>, lookahead_hours: i64) -> Self {
        Self { supabase, lookahead_hours }
    }

    /// Reserve `requested` units of capacity on a slot.
    ///
    /// Retries once on a lost race. If the slot is full, the error carries
    /// alternative slots for the same provider and service inside the
    /// lookahead window.
    pub async fn reserve(
        &self,
        slot_id: Uuid,
        requested: i32,
        auth_token: &str,
    ) -> Result<ReservationResult, SchedulingError> {
        if requested <= 0 {
            return Err(SchedulingError::ValidationError(
                "requested capacity must be positive".to_string(),
            ));
        }

        for attempt in 0..MAX_RESERVE_ATTEMPTS {
            let slot = self.get_slot(slot_id, auth_token).await?;

            if slot.start_time <= Utc::now() {
                info!("Slot {} already started, refusing reservation", slot_id);
                return Err(SchedulingError::SlotUnavailable);
            }

            if !slot.has_capacity_for(requested) {
                info!(
                    "Slot {} full ({}/{}), collecting alternatives",
                    slot_id, slot.reserved_count, slot.capacity
                );
                let alternatives = self
                    .find_alternatives(&slot, requested, auth_token)
                    .await
                    .unwrap_or_default();
                return Err(SchedulingError::CapacityExceeded { alternatives });
            }

            let new_count = slot.reserved_count + requested;
            match self
                .try_set_reserved(slot_id, slot.reserved_count, new_count, auth_token)
                .await?
            {
                Some(updated) => {
                    debug!(
                        "Reserved {} on slot {} ({} -> {})",
                        requested, slot_id, slot.reserved_count, new_count
                    );
                    return Ok(ReservationResult {
                        reserved_count: updated.reserved_count,
                        slot: updated,
                    });
                }
                None => {
                    warn!(
                        "Lost reservation race on slot {} (attempt {})",
                        slot_id,
                        attempt + 1
                    );
                }
            }
        }

        Err(SchedulingError::StaleRead)
    }

    /// Give back capacity. The count never goes below zero even if a
    /// release is replayed against an already released slot.
    pub async fn release(
        &self,
        slot_id: Uuid,
        amount: i32,
        auth_token: &str,
    ) -> Result<(), SchedulingError> {
        if amount <= 0 {
            return Err(SchedulingError::ValidationError(
                "release amount must be positive".to_string(),
            ));
        }

        for attempt in 0..MAX_RESERVE_ATTEMPTS {
            let slot = self.get_slot(slot_id, auth_token).await?;
            let new_count = (slot.reserved_count - amount).max(0);

            if new_count == slot.reserved_count {
                debug!("Release on slot {} is a no-op, count already 0", slot_id);
                return Ok(());
            }

            if self
                .try_set_reserved(slot_id, slot.reserved_count, new_count, auth_token)
                .await?
                .is_some()
            {
                debug!(
                    "Released {} on slot {} ({} -> {})",
                    amount, slot_id, slot.reserved_count, new_count
                );
                return Ok(());
            }

            warn!("Lost release race on slot {} (attempt {})", slot_id, attempt + 1);
        }

        Err(SchedulingError::StaleRead)
    }

    pub async fn get_slot(
        &self,
        slot_id: Uuid,
        auth_token: &str,
    ) -> Result<AvailabilitySlot, SchedulingError> {
        let path = format!("/rest/v1/availability_slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(SchedulingError::SlotNotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse slot: {}", e)))
    }

    /// Free windows for a provider and date, in chronological order.
    pub async fn find_free_windows(
        &self,
        query: &AvailabilityQuery,
        auth_token: &str,
    ) -> Result<Vec<FreeWindow>, SchedulingError> {
        let day_start = query
            .date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| SchedulingError::ValidationError("invalid date".to_string()))?
            .and_utc();
        let day_end = day_start + ChronoDuration::days(1);

        let mut query_parts = vec![
            format!("start_time=gte.{}", urlencoding::encode(&day_start.to_rfc3339())),
            format!("start_time=lt.{}", urlencoding::encode(&day_end.to_rfc3339())),
        ];
        if let Some(provider_id) = query.provider_id {
            query_parts.push(format!("provider_id=eq.{}", provider_id));
        }
        if let Some(service) = &query.service {
            query_parts.push(format!("service=eq.{}", urlencoding::encode(service)));
        }
        if let Some(location) = &query.location {
            query_parts.push(format!("location=eq.{}", urlencoding::encode(location)));
        }

        let path = format!(
            "/rest/v1/availability_slots?{}&order=start_time.asc",
            query_parts.join("&")
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let slots: Vec<AvailabilitySlot> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse slots: {}", e)))?;

        let min_duration = query.duration_minutes.unwrap_or(0) as i64;

        let windows = slots
            .into_iter()
            .filter(|slot| slot.free_capacity() > 0)
            .map(|slot| FreeWindow {
                slot_id: slot.id,
                provider_id: slot.provider_id,
                start_time: slot.start_time,
                end_time: slot.end_time,
                duration_minutes: (slot.end_time - slot.start_time).num_minutes(),
                free_capacity: slot.free_capacity(),
            })
            .filter(|window| window.duration_minutes >= min_duration)
            .collect();

        Ok(windows)
    }

    /// Conditional PATCH keyed on the count we previously read. An empty
    /// representation means another writer moved the count first.
    async fn try_set_reserved(
        &self,
        slot_id: Uuid,
        seen_count: i32,
        new_count: i32,
        auth_token: &str,
    ) -> Result<Option<AvailabilitySlot>, SchedulingError> {
        let path = format!(
            "/rest/v1/availability_slots?id=eq.{}&reserved_count=eq.{}",
            slot_id, seen_count
        );
        let body = json!({
            "reserved_count": new_count,
            "updated_at": Utc::now().to_rfc3339(),
        });

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
            return Ok(None);
        }

        let updated: AvailabilitySlot = serde_json::from_value(result[0].clone())
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse slot: {}", e)))?;

        Ok(Some(updated))
    }

    /// Nearby slots for the same provider and service with room for the
    /// request, soonest first.
    async fn find_alternatives(
        &self,
        full_slot: &AvailabilitySlot,
        requested: i32,
        auth_token: &str,
    ) -> Result<Vec<AlternativeSlot>, SchedulingError> {
        let window_end = full_slot.start_time + ChronoDuration::hours(self.lookahead_hours);

        let path = format!(
            "/rest/v1/availability_slots?provider_id=eq.{}&service=eq.{}&id=neq.{}&start_time=gte.{}&start_time=lte.{}&order=start_time.asc&limit=10",
            full_slot.provider_id,
            urlencoding::encode(&full_slot.service),
            full_slot.id,
            urlencoding::encode(&full_slot.start_time.to_rfc3339()),
            urlencoding::encode(&window_end.to_rfc3339()),
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| SchedulingError::DatabaseError(e.to_string()))?;

        let slots: Vec<AvailabilitySlot> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SchedulingError::DatabaseError(format!("Failed to parse slots: {}", e)))?;

        Ok(slots
            .into_iter()
            .filter(|slot| slot.has_capacity_for(requested))
            .map(|slot| AlternativeSlot {
                slot_id: slot.id,
                provider_id: slot.provider_id,
                start_time: slot.start_time,
                end_time: slot.end_time,
                free_capacity: slot.free_capacity(),
            })
            .collect())
    }
}
