// libs/queue-cell/src/services/scheduler.rs
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    JoinQueueRequest, QueueCounter, QueueError, QueueSnapshot, QueueToken, TokenStatus,
};

const DEFAULT_CONSULT_MINUTES: i64 = 30;
const ROLLING_WINDOW: usize = 10;
const MAX_COUNTER_ATTEMPTS: u32 = 3;

/// Priority score on a 0..=100 scale. Urgency owns half the range, time
/// already spent waiting earns up to 30 points so low-urgency patients
/// cannot starve, and the staff modifier is applied last.
pub fn priority_score(urgency: f64, waited_minutes: i64, priority_modifier: f64) -> f64 {
    let wait_bonus = (waited_minutes.max(0) as f64 / 10.0).min(30.0);
    (urgency.clamp(0.0, 1.0) * 50.0 + wait_bonus + priority_modifier).clamp(0.0, 100.0)
}

/// In-memory ordering used by every recompute pass: score descending,
/// ties broken by issue time so equal-priority patients are served in
/// arrival order.
pub fn sort_queue(tokens: &mut [QueueToken]) {
    tokens.sort_by(|a, b| {
        b.priority_score
            .partial_cmp(&a.priority_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.issued_at.cmp(&b.issued_at))
    });
}

pub struct QueueSchedulerService {
    supabase: Arc<SupabaseClient>,
}

impl QueueSchedulerService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// Issue a queue token. Token numbers come from a per location/service/day
    /// counter row bumped with a conditional update, so concurrent joins get
    /// distinct numbers even across providers sharing a location. Replays
    /// with a known idempotency key return the existing token untouched.
    pub async fn join_queue(
        &self,
        request: JoinQueueRequest,
        auth_token: &str,
    ) -> Result<QueueToken, QueueError> {
        if !(0.0..=1.0).contains(&request.urgency) {
            return Err(QueueError::ValidationError(
                "urgency must be between 0.0 and 1.0".to_string(),
            ));
        }

        // Token numbers and queue ordering are both scoped by location.
        if request.location.trim().is_empty() {
            return Err(QueueError::ValidationError(
                "location is required".to_string(),
            ));
        }

        if let Some(key) = request.idempotency_key() {
            if let Some(existing) = self.find_by_request_id(&key, auth_token).await? {
                info!(
                    "Idempotent queue join for key {}, returning token {}",
                    key, existing.id
                );
                return Ok(existing);
            }
        }

        let now = Utc::now();
        let token_number = self
            .next_token_number(&request.location, &request.service, now, auth_token)
            .await?;

        let score = priority_score(request.urgency, 0, request.priority_modifier);

        let token_data = json!({
            "token_number": token_number,
            "patient_id": request.patient_id,
            "provider_id": request.provider_id,
            "service": request.service,
            "location": request.location,
            "appointment_id": request.appointment_id,
            "status": TokenStatus::Waiting.to_string(),
            "urgency": request.urgency,
            "priority_modifier": request.priority_modifier,
            "priority_score": score,
            "client_request_id": request.idempotency_key(),
            "issued_at": now.to_rfc3339(),
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
                "/rest/v1/queue_tokens",
                Some(auth_token),
                Some(token_data),
                Some(headers),
            )
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        let token: QueueToken = result
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::DatabaseError("Failed to create queue token".to_string()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| {
                    QueueError::DatabaseError(format!("Failed to parse queue token: {}", e))
                })
            })?;

        info!(
            "Patient {} joined queue for provider {} with token number {}",
            request.patient_id, request.provider_id, token_number
        );

        self.recompute_queue(
            request.provider_id,
            &request.service,
            &request.location,
            auth_token,
        )
        .await?;

        // Pick up the position and wait estimate the recompute just assigned.
        self.get_token(token.id, auth_token).await
    }

    /// Re-derive scores, positions, and wait estimates for every active
    /// token of one provider/service queue at a location.
    pub async fn recompute_queue(
        &self,
        provider_id: Uuid,
        service: &str,
        location: &str,
        auth_token: &str,
    ) -> Result<QueueSnapshot, QueueError> {
        debug!(
            "Recomputing queue for provider {} service {} at {}",
            provider_id, service, location
        );

        let mut tokens = self
            .active_tokens(provider_id, service, location, auth_token)
            .await?;
        let now = Utc::now();

        for token in tokens.iter_mut() {
            let waited = (now - token.issued_at).num_minutes();
            token.priority_score =
                priority_score(token.urgency, waited, token.priority_modifier);
        }

        sort_queue(&mut tokens);

        let average = self
            .rolling_average_consult_minutes(provider_id, service, auth_token)
            .await
            .unwrap_or(DEFAULT_CONSULT_MINUTES);

        for (index, token) in tokens.iter_mut().enumerate() {
            let position = (index + 1) as i32;
            let estimated_wait = index as i64 * average;
            let seen_updated_at = token.updated_at;
            token.position = Some(position);
            token.estimated_wait_minutes = Some(estimated_wait);

            let body = json!({
                "priority_score": token.priority_score,
                "position": position,
                "estimated_wait_minutes": estimated_wait,
                "updated_at": now.to_rfc3339(),
            });
            // Conditional on the row we read: a recompute working from a
            // stale snapshot must not overwrite a position written from a
            // newer one.
            let path = format!(
                "/rest/v1/queue_tokens?id=eq.{}&updated_at=eq.{}",
                token.id,
                urlencoding::encode(&seen_updated_at.to_rfc3339())
            );
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                "Prefer",
                reqwest::header::HeaderValue::from_static("return=representation"),
            );
            match self
                .supabase
                .request_with_headers::<Vec<Value>>(
                    Method::PATCH,
                    &path,
                    Some(auth_token),
                    Some(body),
                    Some(headers),
                )
                .await
            {
                Ok(result) if result.is_empty() => {
                    debug!(
                        "Token {} changed since read, leaving newer position in place",
                        token.id
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Failed to persist recompute for token {}: {}", token.id, e);
                }
            }
        }

        Ok(QueueSnapshot {
            provider_id,
            service: service.to_string(),
            location: location.to_string(),
            tokens,
            average_consult_minutes: average,
        })
    }

    /// Move a token through its lifecycle, stamping the matching timestamp,
    /// then recompute the queue it belongs to.
    pub async fn update_token_status(
        &self,
        token_id: Uuid,
        new_status: TokenStatus,
        auth_token: &str,
    ) -> Result<QueueToken, QueueError> {
        let current = self.get_token(token_id, auth_token).await?;

        if !valid_token_transition(current.status, new_status) {
            warn!(
                "Invalid token transition attempted: {} -> {}",
                current.status, new_status
            );
            return Err(QueueError::InvalidTransition {
                from: current.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(new_status.to_string()));
        update_data.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        match new_status {
            TokenStatus::Called => {
                update_data.insert("called_at".to_string(), json!(now.to_rfc3339()));
            }
            TokenStatus::InConsultation => {
                update_data.insert("started_at".to_string(), json!(now.to_rfc3339()));
            }
            TokenStatus::Completed => {
                update_data.insert("completed_at".to_string(), json!(now.to_rfc3339()));
            }
            _ => {}
        }

        let path = format!("/rest/v1/queue_tokens?id=eq.{}", token_id);
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(headers),
            )
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        let updated: QueueToken = result
            .into_iter()
            .next()
            .ok_or(QueueError::NotFound)
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| {
                    QueueError::DatabaseError(format!("Failed to parse queue token: {}", e))
                })
            })?;

        info!(
            "Queue token {} transitioned {} -> {}",
            token_id, current.status, new_status
        );

        self.recompute_queue(
            updated.provider_id,
            &updated.service,
            &updated.location,
            auth_token,
        )
        .await?;

        Ok(updated)
    }

    pub async fn get_token(
        &self,
        token_id: Uuid,
        auth_token: &str,
    ) -> Result<QueueToken, QueueError> {
        let path = format!("/rest/v1/queue_tokens?id=eq.{}", token_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(QueueError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| QueueError::DatabaseError(format!("Failed to parse queue token: {}", e)))
    }

    /// Current active queue, ordered the same way the recompute orders it.
    pub async fn get_queue(
        &self,
        provider_id: Uuid,
        service: &str,
        location: &str,
        auth_token: &str,
    ) -> Result<QueueSnapshot, QueueError> {
        let mut tokens = self
            .active_tokens(provider_id, service, location, auth_token)
            .await?;
        sort_queue(&mut tokens);

        let average = self
            .rolling_average_consult_minutes(provider_id, service, auth_token)
            .await
            .unwrap_or(DEFAULT_CONSULT_MINUTES);

        Ok(QueueSnapshot {
            provider_id,
            service: service.to_string(),
            location: location.to_string(),
            tokens,
            average_consult_minutes: average,
        })
    }

    pub async fn find_by_request_id(
        &self,
        request_id: &str,
        auth_token: &str,
    ) -> Result<Option<QueueToken>, QueueError> {
        let path = format!(
            "/rest/v1/queue_tokens?client_request_id=eq.{}&limit=1",
            urlencoding::encode(request_id)
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                QueueError::DatabaseError(format!("Failed to parse queue token: {}", e))
            }),
            None => Ok(None),
        }
    }

    /// All provider/service/location triples that currently have active
    /// tokens. Used by the background recompute to know which queues need
    /// refreshing.
    pub async fn active_queue_keys(
        &self,
        auth_token: &str,
    ) -> Result<Vec<(Uuid, String, String)>, QueueError> {
        let path =
            "/rest/v1/queue_tokens?status=in.(waiting,called)&select=provider_id,service,location";
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        let mut keys: Vec<(Uuid, String, String)> = Vec::new();
        for row in result {
            let provider_id = row
                .get("provider_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok());
            let service = row.get("service").and_then(|v| v.as_str());
            let location = row.get("location").and_then(|v| v.as_str());
            if let (Some(provider_id), Some(service), Some(location)) =
                (provider_id, service, location)
            {
                let key = (provider_id, service.to_string(), location.to_string());
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }

        Ok(keys)
    }

    async fn active_tokens(
        &self,
        provider_id: Uuid,
        service: &str,
        location: &str,
        auth_token: &str,
    ) -> Result<Vec<QueueToken>, QueueError> {
        let path = format!(
            "/rest/v1/queue_tokens?provider_id=eq.{}&service=eq.{}&location=eq.{}&status=in.(waiting,called)&order=issued_at.asc",
            provider_id,
            urlencoding::encode(service),
            urlencoding::encode(location)
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<QueueToken>, _>>()
            .map_err(|e| QueueError::DatabaseError(format!("Failed to parse queue tokens: {}", e)))
    }

    /// Mean consultation duration over the last few completed tokens of
    /// this queue. Falls back to the caller's default when there is no
    /// history yet.
    async fn rolling_average_consult_minutes(
        &self,
        provider_id: Uuid,
        service: &str,
        auth_token: &str,
    ) -> Option<i64> {
        let path = format!(
            "/rest/v1/queue_tokens?provider_id=eq.{}&service=eq.{}&status=eq.completed&started_at=not.is.null&completed_at=not.is.null&order=completed_at.desc&limit={}",
            provider_id,
            urlencoding::encode(service),
            ROLLING_WINDOW
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .ok()?;

        let durations: Vec<i64> = result
            .into_iter()
            .filter_map(|v| serde_json::from_value::<QueueToken>(v).ok())
            .filter_map(|t| match (t.started_at, t.completed_at) {
                (Some(start), Some(end)) => Some((end - start).num_minutes().max(1)),
                _ => None,
            })
            .collect();

        if durations.is_empty() {
            return None;
        }

        Some(durations.iter().sum::<i64>() / durations.len() as i64)
    }

    /// Bump the per location/service/day counter with a conditional update.
    /// A lost race re-reads and retries instead of reusing the number.
    async fn next_token_number(
        &self,
        location: &str,
        service: &str,
        now: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<i64, QueueError> {
        let counter_date = now.date_naive();

        for attempt in 0..MAX_COUNTER_ATTEMPTS {
            let counter = self
                .get_counter(location, service, counter_date, auth_token)
                .await?;

            let counter = match counter {
                Some(counter) => counter,
                None => {
                    match self
                        .create_counter(location, service, counter_date, auth_token)
                        .await?
                    {
                        // Fresh counter starts at 1, which is ours.
                        Some(_) => return Ok(1),
                        // Another join created it first; fall through to CAS.
                        None => continue,
                    }
                }
            };

            let next = counter.last_token_number + 1;
            let path = format!(
                "/rest/v1/queue_counters?id=eq.{}&last_token_number=eq.{}",
                counter.id, counter.last_token_number
            );
            let body = json!({
                "last_token_number": next,
                "updated_at": now.to_rfc3339(),
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
                .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

            if !result.is_empty() {
                return Ok(next);
            }

            warn!(
                "Lost token number race at {} (attempt {})",
                location,
                attempt + 1
            );
        }

        Err(QueueError::StaleRead)
    }

    async fn get_counter(
        &self,
        location: &str,
        service: &str,
        counter_date: chrono::NaiveDate,
        auth_token: &str,
    ) -> Result<Option<QueueCounter>, QueueError> {
        let path = format!(
            "/rest/v1/queue_counters?location=eq.{}&service=eq.{}&counter_date=eq.{}",
            urlencoding::encode(location),
            urlencoding::encode(service),
            counter_date
        );
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| QueueError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                QueueError::DatabaseError(format!("Failed to parse queue counter: {}", e))
            }),
            None => Ok(None),
        }
    }

    /// Returns `None` when a unique violation suggests a concurrent create
    /// won; the caller re-reads and goes through the conditional update.
    async fn create_counter(
        &self,
        location: &str,
        service: &str,
        counter_date: chrono::NaiveDate,
        auth_token: &str,
    ) -> Result<Option<QueueCounter>, QueueError> {
        let body = json!({
            "location": location,
            "service": service,
            "counter_date": counter_date,
            "last_token_number": 1,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );

        match self
            .supabase
            .request_with_headers::<Vec<Value>>(
                Method::POST,
                "/rest/v1/queue_counters",
                Some(auth_token),
                Some(body),
                Some(headers),
            )
            .await
        {
            Ok(result) => match result.into_iter().next() {
                Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                    QueueError::DatabaseError(format!("Failed to parse queue counter: {}", e))
                }),
                None => Ok(None),
            },
            Err(e) => {
                debug!("Counter insert failed, assuming concurrent create: {}", e);
                Ok(None)
            }
        }
    }
}

/// Token lifecycle: waiting -> called -> in_consultation -> completed, with
/// skipped reachable while still queued and cancelled from any active state.
pub fn valid_token_transition(from: TokenStatus, to: TokenStatus) -> bool {
    match from {
        TokenStatus::Waiting => matches!(
            to,
            TokenStatus::Called | TokenStatus::Skipped | TokenStatus::Cancelled
        ),
        TokenStatus::Called => matches!(
            to,
            TokenStatus::InConsultation
                | TokenStatus::Waiting
                | TokenStatus::Skipped
                | TokenStatus::Cancelled
        ),
        TokenStatus::InConsultation => {
            matches!(to, TokenStatus::Completed | TokenStatus::Cancelled)
        }
        TokenStatus::Completed | TokenStatus::Skipped | TokenStatus::Cancelled => false,
    }
}
