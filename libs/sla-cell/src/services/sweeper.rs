// libs/sla-cell/src/services/sweeper.rs
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use queue_cell::services::scheduler::QueueSchedulerService;

use crate::models::{SlaStatus, TriggerType};
use crate::services::escalation::EscalationRuleEngine;
use crate::services::notify::NotificationDispatcher;
use crate::services::tracker::SlaTrackerService;

/// Background loop driving the time-based parts of the system on four
/// independent cadences: SLA status refresh with breach detection,
/// time-based escalation evaluation, reminder dispatch, and queue position
/// recomputation.
///
/// Every tick is a bounded, idempotent unit of work. Correctness does not
/// depend on ticks never overlapping; the escalation guards read durable
/// event history, so a slow tick racing the next one cannot double-fire.
pub struct PeriodicSweeper {
    app_config: Arc<AppConfig>,
    is_shutdown: Arc<tokio::sync::RwLock<bool>>,
}

impl PeriodicSweeper {
    pub fn new(app_config: Arc<AppConfig>) -> Self {
        Self {
            app_config,
            is_shutdown: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            "Starting periodic sweeper (sweep {}s, escalation {}s, reminders {}s, queue {}s)",
            self.app_config.sweep_interval_seconds,
            self.app_config.escalation_interval_seconds,
            self.app_config.reminder_interval_seconds,
            self.app_config.queue_recompute_interval_seconds
        );

        let mut handles = Vec::new();

        let sweeper = self.clone_for_tick();
        handles.push(tokio::spawn(async move { sweeper.sla_sweep_loop().await }));

        let sweeper = self.clone_for_tick();
        handles.push(tokio::spawn(async move { sweeper.escalation_loop().await }));

        let sweeper = self.clone_for_tick();
        handles.push(tokio::spawn(async move { sweeper.reminder_loop().await }));

        let sweeper = self.clone_for_tick();
        handles.push(tokio::spawn(async move { sweeper.queue_recompute_loop().await }));

        if let Err(e) = futures::future::try_join_all(handles).await {
            error!("Sweeper task panicked: {}", e);
        }
    }

    pub async fn shutdown(&self) {
        info!("Initiating sweeper shutdown");
        let mut is_shutdown = self.is_shutdown.write().await;
        *is_shutdown = true;
    }

    fn clone_for_tick(&self) -> Self {
        Self {
            app_config: Arc::clone(&self.app_config),
            is_shutdown: Arc::clone(&self.is_shutdown),
        }
    }

    fn make_interval(&self, seconds: u64) -> tokio::time::Interval {
        let mut interval = tokio::time::interval(Duration::from_secs(seconds.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    }

    async fn sla_sweep_loop(&self) {
        let mut interval = self.make_interval(self.app_config.sweep_interval_seconds);
        loop {
            interval.tick().await;
            if *self.is_shutdown.read().await {
                debug!("SLA sweep loop received shutdown signal");
                break;
            }
            self.sweep_sla_records().await;
        }
    }

    async fn escalation_loop(&self) {
        let mut interval = self.make_interval(self.app_config.escalation_interval_seconds);
        loop {
            interval.tick().await;
            if *self.is_shutdown.read().await {
                debug!("Escalation loop received shutdown signal");
                break;
            }
            self.evaluate_time_based_rules().await;
        }
    }

    async fn reminder_loop(&self) {
        let mut interval = self.make_interval(self.app_config.reminder_interval_seconds);
        loop {
            interval.tick().await;
            if *self.is_shutdown.read().await {
                debug!("Reminder loop received shutdown signal");
                break;
            }
            self.dispatch_due_reminders().await;
        }
    }

    async fn queue_recompute_loop(&self) {
        let mut interval = self.make_interval(self.app_config.queue_recompute_interval_seconds);
        loop {
            interval.tick().await;
            if *self.is_shutdown.read().await {
                debug!("Queue recompute loop received shutdown signal");
                break;
            }
            self.recompute_active_queues().await;
        }
    }

    /// Refresh every open SLA record and hand fresh at-risk/breached
    /// transitions to the rule engine. Per-record failures are logged and
    /// the sweep continues.
    #[instrument(skip(self))]
    async fn sweep_sla_records(&self) {
        let tracker = SlaTrackerService::new(&self.app_config);
        let engine = EscalationRuleEngine::new(&self.app_config);
        let token = &self.app_config.supabase_anon_key;
        let now = Utc::now();

        let records = match tracker.list_open(token).await {
            Ok(records) => records,
            Err(e) => {
                warn!("SLA sweep failed to list open records: {}", e);
                return;
            }
        };

        let mut refreshed = 0usize;
        let mut escalated = 0usize;

        for record in &records {
            let (old_status, updated) = match tracker.refresh_record(record, now, token).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Failed to refresh SLA record {}: {}", record.id, e);
                    continue;
                }
            };

            if old_status == updated.status {
                continue;
            }
            refreshed += 1;

            let (trigger, reason) = match updated.status {
                SlaStatus::Breached => (
                    TriggerType::SlaBreach,
                    format!("SLA breached at {}", updated.due_time),
                ),
                SlaStatus::AtRisk => (
                    TriggerType::StatusBased,
                    format!("SLA at risk, due {}", updated.due_time),
                ),
                _ => continue,
            };

            match engine
                .evaluate_and_execute(&updated, trigger, &reason, token)
                .await
            {
                Ok(events) => escalated += events.len(),
                Err(e) => warn!(
                    "Escalation evaluation failed for record {}: {}",
                    updated.id, e
                ),
            }
        }

        if refreshed > 0 || escalated > 0 {
            info!(
                "SLA sweep: {} records checked, {} transitions, {} escalations fired",
                records.len(),
                refreshed,
                escalated
            );
        }
    }

    /// Time-based rules are re-evaluated for every open record on their own
    /// cadence; the cooldown and max-trigger guards keep this idempotent.
    #[instrument(skip(self))]
    async fn evaluate_time_based_rules(&self) {
        let tracker = SlaTrackerService::new(&self.app_config);
        let engine = EscalationRuleEngine::new(&self.app_config);
        let token = &self.app_config.supabase_anon_key;

        let records = match tracker.list_open(token).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Escalation tick failed to list open records: {}", e);
                return;
            }
        };

        let mut fired = 0usize;
        for record in &records {
            match engine
                .evaluate_and_execute(
                    record,
                    TriggerType::TimeBased,
                    "time-based escalation sweep",
                    token,
                )
                .await
            {
                Ok(events) => fired += events.len(),
                Err(e) => warn!(
                    "Time-based evaluation failed for record {}: {}",
                    record.id, e
                ),
            }
        }

        if fired > 0 {
            info!("Escalation tick fired {} events", fired);
        }
    }

    /// Deliver reminders whose time has come and stamp them sent. A job is
    /// only stamped after a successful dispatch, so a failed send is
    /// retried on the next tick.
    #[instrument(skip(self))]
    async fn dispatch_due_reminders(&self) {
        let supabase = SupabaseClient::new(&self.app_config);
        let dispatcher = NotificationDispatcher::new(&self.app_config);
        let token = &self.app_config.supabase_anon_key;
        let now = Utc::now();

        let path = format!(
            "/rest/v1/reminder_jobs?sent_at=is.null&remind_at=lte.{}&limit=50",
            urlencoding::encode(&now.to_rfc3339())
        );

        let jobs: Vec<Value> = match supabase.request(Method::GET, &path, Some(token), None).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Reminder tick failed to fetch due jobs: {}", e);
                return;
            }
        };

        let mut sent = 0usize;
        for job in jobs {
            let (Some(job_id), Some(patient_id), Some(appointment_id)) = (
                job.get("id").and_then(|v| v.as_str()),
                job.get("patient_id").and_then(|v| v.as_str()),
                job.get("appointment_id").and_then(|v| v.as_str()),
            ) else {
                warn!("Skipping malformed reminder job: {}", job);
                continue;
            };

            let message = format!("Reminder: upcoming appointment {}", appointment_id);
            if let Err(e) = dispatcher.dispatch(patient_id, "push", &message).await {
                warn!("Reminder dispatch failed for job {}: {}", job_id, e);
                continue;
            }

            let mark_path = format!("/rest/v1/reminder_jobs?id=eq.{}", job_id);
            let body = json!({ "sent_at": now.to_rfc3339() });
            if let Err(e) = supabase
                .request::<Vec<Value>>(Method::PATCH, &mark_path, Some(token), Some(body))
                .await
            {
                warn!("Failed to mark reminder job {} sent: {}", job_id, e);
                continue;
            }
            sent += 1;
        }

        if sent > 0 {
            info!("Reminder tick dispatched {} reminders", sent);
        }
    }

    /// Keep positions and wait estimates fresh for every queue that still
    /// has active tokens.
    #[instrument(skip(self))]
    async fn recompute_active_queues(&self) {
        let scheduler = QueueSchedulerService::new(&self.app_config);
        let token = &self.app_config.supabase_anon_key;

        let keys = match scheduler.active_queue_keys(token).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Queue recompute tick failed to list active queues: {}", e);
                return;
            }
        };

        for (provider_id, service, location) in keys {
            if let Err(e) = scheduler
                .recompute_queue(provider_id, &service, &location, token)
                .await
            {
                warn!(
                    "Queue recompute failed for provider {} service {} at {}: {}",
                    provider_id, service, location, e
                );
            }
        }
    }
}
