use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub notification_webhook_url: String,
    /// Cadence of the SLA status refresh / breach detection tick.
    pub sweep_interval_seconds: u64,
    /// Cadence of the escalation evaluation tick.
    pub escalation_interval_seconds: u64,
    /// Cadence of the reminder dispatch tick.
    pub reminder_interval_seconds: u64,
    /// Cadence of the queue position recomputation tick.
    pub queue_recompute_interval_seconds: u64,
    /// How close to the due time a record counts as at-risk.
    pub sla_risk_window_hours: i64,
    /// How far ahead to scan for alternative slots on capacity failure.
    pub slot_lookahead_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("NOTIFICATION_WEBHOOK_URL not set, notifications will be logged only");
                    String::new()
                }),
            sweep_interval_seconds: parse_env_u64("SWEEP_INTERVAL_SECONDS", 60),
            escalation_interval_seconds: parse_env_u64("ESCALATION_INTERVAL_SECONDS", 120),
            reminder_interval_seconds: parse_env_u64("REMINDER_INTERVAL_SECONDS", 300),
            queue_recompute_interval_seconds: parse_env_u64("QUEUE_RECOMPUTE_INTERVAL_SECONDS", 60),
            sla_risk_window_hours: parse_env_i64("SLA_RISK_WINDOW_HOURS", 2),
            slot_lookahead_hours: parse_env_i64("SLOT_LOOKAHEAD_HOURS", 48),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_notification_configured(&self) -> bool {
        !self.notification_webhook_url.is_empty()
    }
}

fn parse_env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", name, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_env_i64(name: &str, default: i64) -> i64 {
    match env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", name, default);
            default
        }),
        Err(_) => default,
    }
}
