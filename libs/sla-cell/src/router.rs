// libs/sla-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn sla_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/monitoring", get(handlers::get_monitoring))
        .route("/records", post(handlers::register_sla_record))
        .route("/records/{record_id}/resolve", patch(handlers::resolve_sla_record))
        .route("/entities/{entity_id}/escalate", post(handlers::escalate_entity))
        .route("/entities/{entity_id}/events", get(handlers::get_escalation_events))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
