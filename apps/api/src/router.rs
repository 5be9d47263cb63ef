use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use queue_cell::router::queue_routes;
use scheduling_cell::router::scheduling_routes;
use shared_config::AppConfig;
use sla_cell::router::sla_routes;
use sync_cell::router::sync_routes;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "CareFlow scheduling API is running!" }))
        .nest("/api/v1/appointments", scheduling_routes(state.clone()))
        .nest("/api/v1/queue", queue_routes(state.clone()))
        .nest("/api/v1/sla", sla_routes(state.clone()))
        .nest("/api/v1/sync", sync_routes(state))
}
