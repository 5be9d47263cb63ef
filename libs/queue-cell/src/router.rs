// libs/queue-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn queue_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/join", post(handlers::join_queue))
        .route("/", get(handlers::get_queue))
        .route("/recompute", post(handlers::recompute_queue))
        .route("/tokens/{token_id}", get(handlers::get_token))
        .route("/tokens/{token_id}/status", patch(handlers::update_token_status))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
