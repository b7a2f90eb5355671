use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::handlers;
use crate::state::AppState;

/// Builds the full route table. `/health` is open; every other route
/// checks the shared secret inside its handler.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/messages", post(handlers::messages::create))
        .route("/api/search", post(handlers::search::search))
        .route("/api/ask", post(handlers::search::ask))
        .route("/api/reembed/run", post(handlers::reembed::run))
        .route("/api/jobs/:name", get(handlers::reembed::job_status))
        .route("/api/alerts", get(handlers::alerts::list))
        .route("/api/alerts/:id/ack", post(handlers::alerts::acknowledge))
        .route("/api/import/run", post(handlers::import::run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
