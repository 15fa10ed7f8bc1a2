//! Introspection API
//!
//! - `GET  /health`
//! - `GET  /api/v2/jobs`, `POST /api/v2/jobs/:id/pause`, `POST /api/v2/jobs/:id/resume`
//! - `GET  /api/v2/status`, `/api/v2/anomaly`, `/api/v2/prediction`
//! - `GET  /api/v2/events?limit=N` (recent dashboard events)

pub mod envelope;
pub mod handlers;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Comma-separated list of origins allowed to call the API cross-origin.
pub const CORS_ENV_VAR: &str = "FERMWATCH_CORS_ORIGINS";

fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    match std::env::var(CORS_ENV_VAR) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

fn v2_routes() -> Router<ApiState> {
    Router::new()
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/:id/pause", post(handlers::pause_job))
        .route("/jobs/:id/resume", post(handlers::resume_job))
        .route("/status", get(handlers::status))
        .route("/anomaly", get(handlers::anomaly))
        .route("/prediction", get(handlers::prediction))
        .route("/events", get(handlers::events))
}

pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v2", v2_routes())
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
