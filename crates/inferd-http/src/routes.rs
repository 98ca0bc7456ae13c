//! Route definitions and router construction.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Assemble the full HTTP surface.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // OpenAI-compatible completion surface
        .route("/v1/chat/completions", post(handlers::completions::chat))
        .route("/v1/completions", post(handlers::completions::text))
        .route(
            "/v1/inference/chat/completions",
            post(handlers::completions::inference_passthrough),
        )
        // Engine registry
        .route("/v1/models", get(handlers::engines::list_models))
        .route("/v1/engines", post(handlers::engines::create))
        .route("/v1/engines/:id", delete(handlers::engines::remove))
        .route("/v1/engines/:id/status", get(handlers::engines::status))
        .route(
            "/download-progress/:model_id",
            get(handlers::engines::download_progress),
        )
        // Metrics
        .route("/metrics", get(handlers::metrics::combined))
        .route("/v1/metrics", get(handlers::metrics::combined))
        .route("/completion-metrics", get(handlers::metrics::completion))
        // Agent fleet
        .route(
            "/v1/agents",
            get(handlers::agents::list).post(handlers::agents::create),
        )
        .route(
            "/v1/agents/system/status",
            get(handlers::agents::system_status),
        )
        .route(
            "/v1/agents/:id",
            get(handlers::agents::get).delete(handlers::agents::remove),
        )
        .route("/v1/agents/:id/execute", post(handlers::agents::execute))
        .route("/v1/agents/:id/chat", post(handlers::agents::chat))
        .route("/v1/agents/:id/generate", post(handlers::agents::generate))
        .route("/v1/agents/:id/respond", post(handlers::agents::respond))
        .route("/v1/agents/:id/message", post(handlers::agents::message))
        // Workflows
        .nest("/api/v1/sequential-workflows", handlers::workflows::routes())
        .nest("/api/v1/orchestration", handlers::orchestration::routes())
        .nest("/api/v1/auto-setup", handlers::auto_setup::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub(crate) async fn health_check() -> &'static str {
    "OK"
}
