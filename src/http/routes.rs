use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Voice session control
        .route("/voice/state", get(handlers::get_voice_state))
        .route("/voice/connect", post(handlers::connect))
        .route("/voice/speak", post(handlers::speak))
        .route("/voice/stop", post(handlers::stop_speaking))
        .route("/voice/disconnect", post(handlers::disconnect))
        .route("/voice/microphone", post(handlers::request_microphone))
        // Chat persistence
        .route(
            "/chat/history",
            get(handlers::get_history).post(handlers::append_history),
        )
        .route(
            "/chat/offline-queue",
            get(handlers::get_offline_queue)
                .post(handlers::enqueue_offline)
                .delete(handlers::clear_offline_queue),
        )
        // The device UI is served from a different origin during development
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
