//! API routes

pub mod health;
pub mod support;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        // Student routes
        .route("/support/threads", post(support::create_thread))
        .route("/support/threads/my", get(support::my_threads))
        .route("/support/threads/:thread_id", get(support::get_thread))
        .route("/support/threads/:thread_id/messages", post(support::student_send_message))
        .route("/support/threads/:thread_id/rating", post(support::submit_rating))
        // Manager routes
        .route("/support/manager/threads", get(support::manager_threads))
        .route("/support/manager/threads/:thread_id/claim", post(support::claim_thread))
        .route("/support/manager/threads/:thread_id/messages", post(support::manager_send_message))
        .route("/support/manager/threads/:thread_id/status", post(support::update_status))
        .route("/support/manager/threads/:thread_id/transfer", post(support::transfer_thread))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // WebSocket routes (auth handled in handler via query parameter)
    let websocket_routes = Router::new().route("/ws/support", get(ws_handler));

    let api_v1_routes = Router::new()
        .merge(protected_api_routes)
        .merge(websocket_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(state.config.max_request_body_bytes))
        .layer(cors_layer(&state.config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
