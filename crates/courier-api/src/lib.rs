pub mod auth;
pub mod enroll;
pub mod middleware;
pub mod sessions;
pub mod settings;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AppState;
use crate::middleware::require_auth;

/// The operations API. Everything except `/health` needs an operator token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(sessions::health));

    let protected_routes = Router::new()
        .route("/stats", get(sessions::stats))
        .route("/sessions", get(sessions::list_sessions))
        .route(
            "/sessions/{remote_id}",
            get(sessions::get_session)
                .post(sessions::start_session)
                .delete(sessions::stop_session),
        )
        .route("/challenges", post(enroll::create_challenge))
        .route("/enroll", post(enroll::enroll))
        .route(
            "/users/{remote_id}/settings",
            get(settings::get_settings).put(settings::put_settings),
        )
        .route("/users/{remote_id}/token/verify", post(enroll::verify_token))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
