//! API layer - HTTP handlers and routing
//!
//! Thin composition over the security core. Every route sits behind the
//! admission middleware; the session endpoints additionally use the
//! authentication and CSRF middleware. Business routes mounted by the host
//! application reuse the same layers.

pub mod auth;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};

pub use middleware::{ApiError, AppState, AuthenticatedClaims};

/// Build the main router
pub fn build_router(state: AppState) -> Router {
    // Routes that need a valid session
    let protected_routes = Router::new()
        .route("/session", get(auth::session_info))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Logout mutates cookie state, so it carries the CSRF check
    let csrf_protected_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_csrf,
        ));

    let auth_routes = Router::new()
        .route("/csrf", get(auth::issue_csrf))
        .route("/refresh", post(auth::refresh_session))
        .route("/limit", get(auth::limit_status))
        .merge(protected_routes)
        .merge(csrf_protected_routes);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/auth", auth_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::admission,
        ))
        .with_state(state)
}

/// Liveness probe
async fn health() -> &'static str {
    "ok"
}
