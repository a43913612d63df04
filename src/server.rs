//! HTTP server and routes.

mod handlers;
mod state;

pub use handlers::{AuthUser, basic_credentials};
pub use state::AppState;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/users/auth", get(handlers::authorize))
        .route("/syncs/progress", put(handlers::put_progress))
        .route("/syncs/progress/{document}", get(handlers::get_progress))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::sync_auth,
        ));

    let catalog_routes = Router::new()
        .route("/catalog", get(handlers::catalog))
        .route("/files/{*path}", get(handlers::download_file))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::catalog_auth,
        ));

    let timeout = state.config.server.request_timeout_seconds;

    let mut router = Router::new()
        .route("/users/create", post(handlers::create_user))
        .merge(sync_routes)
        .merge(catalog_routes)
        .layer(middleware::from_fn(handlers::request_cancellation));

    if timeout > 0 {
        router = router.layer(TimeoutLayer::new(Duration::from_secs(timeout)));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
