use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use lockwarden_core::AppError;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, middleware};

/// Attribute path discriminating concurrent greetings.
const GREETING_LOCK_TEMPLATE: &str = "headers.user-id";

pub fn build_router(app_state: AppState) -> Result<Router, AppError> {
    let guarded_routes = Router::new()
        .route("/", get(handlers::hello::hello_handler))
        .route_layer(from_fn_with_state(
            app_state.request_lock(GREETING_LOCK_TEMPLATE)?,
            middleware::lock_request,
        ));

    Ok(Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(guarded_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state))
}
