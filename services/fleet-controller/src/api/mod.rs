//! HTTP API handlers and routing.

pub mod error;
mod health;
mod machines;
mod registrations;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .nest("/v1/registrations", registrations::routes())
        .nest("/v1/machines", machines::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
