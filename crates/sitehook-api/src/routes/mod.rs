//! API routes.

pub mod health;
pub mod status;
pub mod ui;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the main router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/hooks", webhooks::router())
        .nest("/status", status::router())
        .nest("/ui", ui::router())
        .merge(health::router())
        .with_state(state)
}
