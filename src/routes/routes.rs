//! Routes for the paste API.
//!
//! - `POST   /`     : store the `paste` form field, answer with its URL
//! - `GET    /{id}` : serve a paste
//! - `DELETE /{id}` : remove a paste early
//! - `GET    /healthz`, `GET /readyz`: health checks

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        paste_handlers::{create_paste, delete_paste, get_paste},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Upload bodies larger than `max_size` bytes are refused
/// with 413 before any storage work happens.
pub fn routes(max_size: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/",
            post(create_paste).layer(DefaultBodyLimit::max(max_size)),
        )
        .route("/{id}", get(get_paste).delete(delete_paste))
}
