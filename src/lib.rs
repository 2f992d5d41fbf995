//! Time-limited paste store: pluggable backends, quota admission, expiry
//! timers and crash recovery, with a thin HTTP layer on top.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
pub mod units;

use axum::Router;
use state::AppState;

/// Build the application router; uploads above `max_size` bytes are refused.
pub fn app(state: AppState, max_size: usize) -> Router {
    routes::routes::routes(max_size).with_state(state)
}
