//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that reports quota usage; 503 once full

use crate::{
    state::AppState,
    storage::{QuotaLimits, QuotaReport},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Never touches storage.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Returns 503 while the quota cannot admit another paste, so a balancer can
/// steer uploads elsewhere.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let quota = state.service.quota();
    let full = quota.is_full();
    let body = ReadyResponse {
        status: if full { "full" } else { "ok" },
        backend: state.service.backend_name(),
        usage: quota.report(),
        limits: quota.limits(),
    };
    let status = if full {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    backend: &'static str,
    usage: QuotaReport,
    limits: QuotaLimits,
}
