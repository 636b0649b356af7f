//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness based on the connection pool

use crate::services::uploader::Uploader;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness check. Always 200 OK with `{"status":"ok"}`.
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
/// HTTP 200 when the pool is open and has at least one healthy
/// connection, HTTP 503 otherwise.
pub async fn readyz(State(uploader): State<Uploader>) -> impl IntoResponse {
    let status = uploader.pool().status();

    let mut checks = HashMap::new();
    checks.insert(
        "pool_open",
        CheckStatus {
            ok: status.open,
            error: (!status.open).then(|| "connection pool is closed".to_string()),
        },
    );
    checks.insert(
        "connections",
        CheckStatus {
            ok: status.healthy > 0,
            error: (status.healthy == 0)
                .then(|| format!("0 of {} connections healthy", status.total)),
        },
    );

    let overall_ok = checks.values().all(|c| c.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let code = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
