//! Static access password.
//!
//! When `access_password` is configured, every protected route requires it
//! either in `x-docuchat-password` or as `Authorization: Bearer <password>`.

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;
use crate::server::AppState;

pub const PASSWORD_HEADER: &str = "x-docuchat-password";

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    #[serde(default)]
    password: String,
}

/// Middleware that requires the access password when one is configured.
pub async fn require_password(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.cfg.access_password.as_deref() else {
        return next.run(req).await;
    };

    let ok = presented_password(req.headers())
        .map(|p| constant_time_eq(p, expected))
        .unwrap_or(false);
    if !ok {
        warn!("Rejected {} {}: missing or wrong access password", req.method(), req.uri().path());
        return ApiError::unauthorized("Access password required").into_response();
    }

    next.run(req).await
}

/// `POST /api/auth/password`: check a password without touching anything else.
pub async fn password_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PasswordRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = payload?;
    match state.cfg.access_password.as_deref() {
        Some(expected) if !constant_time_eq(&req.password, expected) => {
            warn!("Access password check failed");
            Err(ApiError::unauthorized("Invalid password"))
        }
        _ => Ok(Json(serde_json::json!({ "success": true }))),
    }
}

fn presented_password(headers: &HeaderMap) -> Option<&str> {
    if let Some(v) = headers.get(PASSWORD_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(v);
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut v: u8 = 0;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        v |= x ^ y;
    }
    v == 0
}
