//! Push approval endpoints.
//!
//! `POST /api/push/auth` carries both halves of the handshake, selected by
//! `action`: `request` blocks until a decision or timeout, `response`
//! delivers the decision for a `requestId`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use docuchat_common::{AuthOutcome, Subscriber};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
struct AuthActionRequest {
    action: Option<String>,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    #[serde(default)]
    approved: bool,
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    subscription: Option<Subscriber>,
}

pub async fn auth_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: AuthActionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            debug!("Rejecting malformed auth body: {}", e);
            return ApiError::bad_request("Invalid request body").into_response();
        }
    };

    match req.action.as_deref() {
        Some("request") => {
            info!("Push approval requested");
            outcome_response(state.broker.initiate().await)
        }
        Some("response") => {
            let Some(request_id) = req.request_id else {
                return ApiError::bad_request("requestId is required").into_response();
            };
            match state.broker.respond(&request_id, req.approved) {
                Ok(()) => {
                    info!(
                        "Auth request {} {}",
                        request_id,
                        if req.approved { "approved" } else { "denied" }
                    );
                    Json(serde_json::json!({ "success": true })).into_response()
                }
                Err(e) => {
                    debug!("Response for unknown auth request: {}", e);
                    ApiError::bad_request("Invalid or expired request ID").into_response()
                }
            }
        }
        Some(other) => {
            debug!("Unknown auth action: {}", other);
            ApiError::bad_request("Invalid action").into_response()
        }
        None => ApiError::bad_request("Action is required").into_response(),
    }
}

fn outcome_response(outcome: AuthOutcome) -> Response {
    match outcome {
        AuthOutcome::Approved => Json(serde_json::json!({
            "success": true,
            "authenticated": true,
        }))
        .into_response(),
        AuthOutcome::Denied => (
            StatusCode::REQUEST_TIMEOUT,
            Json(serde_json::json!({
                "error": "Authentication denied",
                "outcome": outcome,
            })),
        )
            .into_response(),
        AuthOutcome::TimedOut => (
            StatusCode::REQUEST_TIMEOUT,
            Json(serde_json::json!({
                "error": "Authentication timeout",
                "outcome": outcome,
            })),
        )
            .into_response(),
    }
}

pub async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let req: SubscribeRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid subscription: {}", e)))?;
    let subscription = req
        .subscription
        .ok_or_else(|| ApiError::bad_request("Subscription is required"))?;

    state.subscribers.upsert(subscription)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn subscription_count_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "subscriptions": state.subscribers.len() }))
}

pub async fn vapid_public_key_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = state
        .cfg
        .push
        .vapid_public_key
        .as_deref()
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "VAPID public key not configured"))?;
    Ok(Json(serde_json::json!({ "publicKey": key })))
}
