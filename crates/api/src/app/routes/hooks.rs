//! HTTP variant of the custom access token hook.
//!
//! Mounted outside the route guard; the standard-webhooks signature is the
//! only authentication.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tracing::warn;

use folio_auth::AccessTokenHookEvent;
use folio_infra::HookError;

use crate::app::{errors, services::HookEndpoint};

pub const HOOK_PATH: &str = "/hooks/custom-access-token";

pub fn router(hook: HookEndpoint) -> Router {
    Router::new()
        .route(HOOK_PATH, post(custom_access_token))
        .with_state(hook)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /hooks/custom-access-token
pub async fn custom_access_token(
    State(endpoint): State<HookEndpoint>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    if let Err(e) = endpoint.verifier.verify(
        header(&headers, "webhook-id"),
        header(&headers, "webhook-timestamp"),
        header(&headers, "webhook-signature"),
        &body,
        chrono::Utc::now().timestamp(),
    ) {
        warn!(error = %e, "rejected token hook call");
        return errors::json_error(StatusCode::UNAUTHORIZED, "invalid_signature", "invalid signature");
    }

    let event: AccessTokenHookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "malformed_event", e.to_string());
        }
    };

    match endpoint.hook.issue(event).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(HookError::Malformed(msg)) => {
            errors::json_error(StatusCode::BAD_REQUEST, "malformed_event", msg)
        }
        Err(e) => {
            tracing::error!(error = %e, "token hook failed");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "hook_error", "hook failed")
        }
    }
}
