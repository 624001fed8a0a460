use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::errors;
use crate::context::CurrentUser;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// The provisioned identity record of the caller.
pub async fn whoami(Extension(current): Extension<CurrentUser>) -> axum::response::Response {
    match current.record() {
        Some(record) => Json(record).into_response(),
        None => errors::unauthenticated(),
    }
}

pub async fn not_found() -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found")
}
