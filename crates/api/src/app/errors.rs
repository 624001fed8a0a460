use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use folio_auth::AccessDenied;
use folio_core::DomainError;
use folio_infra::StoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn unauthenticated() -> axum::response::Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required")
}

/// Access denials never say more than "forbidden".
pub fn forbidden(denied: AccessDenied) -> axum::response::Response {
    tracing::debug!(%denied, "access rule denied request");
    json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden")
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::ReadOnly(field) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "read_only_field",
            format!("'{field}' is managed by the identity provider"),
        ),
        DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", "value already in use"),
        StoreError::InvalidData(_) | StoreError::Storage(_) => {
            tracing::error!(error = %err, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal error")
        }
    }
}
