//! The users collection.
//!
//! Every handler evaluates the collection access rule first and then talks
//! to storage under the caller's claims, so row policies filter again.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use folio_auth::{AccessRequest, CollectionAccess, IdentityRecord, Operation, UserUpdate, UsersAccess};
use folio_core::SubjectId;
use folio_infra::DbScope;

use crate::app::{errors, services::AppServices};
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users))
        .route("/me", get(me))
        .route("/:id", get(get_user).patch(update_user).delete(delete_user))
}

fn scope(principal: &IdentityRecord) -> DbScope<'_> {
    DbScope::request(principal.id(), &principal.claims)
}

/// Run the access rule; on success hand back the principal it was checked for.
fn check<'a>(
    current: &'a CurrentUser,
    operation: Operation,
    id: Option<&SubjectId>,
) -> Result<&'a IdentityRecord, axum::response::Response> {
    let principal = current.record();
    UsersAccess
        .check(operation, &AccessRequest::new(principal, id))
        .map_err(errors::forbidden)?;
    principal.ok_or_else(errors::unauthenticated)
}

fn parse_id(raw: String) -> Result<SubjectId, axum::response::Response> {
    SubjectId::parse(raw).map_err(errors::domain_error_to_response)
}

/// GET /api/users
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
) -> axum::response::Response {
    let principal = match check(&current, Operation::Read, None) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.users.list(scope(principal)).await {
        Ok(users) => Json(serde_json::json!({ "docs": users })).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /api/users/me
pub async fn me(Extension(current): Extension<CurrentUser>) -> axum::response::Response {
    match current.record() {
        Some(record) => Json(serde_json::json!({ "user": record })).into_response(),
        None => errors::unauthenticated(),
    }
}

/// GET /api/users/:id
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let principal = match check(&current, Operation::Read, Some(&id)) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.users.find_by_id(scope(principal), &id).await {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// PATCH /api/users/:id - only `email` is editable.
pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(update): Json<UserUpdate>,
) -> axum::response::Response {
    let id = match parse_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let principal = match check(&current, Operation::Update, Some(&id)) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let email = match update.validate() {
        Ok(email) => email,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let result = match email {
        Some(email) => services.users.update_email(scope(principal), &id, &email).await,
        None => services.users.find_by_id(scope(principal), &id).await,
    };
    match result {
        Ok(Some(user)) => {
            tracing::info!(user_id = %user.id, "user updated");
            Json(user).into_response()
        }
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// DELETE /api/users/:id - identity records are never deleted here.
pub async fn delete_user(
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match check(&current, Operation::Delete, Some(&id)) {
        // No storage path deletes users.
        Ok(_) => errors::json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
        Err(resp) => resp,
    }
}
