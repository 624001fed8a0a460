//! Administrative UI backend. The route guard already demands `user.manage`
//! on this prefix; the collection `admin` rule is checked again here.

use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use folio_auth::{AccessRequest, CollectionAccess, Operation, UsersAccess};
use folio_infra::DbScope;

use crate::app::{errors, routes::rbac, services::AppServices};
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .nest("/rbac", rbac::router())
}

/// GET /admin - collections the caller may administer, with their rows.
pub async fn index(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
) -> axum::response::Response {
    let principal = current.record();
    if let Err(denied) = UsersAccess.check(Operation::Admin, &AccessRequest::new(principal, None)) {
        return errors::forbidden(denied);
    }
    let Some(principal) = principal else {
        return errors::unauthenticated();
    };

    match services
        .users
        .list(DbScope::request(principal.id(), &principal.claims))
        .await
    {
        Ok(users) => Json(json!({
            "principal": principal,
            "collections": [{ "slug": UsersAccess::SLUG, "docs": users }],
        }))
        .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
