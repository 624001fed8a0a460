//! RBAC audit endpoints for transparent authorization debugging.
//!
//! These endpoints provide visibility into the role/permission table and
//! into individual decisions, to answer "why was this request denied?".

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use folio_auth::{
    authorize, compute_claims, explain_authorization, AuthzError, Claims, IdentityRecord,
    Permission, PolicySnapshot, RbacRegistry, Role,
};
use folio_core::SubjectId;
use folio_infra::DbScope;

use crate::app::{errors, services::AppServices};
use crate::context::CurrentUser;

// ─────────────────────────────────────────────────────────────────────────────
// Query Parameters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExplainAuthzQuery {
    pub permission: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/roles", get(list_roles))
        .route("/roles/:name", get(get_role))
        .route("/permissions", get(list_permissions))
        .route("/permissions/:name", get(get_permission))
        .route("/explain", get(explain_authorization_decision))
        .route("/explain/:user_id", get(explain_user_authorization))
        .route(
            "/users/:user_id/roles/:role",
            put(assign_role).delete(revoke_role),
        )
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn require_user_manage(current: &CurrentUser) -> Result<&IdentityRecord, axum::response::Response> {
    let principal = current.record();
    match authorize(principal, Permission::UserManage) {
        Ok(()) => principal.ok_or_else(errors::unauthenticated),
        Err(AuthzError::Unauthenticated) => Err(errors::unauthenticated()),
        Err(AuthzError::Forbidden(_)) => Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "forbidden",
        )),
    }
}

async fn load_policy(services: &AppServices) -> Result<PolicySnapshot, axum::response::Response> {
    services
        .permissions
        .load()
        .await
        .map_err(errors::store_error_to_response)
}

fn parse_permission(raw: &str) -> Result<Permission, axum::response::Response> {
    raw.parse::<Permission>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_permission",
            format!("unknown permission '{raw}'"),
        )
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /admin/rbac/roles - List all roles and their permissions
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
) -> axum::response::Response {
    if let Err(resp) = require_user_manage(&current) {
        return resp;
    }
    let policy = match load_policy(&services).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let registry = RbacRegistry::from_policy(&policy);
    let roles: Vec<_> = registry.roles.into_values().collect();
    (StatusCode::OK, Json(serde_json::json!({ "roles": roles }))).into_response()
}

/// GET /admin/rbac/roles/:name - Details about a specific role
pub async fn get_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
    Path(name): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require_user_manage(&current) {
        return resp;
    }
    let Ok(role) = name.parse::<Role>() else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "role not found");
    };
    let policy = match load_policy(&services).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match RbacRegistry::from_policy(&policy).roles.remove(&role) {
        Some(role) => (StatusCode::OK, Json(serde_json::json!({ "role": role }))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "role not found"),
    }
}

/// GET /admin/rbac/permissions - List all permissions
pub async fn list_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
) -> axum::response::Response {
    if let Err(resp) = require_user_manage(&current) {
        return resp;
    }
    let policy = match load_policy(&services).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let registry = RbacRegistry::from_policy(&policy);
    let permissions: Vec<_> = registry.permissions.into_values().collect();
    (StatusCode::OK, Json(serde_json::json!({ "permissions": permissions }))).into_response()
}

/// GET /admin/rbac/permissions/:name - Details about a specific permission
pub async fn get_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
    Path(name): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require_user_manage(&current) {
        return resp;
    }
    let Ok(permission) = name.parse::<Permission>() else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "permission not found");
    };
    let policy = match load_policy(&services).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match RbacRegistry::from_policy(&policy).permissions.remove(&permission) {
        Some(perm) => {
            (StatusCode::OK, Json(serde_json::json!({ "permission": perm }))).into_response()
        }
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "permission not found"),
    }
}

/// GET /admin/rbac/explain?permission=X - Explain the decision for the caller's own token
pub async fn explain_authorization_decision(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
    Query(query): Query<ExplainAuthzQuery>,
) -> axum::response::Response {
    let principal = match require_user_manage(&current) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let required = match parse_permission(&query.permission) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let policy = match load_policy(&services).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let explanation = explain_authorization(&principal.claims, required, &policy);
    (StatusCode::OK, Json(serde_json::json!({ "explanation": explanation }))).into_response()
}

/// GET /admin/rbac/explain/:user_id?permission=X - Explain the decision for
/// the token another user would be issued right now
pub async fn explain_user_authorization(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
    Path(user_id): Path<String>,
    Query(query): Query<ExplainAuthzQuery>,
) -> axum::response::Response {
    let principal = match require_user_manage(&current) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let user_id = match SubjectId::parse(user_id) {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let required = match parse_permission(&query.permission) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let scope = DbScope::request(principal.id(), &principal.claims);
    let user = match services.users.find_by_id(scope, &user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(e) => return errors::store_error_to_response(e),
    };
    let roles = match services.assignments.roles_for(&user_id).await {
        Ok(roles) => roles,
        Err(e) => return errors::store_error_to_response(e),
    };
    let policy = match load_policy(&services).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let injected = compute_claims(&roles, &policy);
    let claims = Claims {
        user_role: injected.user_role,
        user_roles: injected.user_roles,
        permissions: injected.permissions,
    };
    let explanation = explain_authorization(&claims, required, &policy);

    (StatusCode::OK, Json(serde_json::json!({
        "user_id": user.id,
        "user_email": user.email,
        "explanation": explanation,
    }))).into_response()
}

/// PUT /admin/rbac/users/:user_id/roles/:role - Assign a role (idempotent).
///
/// Takes effect at the user's next token issuance.
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
    Path((user_id, role)): Path<(String, String)>,
) -> axum::response::Response {
    let principal = match require_user_manage(&current) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let (user_id, role) = match parse_assignment(user_id, &role) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match services.assignments.assign(&user_id, role).await {
        Ok(()) => {
            tracing::info!(by = %principal.id(), %user_id, %role, "role assigned");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// DELETE /admin/rbac/users/:user_id/roles/:role - Revoke a role.
pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentUser>,
    Path((user_id, role)): Path<(String, String)>,
) -> axum::response::Response {
    let principal = match require_user_manage(&current) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let (user_id, role) = match parse_assignment(user_id, &role) {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    match services.assignments.revoke(&user_id, role).await {
        Ok(true) => {
            tracing::info!(by = %principal.id(), %user_id, %role, "role revoked");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "role not assigned"),
        Err(e) => errors::store_error_to_response(e),
    }
}

fn parse_assignment(
    user_id: String,
    role: &str,
) -> Result<(SubjectId, Role), axum::response::Response> {
    let user_id = SubjectId::parse(user_id).map_err(errors::domain_error_to_response)?;
    let role = role.parse::<Role>().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_role",
            format!("unknown role '{role}'"),
        )
    })?;
    Ok((user_id, role))
}
