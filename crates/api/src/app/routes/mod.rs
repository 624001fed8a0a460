use axum::{routing::get, Router};

pub mod admin;
pub mod auth;
pub mod hooks;
pub mod rbac;
pub mod system;
pub mod users;

/// Router for every endpoint behind the route guard.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/api/users", users::router())
        .nest("/auth", auth::router())
        .nest("/admin", admin::router())
}
