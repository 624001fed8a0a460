//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, identity provider and hook wiring
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, HookEndpoint};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: AppServices) -> Router {
    let guard_state = middleware::GuardState {
        resolver: services.resolver(),
    };
    let strategy = services.strategy();
    let hook = services.hook.clone();
    let services = Arc::new(services);

    // Everything except health and the provider hook passes the route guard.
    let guarded = routes::router()
        .fallback(routes::system::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    guard_state,
                    middleware::route_guard,
                ))
                .layer(Extension(services))
                .layer(axum::middleware::from_fn_with_state(
                    strategy,
                    middleware::attach_principal,
                )),
        );

    let mut app = Router::new().route("/health", get(routes::system::health));
    if let Some(hook) = hook {
        app = app.merge(routes::hooks::router(hook));
    }
    app.merge(guarded)
}
