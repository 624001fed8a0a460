use std::collections::HashSet;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use folio_auth::route_guard::decide;

use crate::context::CurrentUser;
use crate::session::{ResolvedSession, SessionResolver, SupabaseStrategy};

#[derive(Clone)]
pub struct GuardState {
    pub resolver: SessionResolver,
}

/// Edge route guard.
///
/// Resolves the session once, classifies the path, and either lets the
/// request through or answers with a temporary redirect. Cookies written by
/// the provider client during resolution are copied onto whatever response
/// leaves, redirects included.
pub async fn route_guard(
    State(state): State<GuardState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let cookie_header = joined_cookie_header(req.headers());
    let session = state.resolver.resolve(cookie_header.as_deref()).await;
    let path = req.uri().path().to_string();

    let decision = decide(&path, session.claims());
    let set_cookies = session.set_cookies.clone();

    let mut response = match decision.location() {
        None => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        Some(location) => {
            debug!(%path, %location, "route guard redirect");
            redirect(&location)
        }
    };

    append_set_cookies(response.headers_mut(), &set_cookies);
    response
}

/// Attach the provisioned principal for handlers.
///
/// Reuses the session the guard already resolved; provisioning happens here
/// and only here.
pub async fn attach_principal(
    State(strategy): State<SupabaseStrategy>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let resolved = req.extensions().get::<ResolvedSession>().cloned();
    let principal = match resolved {
        Some(session) => strategy.provision(&session).await,
        None => {
            let cookie_header = joined_cookie_header(req.headers());
            strategy.authenticate(cookie_header.as_deref()).await
        }
    };

    req.extensions_mut().insert(CurrentUser(principal));
    next.run(req).await
}

pub fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => {
            warn!(location, "unencodable redirect target");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// HTTP/2 clients may split cookies over several headers.
fn joined_cookie_header(headers: &HeaderMap) -> Option<String> {
    let parts: Vec<&str> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

/// Append `Set-Cookie` values, leaving alone any cookie the handler already set.
pub fn append_set_cookies(headers: &mut HeaderMap, set_cookies: &[String]) {
    let already: HashSet<String> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(cookie_name)
        .map(str::to_string)
        .collect();

    for value in set_cookies {
        if cookie_name(value).is_some_and(|name| already.contains(name)) {
            continue;
        }
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.append(header::SET_COOKIE, v);
            }
            Err(_) => warn!("dropping unencodable Set-Cookie value"),
        }
    }
}

fn cookie_name(set_cookie: &str) -> Option<&str> {
    set_cookie.split_once('=').map(|(name, _)| name.trim())
}
