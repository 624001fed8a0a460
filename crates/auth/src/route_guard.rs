//! Edge route classification and redirect decisions.
//!
//! HTTP-free: the API middleware resolves the session and maps the
//! decision onto a response.

use crate::{Claims, Permission};

pub const LOGIN_PATH: &str = "/login";
pub const FORBIDDEN_PATH: &str = "/403";
pub const ADMIN_PREFIX: &str = "/admin";

/// Paths reachable without a session (besides `/` itself).
pub const PUBLIC_PREFIXES: [&str; 5] = ["/login", "/auth", "/signup", "/forgot-password", "/error"];

/// Permission required for anything under [`ADMIN_PREFIX`].
pub const ADMIN_PERMISSION: Permission = Permission::UserManage;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PathClass {
    Public,
    Admin,
    Protected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Send to the login page, optionally asking it to return afterwards.
    Login { redirect_to: Option<&'static str> },
    /// Authenticated, but lacking the admin permission.
    Forbidden,
}

impl GuardDecision {
    /// Redirect target (`None` when the request proceeds).
    pub fn location(&self) -> Option<String> {
        match self {
            GuardDecision::Allow => None,
            GuardDecision::Login { redirect_to: None } => Some(LOGIN_PATH.to_string()),
            GuardDecision::Login {
                redirect_to: Some(to),
            } => Some(format!("{LOGIN_PATH}?redirectTo={to}")),
            GuardDecision::Forbidden => Some(FORBIDDEN_PATH.to_string()),
        }
    }
}

/// Classify a request path.
///
/// The admin test is a raw prefix match (`/administrator` is admin too);
/// public prefixes must match a whole segment (`/login-as` is not public).
pub fn classify(path: &str) -> PathClass {
    if path.starts_with(ADMIN_PREFIX) {
        return PathClass::Admin;
    }
    if path == "/" || PUBLIC_PREFIXES.iter().any(|p| matches_segment(path, p)) {
        return PathClass::Public;
    }
    PathClass::Protected
}

fn matches_segment(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Decide the fate of a request.
///
/// `session` is `None` for unauthenticated requests and the decoded claims
/// otherwise (possibly empty when the session carries no access token).
pub fn decide(path: &str, session: Option<&Claims>) -> GuardDecision {
    match (classify(path), session) {
        (PathClass::Admin, None) => GuardDecision::Login {
            redirect_to: Some(ADMIN_PREFIX),
        },
        (PathClass::Admin, Some(claims)) if !claims.has_permission(ADMIN_PERMISSION) => {
            GuardDecision::Forbidden
        }
        (PathClass::Admin, Some(_)) => GuardDecision::Allow,
        (PathClass::Public, _) => GuardDecision::Allow,
        (PathClass::Protected, None) => GuardDecision::Login { redirect_to: None },
        (PathClass::Protected, Some(_)) => GuardDecision::Allow,
    }
}
