//! Email OTP confirmation (sign-up, magic link, recovery, email change).

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::{header, HeaderMap},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use folio_auth::session_cookies;
use folio_infra::identity::OtpType;

use crate::app::services::AppServices;
use crate::middleware::{append_set_cookies, redirect};

pub const ERROR_PATH: &str = "/error";

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub token_hash: Option<String>,
    #[serde(rename = "type")]
    pub otp_type: Option<String>,
    pub next: Option<String>,
}

pub fn router() -> Router {
    Router::new().route("/confirm", get(confirm))
}

/// Only same-site relative paths are followed.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\') =>
        {
            path
        }
        _ => "/",
    }
}

/// GET /auth/confirm?token_hash=..&type=..&next=..
pub async fn confirm(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Query(query): Query<ConfirmQuery>,
) -> axum::response::Response {
    let (Some(token_hash), Some(otp_type)) = (query.token_hash.as_deref(), query.otp_type.as_deref())
    else {
        warn!("confirmation link without token_hash or type");
        return redirect(ERROR_PATH);
    };
    let otp_type = match otp_type.parse::<OtpType>() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "confirmation link with unknown type");
            return redirect(ERROR_PATH);
        }
    };

    let verified = tokio::time::timeout(
        services.session.provider_timeout,
        services.provider.verify_otp(token_hash, otp_type),
    )
    .await;
    let session = match verified {
        Ok(Ok(session)) => session.with_expiry_from(chrono::Utc::now().timestamp()),
        Ok(Err(e)) => {
            warn!(error = %e, "otp verification failed");
            return redirect(ERROR_PATH);
        }
        Err(_) => {
            warn!("otp verification timed out");
            return redirect(ERROR_PATH);
        }
    };

    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok());
    let existing = session_cookies(cookie_header, &services.session.cookie_prefix);
    let set_cookies = match services.session.codec.write(&session, &existing) {
        Ok(values) => values,
        Err(e) => {
            warn!(error = %e, "failed to encode session cookie");
            return redirect(ERROR_PATH);
        }
    };

    let next = safe_next(query.next.as_deref());
    info!(next, "email confirmed");
    let mut response = redirect(next);
    append_set_cookies(response.headers_mut(), &set_cookies);
    response
}
