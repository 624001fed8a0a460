//! Identity provider client.
//!
//! The provider owns authentication (sign-in, token issuance, OTP delivery);
//! this module only asks it who a session belongs to, refreshes sessions and
//! verifies email OTP links.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use folio_auth::ExternalIdentity;
use folio_core::SubjectId;

pub mod gotrue;
pub mod session_cookie;

pub use gotrue::GoTrueClient;
pub use session_cookie::{CookieOptions, SessionCookieCodec};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("identity provider timed out after {0} ms")]
    Timeout(u128),

    #[error("identity provider unreachable: {0}")]
    Transport(String),

    #[error("identity provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected identity provider response: {0}")]
    Decode(String),
}

/// User object returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl ProviderUser {
    /// Map to the local identity shape; names come from sign-up metadata.
    pub fn to_external(&self) -> Result<ExternalIdentity, ProviderError> {
        let id = SubjectId::parse(self.id.clone())
            .map_err(|e| ProviderError::Decode(format!("user id: {e}")))?;
        let text = |key: &str| {
            self.user_metadata
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Ok(ExternalIdentity {
            id,
            email: self.email.clone().filter(|e| !e.is_empty()),
            first_name: text("first_name"),
            last_name: text("last_name"),
        })
    }
}

/// A provider session as stored in the session cookie and returned by the
/// token endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<ProviderUser>,
}

/// Sessions expiring within this window are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 10;

impl ProviderSession {
    pub fn needs_refresh(&self, now_unix: i64) -> bool {
        self.expires_at
            .is_some_and(|exp| exp.saturating_sub(REFRESH_MARGIN_SECS) <= now_unix)
    }

    /// Fill `expires_at` from `expires_in` when the provider only sent the latter.
    pub fn with_expiry_from(mut self, now_unix: i64) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = self.expires_in.map(|secs| now_unix.saturating_add(secs));
        }
        self
    }
}

/// Email OTP type accepted by `verify`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Signup,
    Invite,
    Magiclink,
    Recovery,
    EmailChange,
    Email,
}

impl std::str::FromStr for OtpType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| ProviderError::Decode(format!("unknown otp type '{s}'")))
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The user owning `access_token`, or `None` when the provider does not
    /// recognise the token (expired, revoked, signed out).
    async fn get_user(&self, access_token: &str) -> Result<Option<ProviderUser>, ProviderError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError>;

    async fn verify_otp(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<ProviderSession, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_names_map_to_identity() {
        let user: ProviderUser = serde_json::from_value(json!({
            "id": "u-1",
            "email": "a@example.com",
            "user_metadata": { "first_name": "Jane", "last_name": "" }
        }))
        .unwrap();

        let identity = user.to_external().unwrap();
        assert_eq!(identity.id.as_str(), "u-1");
        assert_eq!(identity.email.as_deref(), Some("a@example.com"));
        assert_eq!(identity.first_name.as_deref(), Some("Jane"));
        assert_eq!(identity.last_name, None);
    }

    #[test]
    fn refresh_window() {
        let session = ProviderSession {
            access_token: "t".into(),
            refresh_token: Some("r".into()),
            token_type: None,
            expires_in: None,
            expires_at: Some(1_000),
            user: None,
        };
        assert!(!session.needs_refresh(989));
        assert!(session.needs_refresh(990));
        assert!(session.needs_refresh(2_000));
    }

    #[test]
    fn out_of_range_expiry_does_not_overflow() {
        let session = |expires_at| ProviderSession {
            access_token: "t".into(),
            refresh_token: None,
            token_type: None,
            expires_in: None,
            expires_at: Some(expires_at),
            user: None,
        };
        assert!(session(i64::MIN).needs_refresh(1_700_000_000));
        assert!(!session(i64::MAX).needs_refresh(1_700_000_000));

        let mut unbounded = session(0);
        unbounded.expires_at = None;
        unbounded.expires_in = Some(i64::MAX);
        assert_eq!(unbounded.with_expiry_from(10).expires_at, Some(i64::MAX));
    }

    #[test]
    fn otp_types_parse_from_query_values() {
        assert_eq!("email".parse::<OtpType>().unwrap(), OtpType::Email);
        assert_eq!("email_change".parse::<OtpType>().unwrap(), OtpType::EmailChange);
        assert!("sms".parse::<OtpType>().is_err());
    }
}
