//! The provider's session cookie format.
//!
//! The session JSON is stored under `<prefix><project-ref>-auth-token`,
//! optionally as `base64-<base64url(json)>`, and split into numbered chunks
//! (`name.0`, `name.1`, ...) when it exceeds the per-cookie size budget.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use folio_auth::RequestCookie;

use super::{ProviderError, ProviderSession};

pub const BASE64_PREFIX: &str = "base64-";
pub const MAX_CHUNK_SIZE: usize = 3180;
/// 400 days, the browser maximum.
pub const SESSION_MAX_AGE_SECS: i64 = 34_560_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    pub same_site: &'static str,
    pub secure: bool,
    pub max_age: i64,
}

impl CookieOptions {
    pub fn new(secure: bool) -> Self {
        Self {
            path: "/".to_string(),
            same_site: "Lax",
            secure,
            max_age: SESSION_MAX_AGE_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionCookieCodec {
    storage_key: String,
    options: CookieOptions,
}

impl SessionCookieCodec {
    pub fn new(storage_key: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            storage_key: storage_key.into(),
            options,
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// True for the session cookie itself or one of its chunks.
    pub fn is_session_cookie(&self, name: &str) -> bool {
        name == self.storage_key
            || name
                .strip_prefix(self.storage_key.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|idx| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Reassemble and decode the stored session. `None` when absent or unreadable.
    pub fn read(&self, cookies: &[RequestCookie]) -> Option<ProviderSession> {
        let raw = self.combined(cookies)?;
        let session = decode_value(&raw);
        if session.is_none() {
            tracing::debug!(cookie = %self.storage_key, "session cookie present but unreadable");
        }
        session
    }

    fn combined(&self, cookies: &[RequestCookie]) -> Option<String> {
        let find = |name: &str| cookies.iter().find(|c| c.name == name).map(|c| c.value.as_str());

        if let Some(whole) = find(&self.storage_key) {
            return Some(whole.to_string());
        }

        let mut out = String::new();
        for idx in 0.. {
            match find(&format!("{}.{}", self.storage_key, idx)) {
                Some(part) => out.push_str(part),
                None => break,
            }
        }
        (!out.is_empty()).then_some(out)
    }

    /// `Set-Cookie` values storing `session`, plus expirations for any
    /// previously present session cookies the new layout does not overwrite.
    pub fn write(
        &self,
        session: &ProviderSession,
        existing: &[RequestCookie],
    ) -> Result<Vec<String>, ProviderError> {
        let value = encode_value(session)?;
        let chunks: Vec<&str> = value
            .as_bytes()
            .chunks(MAX_CHUNK_SIZE)
            .filter_map(|c| std::str::from_utf8(c).ok())
            .collect();

        let names: Vec<String> = if chunks.len() == 1 {
            vec![self.storage_key.clone()]
        } else {
            (0..chunks.len())
                .map(|i| format!("{}.{}", self.storage_key, i))
                .collect()
        };

        let mut headers: Vec<String> = names
            .iter()
            .zip(&chunks)
            .map(|(name, chunk)| self.set_header(name, chunk))
            .collect();

        headers.extend(
            existing
                .iter()
                .filter(|c| self.is_session_cookie(&c.name) && !names.contains(&c.name))
                .map(|c| self.clear_header(&c.name)),
        );
        Ok(headers)
    }

    /// Expire every session cookie present in `existing`.
    pub fn clear(&self, existing: &[RequestCookie]) -> Vec<String> {
        existing
            .iter()
            .filter(|c| self.is_session_cookie(&c.name))
            .map(|c| self.clear_header(&c.name))
            .collect()
    }

    fn set_header(&self, name: &str, value: &str) -> String {
        format!(
            "{name}={value}; Path={}; Max-Age={}; SameSite={}{}",
            self.options.path,
            self.options.max_age,
            self.options.same_site,
            if self.options.secure { "; Secure" } else { "" }
        )
    }

    fn clear_header(&self, name: &str) -> String {
        format!(
            "{name}=; Path={}; Max-Age=0; SameSite={}{}",
            self.options.path,
            self.options.same_site,
            if self.options.secure { "; Secure" } else { "" }
        )
    }
}

fn encode_value(session: &ProviderSession) -> Result<String, ProviderError> {
    let json = serde_json::to_vec(session).map_err(|e| ProviderError::Decode(e.to_string()))?;
    Ok(format!("{BASE64_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
}

fn decode_value(raw: &str) -> Option<ProviderSession> {
    let json = match raw.strip_prefix(BASE64_PREFIX) {
        Some(encoded) => {
            let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
            String::from_utf8(bytes).ok()?
        }
        None => raw.to_string(),
    };
    serde_json::from_str(&json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProviderUser;
    use folio_auth::parse_cookie_header;
    use serde_json::Map;

    const KEY: &str = "sb-abcdref-auth-token";

    fn codec() -> SessionCookieCodec {
        SessionCookieCodec::new(KEY, CookieOptions::new(true))
    }

    fn session(metadata_len: usize) -> ProviderSession {
        let mut user_metadata = Map::new();
        user_metadata.insert("bio".into(), "x".repeat(metadata_len).into());
        ProviderSession {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            token_type: Some("bearer".into()),
            expires_in: Some(3600),
            expires_at: Some(1_700_000_000),
            user: Some(ProviderUser {
                id: "u-1".into(),
                email: Some("a@example.com".into()),
                user_metadata,
            }),
        }
    }

    /// What a browser would send back for the given `Set-Cookie` values.
    fn as_request_cookies(set_cookies: &[String]) -> Vec<RequestCookie> {
        let header = set_cookies
            .iter()
            .filter(|h| !h.contains("Max-Age=0"))
            .filter_map(|h| h.split(';').next())
            .collect::<Vec<_>>()
            .join("; ");
        parse_cookie_header(&header)
    }

    #[test]
    fn small_session_is_one_cookie() {
        let headers = codec().write(&session(10), &[]).unwrap();

        assert_eq!(headers.len(), 1);
        assert!(headers[0].starts_with(&format!("{KEY}=base64-")));
        assert!(headers[0].ends_with("; Path=/; Max-Age=34560000; SameSite=Lax; Secure"));
        assert_eq!(codec().read(&as_request_cookies(&headers)), Some(session(10)));
    }

    #[test]
    fn large_session_is_chunked_and_reassembled() {
        let headers = codec().write(&session(8_000), &[]).unwrap();

        assert!(headers.len() >= 3);
        assert!(headers[0].starts_with(&format!("{KEY}.0=base64-")));
        assert!(headers[1].starts_with(&format!("{KEY}.1=")));
        assert_eq!(codec().read(&as_request_cookies(&headers)), Some(session(8_000)));
    }

    #[test]
    fn shrinking_clears_stale_chunks() {
        let codec = codec();
        let before = as_request_cookies(&codec.write(&session(8_000), &[]).unwrap());
        let after = codec.write(&session(10), &before).unwrap();

        assert!(after[0].starts_with(&format!("{KEY}=base64-")));
        let cleared: Vec<_> = after.iter().filter(|h| h.contains("Max-Age=0")).collect();
        assert_eq!(cleared.len(), before.len());
        assert!(cleared.iter().all(|h| h.starts_with(&format!("{KEY}."))));
    }

    #[test]
    fn plain_json_values_are_accepted() {
        let json = serde_json::to_string(&session(1)).unwrap();
        let cookies = vec![RequestCookie::new(KEY, json)];
        assert_eq!(codec().read(&cookies), Some(session(1)));
    }

    #[test]
    fn unrelated_or_garbled_cookies_read_as_none() {
        let codec = codec();
        assert_eq!(codec.read(&[RequestCookie::new("sb-other-auth-token", "{}")]), None);
        assert_eq!(codec.read(&[RequestCookie::new(KEY, "base64-%%%")]), None);
        assert!(codec.is_session_cookie(&format!("{KEY}.12")));
        assert!(!codec.is_session_cookie(&format!("{KEY}.x")));
        assert!(!codec.is_session_cookie(&format!("{KEY}-code-verifier")));
    }
}
