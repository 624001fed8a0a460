use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{Permission, Role};

/// Role/permission claims carried by a provider-issued access token.
///
/// Every field defaults to "none": a missing or unreadable token yields
/// `Claims::default()`, which grants nothing. Role and permission strings
/// are validated against the closed enums; unknown values are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_role: Option<Role>,
    #[serde(default)]
    pub user_roles: Vec<Role>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("malformed token: {0}")]
    Malformed(#[from] jsonwebtoken::errors::Error),
}

/// Untrusted shape, read field by field.
#[derive(Debug, Default, Deserialize)]
struct RawClaims {
    #[serde(default)]
    user_role: Value,
    #[serde(default)]
    user_roles: Value,
    #[serde(default)]
    permissions: Value,
}

impl Claims {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn is_empty(&self) -> bool {
        self.user_role.is_none() && self.user_roles.is_empty() && self.permissions.is_empty()
    }

    fn from_raw(raw: RawClaims) -> Self {
        let user_role = match &raw.user_role {
            Value::String(s) => parse_or_drop::<Role>(s, "user_role"),
            _ => None,
        };
        Self {
            user_role,
            user_roles: parse_list(&raw.user_roles, "user_roles"),
            permissions: parse_list(&raw.permissions, "permissions"),
        }
    }
}

fn parse_list<T>(value: &Value, field: &'static str) -> Vec<T>
where
    T: core::str::FromStr + PartialEq,
{
    let Value::Array(items) = value else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let parsed = match item {
            Value::String(s) => parse_or_drop::<T>(s, field),
            _ => None,
        };
        if let Some(v) = parsed {
            if !out.contains(&v) {
                out.push(v);
            }
        }
    }
    out
}

fn parse_or_drop<T: core::str::FromStr>(raw: &str, field: &'static str) -> Option<T> {
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(field, value = raw, "dropping unrecognised claim value");
            None
        }
    }
}

/// Decode claims from a raw access token.
///
/// The signature is **not** verified here: the token must come from the
/// provider's session call, which is the trust boundary. `None` (no session)
/// and undecodable tokens both produce empty claims.
pub fn decode_claims(token: Option<&str>) -> Claims {
    let Some(token) = token else {
        return Claims::default();
    };
    match try_decode_claims(token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(error = %e, "access token could not be decoded; treating as no claims");
            Claims::default()
        }
    }
}

/// Strict variant of [`decode_claims`] that surfaces decoding errors.
pub fn try_decode_claims(token: &str) -> Result<Claims, ClaimsError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<RawClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(Claims::from_raw(data.claims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use proptest::prelude::*;
    use serde_json::json;

    fn mint(claims: Value) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"provider-secret"),
        )
        .unwrap()
    }

    #[test]
    fn no_token_means_no_claims() {
        let claims = decode_claims(None);
        assert_eq!(claims, Claims::default());
        assert!(claims.permissions.is_empty());
        assert_eq!(claims.user_role, None);
    }

    #[test]
    fn decodes_hook_claims() {
        let token = mint(json!({
            "sub": "u-1",
            "aud": "authenticated",
            "exp": 1,
            "user_role": "admin",
            "user_roles": ["admin", "writer"],
            "permissions": ["user.manage", "content.read"],
        }));

        let claims = decode_claims(Some(&token));
        assert_eq!(claims.user_role, Some(Role::Admin));
        assert_eq!(claims.user_roles, vec![Role::Admin, Role::Writer]);
        assert!(claims.has_permission(Permission::UserManage));
        assert!(claims.has_permission(Permission::ContentRead));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let token = mint(json!({ "sub": "u-1" }));
        let claims = decode_claims(Some(&token));
        assert!(claims.is_empty());
    }

    #[test]
    fn null_role_is_none() {
        let token = mint(json!({ "user_role": null, "user_roles": [], "permissions": [] }));
        assert!(decode_claims(Some(&token)).is_empty());
    }

    #[test]
    fn unknown_and_mistyped_values_are_dropped() {
        let token = mint(json!({
            "user_role": "superuser",
            "user_roles": ["writer", 7, "root", "writer"],
            "permissions": "user.manage",
        }));
        let claims = decode_claims(Some(&token));
        assert_eq!(claims.user_role, None);
        assert_eq!(claims.user_roles, vec![Role::Writer]);
        assert!(claims.permissions.is_empty());
    }

    #[test]
    fn garbage_token_fails_closed() {
        assert!(try_decode_claims("not-a-jwt").is_err());
        assert_eq!(decode_claims(Some("not-a-jwt")), Claims::default());
    }

    proptest! {
        #[test]
        fn decoding_is_deterministic(
            role_idx in 0usize..4,
            perm_mask in 0u16..(1 << 13),
        ) {
            let perms: Vec<&str> = Permission::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| perm_mask & (1 << i) != 0)
                .map(|(_, p)| p.as_str())
                .collect();
            let token = mint(json!({
                "user_role": Role::ALL[role_idx].as_str(),
                "permissions": perms,
            }));

            let first = decode_claims(Some(&token));
            let second = decode_claims(Some(&token));
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.permissions.len(), perms.len());
        }
    }
}
