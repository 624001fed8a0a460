//! Claim injection performed at token issuance.
//!
//! The identity provider calls the custom access token hook with the claims it
//! is about to sign; the hook answers with the same claims plus the role and
//! permission fields derived from the user's role assignments.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Permission, PolicySnapshot, Role};

/// Payload sent by the provider to the access token hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenHookEvent {
    pub user_id: String,
    #[serde(default)]
    pub claims: Map<String, Value>,
    /// Any other members (`authentication_method`, ...) are carried through.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Claims computed for one user at issuance time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InjectedClaims {
    pub user_role: Option<Role>,
    pub user_roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

/// Derive claims from a user's assigned roles.
///
/// `user_roles` lists every assigned role once, primary first. Permissions
/// are the distinct union over all assigned roles.
pub fn compute_claims(assigned: &[Role], policy: &PolicySnapshot) -> InjectedClaims {
    let mut roles = assigned.to_vec();
    roles.sort();
    roles.dedup();

    InjectedClaims {
        user_role: Role::primary(&roles),
        permissions: policy.permissions_for_roles(&roles),
        user_roles: roles,
    }
}

impl InjectedClaims {
    /// Write the three claim members into `claims`, overwriting any
    /// existing values and leaving other members untouched.
    pub fn apply(&self, claims: &mut Map<String, Value>) {
        claims.insert(
            "user_role".to_string(),
            self.user_role
                .map(|r| Value::String(r.as_str().to_string()))
                .unwrap_or(Value::Null),
        );
        claims.insert(
            "user_roles".to_string(),
            Value::Array(
                self.user_roles
                    .iter()
                    .map(|r| Value::String(r.as_str().to_string()))
                    .collect(),
            ),
        );
        claims.insert(
            "permissions".to_string(),
            Value::Array(
                self.permissions
                    .iter()
                    .map(|p| Value::String(p.as_str().to_string()))
                    .collect(),
            ),
        );
    }
}

impl AccessTokenHookEvent {
    /// Response body for the provider: the event's claims with injected
    /// members applied.
    pub fn into_response(mut self, injected: &InjectedClaims) -> Value {
        injected.apply(&mut self.claims);
        serde_json::json!({ "claims": Value::Object(self.claims) })
    }
}
