use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::{Claims, IdentityRecord, Permission, PolicySnapshot, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(Permission),
}

/// Check a permission against the caller's token claims.
///
/// - No IO
/// - No panics
/// - The `permissions` claim is the only input; roles are not re-resolved here.
pub fn authorize(principal: Option<&IdentityRecord>, required: Permission) -> Result<(), AuthzError> {
    let principal = principal.ok_or(AuthzError::Unauthenticated)?;
    if principal.has_permission(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: Permission,
    pub granted: bool,
    pub reason: String,
    pub principal: PrincipalState,
    pub denial_reason: Option<DenialReason>,
}

/// What the token says about the caller.
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalState {
    pub user_role: Option<Role>,
    pub user_roles: Vec<Role>,
    pub token_permissions: Vec<Permission>,
    /// Union over `user_roles` according to the current permission table.
    pub policy_permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// No role grants the permission.
    MissingPermission,
    /// The table grants it to an assigned role but the token predates that grant.
    StaleClaims,
}

/// Explain why `claims` would be allowed or denied `required`.
///
/// The decision itself matches [`authorize`] (token permissions only); the
/// policy is consulted to tell a missing grant apart from a stale token.
pub fn explain_authorization(
    claims: &Claims,
    required: Permission,
    policy: &PolicySnapshot,
) -> AuthorizationExplanation {
    let policy_permissions = policy.permissions_for_roles(&claims.user_roles);
    let state = PrincipalState {
        user_role: claims.user_role,
        user_roles: claims.user_roles.clone(),
        token_permissions: claims.permissions.clone(),
        policy_permissions: policy_permissions.clone(),
    };

    if claims.has_permission(required) {
        return AuthorizationExplanation {
            required_permission: required,
            granted: true,
            reason: format!("Token carries permission '{required}'"),
            principal: state,
            denial_reason: None,
        };
    }

    let granting: Vec<Role> = policy.roles_granting(required);
    let denial = if policy_permissions.contains(&required) {
        DenialReason {
            kind: DenialKind::StaleClaims,
            message: format!(
                "Permission '{required}' is granted to an assigned role but is not in the token"
            ),
            suggestions: vec![
                "Refresh the session so a new access token is issued".to_string(),
            ],
        }
    } else {
        let mut suggestions = vec![format!(
            "Assign one of the roles granting '{required}': {}",
            join_roles(&granting)
        )];
        if granting.is_empty() {
            suggestions = vec![format!("No role currently grants '{required}'")];
        }
        DenialReason {
            kind: DenialKind::MissingPermission,
            message: format!("Missing required permission: '{required}'"),
            suggestions,
        }
    };

    AuthorizationExplanation {
        required_permission: required,
        granted: false,
        reason: format!(
            "Token does not carry permission '{required}'. Current permissions: [{}]",
            claims
                .permissions
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        principal: state,
        denial_reason: Some(denial),
    }
}

fn join_roles(roles: &[Role]) -> String {
    roles.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
}

/// Role definition with its granted permissions (for audit/display).
#[derive(Debug, Clone, Serialize)]
pub struct RoleDefinition {
    pub name: Role,
    pub permissions: Vec<Permission>,
    pub description: &'static str,
}

/// Permission definition (for audit/display).
#[derive(Debug, Clone, Serialize)]
pub struct PermissionDefinition {
    pub name: Permission,
    pub description: String,
    pub category: &'static str,
    pub granted_to: Vec<Role>,
}

/// Registry of all roles and permissions under a given policy.
#[derive(Debug, Clone, Serialize)]
pub struct RbacRegistry {
    pub roles: BTreeMap<Role, RoleDefinition>,
    pub permissions: BTreeMap<Permission, PermissionDefinition>,
}

impl RbacRegistry {
    pub fn from_policy(policy: &PolicySnapshot) -> Self {
        let roles = Role::ALL
            .into_iter()
            .map(|role| {
                (
                    role,
                    RoleDefinition {
                        name: role,
                        permissions: policy.permissions_for(role),
                        description: role.description(),
                    },
                )
            })
            .collect();

        let permissions = Permission::ALL
            .into_iter()
            .map(|perm| {
                (
                    perm,
                    PermissionDefinition {
                        name: perm,
                        description: perm.description(),
                        category: perm.category(),
                        granted_to: policy.roles_granting(perm),
                    },
                )
            })
            .collect();

        Self { roles, permissions }
    }
}
