//! In-process mirror of the database row-level security policies.
//!
//! The SQL `authorize()` function and the table policies are generated from
//! the same constants (`folio-infra::migrations`); this module evaluates the
//! identical predicates so the in-memory stores enforce what Postgres does
//! and the policy semantics are testable without a database.

use serde::Serialize;

use folio_core::SubjectId;

use crate::{Claims, Permission, PolicySnapshot};

/// Tables protected by row-level security.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectedTable {
    Users,
    RolePermissions,
    UserRoles,
}

impl ProtectedTable {
    pub const ALL: [ProtectedTable; 3] = [
        ProtectedTable::Users,
        ProtectedTable::RolePermissions,
        ProtectedTable::UserRoles,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            ProtectedTable::Users => "users",
            ProtectedTable::RolePermissions => "role_permissions",
            ProtectedTable::UserRoles => "user_roles",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowCommand {
    Select,
    Insert,
    Update,
    Delete,
}

impl RowCommand {
    pub const ALL: [RowCommand; 4] = [
        RowCommand::Select,
        RowCommand::Insert,
        RowCommand::Update,
        RowCommand::Delete,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            RowCommand::Select => "SELECT",
            RowCommand::Insert => "INSERT",
            RowCommand::Update => "UPDATE",
            RowCommand::Delete => "DELETE",
        }
    }
}

/// The validated token as seen by the storage engine for one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestJwt<'a> {
    /// `sub` claim.
    pub sub: Option<&'a SubjectId>,
    pub claims: &'a Claims,
}

/// `authorize(permission)`: true iff the token's `user_role` holds
/// `permission` in the permission table.
///
/// Only `user_role` is consulted; the token's own `permissions` list is not
/// trusted at this layer.
pub fn authorize(policy: &PolicySnapshot, claims: &Claims, permission: Permission) -> bool {
    claims
        .user_role
        .is_some_and(|role| policy.grants(role, permission))
}

/// Row predicate for `table` under `command`, as an authenticated request.
///
/// `row_owner` is the row's user id for `users`; ignored elsewhere.
pub fn row_allowed(
    policy: &PolicySnapshot,
    jwt: &RequestJwt<'_>,
    table: ProtectedTable,
    command: RowCommand,
    row_owner: Option<&SubjectId>,
) -> bool {
    let manager = authorize(policy, jwt.claims, Permission::UserManage);
    match (table, command) {
        (ProtectedTable::RolePermissions, _) => manager,
        // No insert policy: rows are created by provisioning, outside RLS.
        (ProtectedTable::Users, RowCommand::Insert) => false,
        (ProtectedTable::Users, RowCommand::Delete) => manager,
        (ProtectedTable::Users, RowCommand::Select | RowCommand::Update) => {
            manager || matches!((jwt.sub, row_owner), (Some(sub), Some(owner)) if sub == owner)
        }
        // Readable only by the token hook's role.
        (ProtectedTable::UserRoles, _) => false,
    }
}
