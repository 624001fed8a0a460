//! Role → permission policy.
//!
//! `SEED` is the canonical policy. The SQL enums, the seed migration, the
//! token hook and the row-level `authorize()` function are all generated from
//! it (see `folio-infra::migrations`), and the application layer evaluates
//! against a `PolicySnapshot` built from it or loaded from the database.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{Permission, Role};

use Permission::*;

/// Seed policy, one entry per role.
pub const SEED: &[(Role, &[Permission])] = &[
    (Role::Admin, &Permission::ALL),
    (
        Role::Writer,
        &[
            ContentCreate,
            ContentRead,
            ContentUpdate,
            ContentDelete,
            CommentCreate,
            CommentRead,
            CommentUpdate,
            CommentDelete,
        ],
    ),
    (
        Role::User,
        &[ContentRead, CommentCreate, CommentRead, CommentUpdate, CommentDelete],
    ),
    (Role::Public, &[ContentRead, CommentRead]),
];

/// Read-only view of the role → permission table.
///
/// Evaluators receive this explicitly instead of reaching for a global, so
/// tests can substitute fixtures without a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySnapshot {
    grants: BTreeMap<Role, BTreeSet<Permission>>,
}

/// Difference between two snapshots, from the point of view of `expected`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyDrift {
    /// Pairs in the expected policy but absent from the actual one.
    pub missing: Vec<(Role, Permission)>,
    /// Pairs present in the actual policy but not expected.
    pub unexpected: Vec<(Role, Permission)>,
}

impl PolicyDrift {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl PolicySnapshot {
    /// Snapshot of the seed policy.
    pub fn seed() -> Self {
        Self::from_rows(
            SEED.iter()
                .flat_map(|(role, perms)| perms.iter().map(move |p| (*role, *p))),
        )
    }

    pub fn from_rows(rows: impl IntoIterator<Item = (Role, Permission)>) -> Self {
        let mut grants: BTreeMap<Role, BTreeSet<Permission>> = BTreeMap::new();
        for (role, perm) in rows {
            grants.entry(role).or_default().insert(perm);
        }
        Self { grants }
    }

    /// True iff `(role, permission)` is a row of the table.
    pub fn grants(&self, role: Role, permission: Permission) -> bool {
        self.grants
            .get(&role)
            .is_some_and(|perms| perms.contains(&permission))
    }

    pub fn permissions_for(&self, role: Role) -> Vec<Permission> {
        self.grants
            .get(&role)
            .map(|perms| perms.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Distinct union of the permissions granted to any of `roles`, sorted.
    pub fn permissions_for_roles(&self, roles: &[Role]) -> Vec<Permission> {
        let union: BTreeSet<Permission> = roles
            .iter()
            .filter_map(|r| self.grants.get(r))
            .flatten()
            .copied()
            .collect();
        union.into_iter().collect()
    }

    pub fn roles_granting(&self, permission: Permission) -> Vec<Role> {
        self.grants
            .iter()
            .filter(|(_, perms)| perms.contains(&permission))
            .map(|(role, _)| *role)
            .collect()
    }

    /// All rows, ordered by role then permission.
    pub fn rows(&self) -> Vec<(Role, Permission)> {
        self.grants
            .iter()
            .flat_map(|(role, perms)| perms.iter().map(move |p| (*role, *p)))
            .collect()
    }

    pub fn drift_from(&self, actual: &PolicySnapshot) -> PolicyDrift {
        let expected: BTreeSet<_> = self.rows().into_iter().collect();
        let actual: BTreeSet<_> = actual.rows().into_iter().collect();
        PolicyDrift {
            missing: expected.difference(&actual).copied().collect(),
            unexpected: actual.difference(&expected).copied().collect(),
        }
    }
}
