use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role identifier used for RBAC.
///
/// The set is closed and shared by the role-assignment table, the
/// permission table and the token hook. Declaration order is privilege
/// order (most privileged first) and matches the order of the generated
/// `app_role` SQL enum, so `ORDER BY role` in SQL and `Ord` here agree.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Writer,
    User,
    Public,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Writer, Role::User, Role::Public];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Writer => "writer",
            Role::User => "user",
            Role::Public => "public",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Admin => "Site administrator with every permission, including user management",
            Role::Writer => "Author who manages their own posts and comments",
            Role::User => "Registered reader who can comment",
            Role::Public => "Anonymous visitor with read-only access",
        }
    }

    /// The most privileged role of a set, if any.
    pub fn primary(roles: &[Role]) -> Option<Role> {
        roles.iter().copied().min()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}
