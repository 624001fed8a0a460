use serde::{Deserialize, Serialize};

use folio_core::SubjectId;

use crate::{Claims, Permission, User};

/// Collection slug of provisioned identities.
pub const USERS_COLLECTION: &str = "users";

/// Name of the authentication strategy that resolves provider sessions.
pub const SESSION_STRATEGY: &str = "supabase";

/// Identity of an authenticated principal as reported by the identity
/// provider (not yet mapped to a local record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: SubjectId,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A provisioned user plus the claims of the session that resolved it.
///
/// Serialises to `{ id, email, first_name, last_name, claims, collection, _strategy }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(flatten)]
    pub user: User,
    pub claims: Claims,
    pub collection: String,
    #[serde(rename = "_strategy")]
    pub strategy: String,
}

impl IdentityRecord {
    pub fn new(user: User, claims: Claims, strategy: impl Into<String>) -> Self {
        Self {
            user,
            claims,
            collection: USERS_COLLECTION.to_string(),
            strategy: strategy.into(),
        }
    }

    pub fn id(&self) -> &SubjectId {
        &self.user.id
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.claims.has_permission(permission)
    }
}
