//! Record-level access rules evaluated by the application layer.
//!
//! These run after the route guard and before storage; a request that is
//! authenticated can still be refused here (e.g. reading another user).

use serde::Serialize;
use thiserror::Error;

use folio_core::SubjectId;

use crate::{IdentityRecord, Permission};

/// Operation being attempted on a collection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Access to the administrative UI for the collection.
    Admin,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Admin => "admin",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Inputs to an access predicate.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub principal: Option<&'a IdentityRecord>,
    /// Target record id; `None` for collection-wide operations such as listing.
    pub id: Option<&'a SubjectId>,
}

impl<'a> AccessRequest<'a> {
    pub fn new(principal: Option<&'a IdentityRecord>, id: Option<&'a SubjectId>) -> Self {
        Self { principal, id }
    }

    fn principal_owns_target(&self) -> bool {
        matches!((self.principal, self.id), (Some(p), Some(id)) if p.id() == id)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{operation} denied on collection '{collection}'", operation = .operation.as_str())]
pub struct AccessDenied {
    pub collection: &'static str,
    pub operation: Operation,
}

/// Per-collection access predicates.
pub trait CollectionAccess {
    const SLUG: &'static str;

    fn admin(&self, req: &AccessRequest<'_>) -> bool;
    fn read(&self, req: &AccessRequest<'_>) -> bool;
    fn update(&self, req: &AccessRequest<'_>) -> bool;
    fn delete(&self, req: &AccessRequest<'_>) -> bool;

    fn allows(&self, operation: Operation, req: &AccessRequest<'_>) -> bool {
        match operation {
            Operation::Admin => self.admin(req),
            Operation::Read => self.read(req),
            Operation::Update => self.update(req),
            Operation::Delete => self.delete(req),
        }
    }

    fn check(&self, operation: Operation, req: &AccessRequest<'_>) -> Result<(), AccessDenied> {
        if self.allows(operation, req) {
            Ok(())
        } else {
            Err(AccessDenied {
                collection: Self::SLUG,
                operation,
            })
        }
    }
}

/// Access rules of the `users` collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct UsersAccess;

impl CollectionAccess for UsersAccess {
    const SLUG: &'static str = crate::principal::USERS_COLLECTION;

    fn admin(&self, req: &AccessRequest<'_>) -> bool {
        req.principal
            .is_some_and(|p| p.has_permission(Permission::UserManage))
    }

    fn read(&self, req: &AccessRequest<'_>) -> bool {
        req.principal.is_some() && (req.id.is_none() || req.principal_owns_target())
    }

    fn update(&self, req: &AccessRequest<'_>) -> bool {
        req.principal_owns_target()
    }

    /// No deletion path exists for identity records.
    fn delete(&self, _req: &AccessRequest<'_>) -> bool {
        false
    }
}
