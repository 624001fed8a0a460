//! Lazy provisioning of local user records for provider identities.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use folio_auth::{Claims, ExternalIdentity, IdentityRecord, User};
use folio_core::{DomainError, SubjectId};

use crate::db::{DbScope, StoreError, UserStore};

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot provision identity: {0}")]
    Invalid(#[from] DomainError),

    /// Create conflicted but the conflicting row is not ours (e.g. the email
    /// belongs to another subject).
    #[error("user {0} conflicts with an existing record")]
    Unresolved(SubjectId),
}

/// Find-or-create for the users collection.
#[derive(Clone)]
pub struct ProvisioningService {
    users: Arc<dyn UserStore>,
}

impl ProvisioningService {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Return the local record for `identity`, creating it on first sight.
    ///
    /// The subject id is the primary key, so two concurrent first logins
    /// race on insert; the loser sees a conflict and reads the winner's row.
    #[instrument(skip(self, identity, claims), fields(user_id = %identity.id), err)]
    pub async fn find_or_create(
        &self,
        identity: &ExternalIdentity,
        claims: Claims,
        strategy: &str,
    ) -> Result<IdentityRecord, ProvisioningError> {
        if let Some(user) = self.users.find_by_id(DbScope::Service, &identity.id).await? {
            return Ok(IdentityRecord::new(user, claims, strategy));
        }

        let new_user = User::provision_from(identity)?;
        let user = match self.users.create(&new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, "provisioned user");
                user
            }
            Err(StoreError::Conflict(detail)) => {
                warn!(user_id = %identity.id, %detail, "create conflicted, reading existing record");
                self.users
                    .find_by_id(DbScope::Service, &identity.id)
                    .await?
                    .ok_or_else(|| ProvisioningError::Unresolved(identity.id.clone()))?
            }
            Err(e) => return Err(e.into()),
        };

        Ok(IdentityRecord::new(user, claims, strategy))
    }
}
