//! Role assignment store: `(user_id, role)` pairs.
//!
//! Only the token hook reads this table; end-user requests have no access
//! to it at all.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use folio_auth::Role;
use folio_core::SubjectId;

use super::{map_sqlx_error, StoreError};

#[async_trait]
pub trait RoleAssignmentStore: Send + Sync {
    /// Assigned roles, most privileged first. Empty when none.
    async fn roles_for(&self, user_id: &SubjectId) -> Result<Vec<Role>, StoreError>;

    /// Idempotent: assigning an existing pair is not an error.
    async fn assign(&self, user_id: &SubjectId, role: Role) -> Result<(), StoreError>;

    /// Returns whether a row was removed.
    async fn revoke(&self, user_id: &SubjectId, role: Role) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PostgresRoleAssignments {
    pool: Arc<PgPool>,
}

impl PostgresRoleAssignments {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl RoleAssignmentStore for PostgresRoleAssignments {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn roles_for(&self, user_id: &SubjectId) -> Result<Vec<Role>, StoreError> {
        // Enum order is privilege order.
        let rows = sqlx::query(
            r#"
            SELECT role::text AS role
            FROM public.user_roles
            WHERE user_id = $1
            ORDER BY role ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_user_roles", e))?;

        rows.iter()
            .map(|row| {
                let raw: String = row
                    .try_get("role")
                    .map_err(|e| StoreError::InvalidData(format!("failed to read role: {}", e)))?;
                raw.parse::<Role>()
                    .map_err(|e| StoreError::InvalidData(e.to_string()))
            })
            .collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id, role = %role), err)]
    async fn assign(&self, user_id: &SubjectId, role: Role) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO public.user_roles (user_id, role)
            VALUES ($1, $2::public.app_role)
            ON CONFLICT (user_id, role) DO NOTHING
            "#,
        )
        .bind(user_id.as_str())
        .bind(role.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assign_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, role = %role), err)]
    async fn revoke(&self, user_id: &SubjectId, role: Role) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM public.user_roles
            WHERE user_id = $1 AND role = $2::public.app_role
            "#,
        )
        .bind(user_id.as_str())
        .bind(role.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_role", e))?;
        Ok(result.rows_affected() > 0)
    }
}

/// In-memory role assignments for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRoleAssignments {
    inner: RwLock<BTreeMap<SubjectId, BTreeSet<Role>>>,
}

impl InMemoryRoleAssignments {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("role assignments lock poisoned".to_string())
}

#[async_trait]
impl RoleAssignmentStore for InMemoryRoleAssignments {
    async fn roles_for(&self, user_id: &SubjectId) -> Result<Vec<Role>, StoreError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map
            .get(user_id)
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn assign(&self, user_id: &SubjectId, role: Role) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.entry(user_id.clone()).or_default().insert(role);
        Ok(())
    }

    async fn revoke(&self, user_id: &SubjectId, role: Role) -> Result<bool, StoreError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        Ok(map
            .get_mut(user_id)
            .is_some_and(|roles| roles.remove(&role)))
    }
}
