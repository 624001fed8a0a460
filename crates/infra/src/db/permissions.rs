//! The persisted role → permission table.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use folio_auth::{Permission, PolicySnapshot, Role};

use super::{map_sqlx_error, StoreError};

#[async_trait]
pub trait PermissionTableStore: Send + Sync {
    /// Read the whole table as a snapshot (service scope).
    async fn load(&self) -> Result<PolicySnapshot, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PostgresPermissionTable {
    pool: Arc<PgPool>,
}

impl PostgresPermissionTable {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl PermissionTableStore for PostgresPermissionTable {
    #[instrument(skip(self), err)]
    async fn load(&self) -> Result<PolicySnapshot, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT role::text AS role, permission::text AS permission
            FROM public.role_permissions
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_role_permissions", e))?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row
                .try_get("role")
                .map_err(|e| StoreError::InvalidData(format!("failed to read role: {}", e)))?;
            let permission: String = row
                .try_get("permission")
                .map_err(|e| StoreError::InvalidData(format!("failed to read permission: {}", e)))?;
            pairs.push((
                role.parse::<Role>()
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?,
                permission
                    .parse::<Permission>()
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?,
            ));
        }

        tracing::debug!(rows = pairs.len(), "loaded permission table");
        Ok(PolicySnapshot::from_rows(pairs))
    }
}

/// Fixed in-memory permission table.
#[derive(Debug)]
pub struct InMemoryPermissionTable {
    inner: RwLock<PolicySnapshot>,
}

impl InMemoryPermissionTable {
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn seeded() -> Self {
        Self::new(PolicySnapshot::seed())
    }

    pub fn replace(&self, snapshot: PolicySnapshot) {
        if let Ok(mut inner) = self.inner.write() {
            *inner = snapshot;
        }
    }
}

#[async_trait]
impl PermissionTableStore for InMemoryPermissionTable {
    async fn load(&self) -> Result<PolicySnapshot, StoreError> {
        self.inner
            .read()
            .map(|snapshot| snapshot.clone())
            .map_err(|_| StoreError::Storage("permission table lock poisoned".to_string()))
    }
}
