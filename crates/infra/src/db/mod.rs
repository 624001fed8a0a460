//! Database adapters: connection pools, scoped transactions and stores.
//!
//! Every store has a Postgres implementation and an in-memory twin. The
//! in-memory twins evaluate the same row predicates as the database policies
//! (`folio_auth::rls`), so request-scoped reads behave identically in tests.

use std::time::Duration;

use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;

use folio_auth::Claims;
use folio_core::SubjectId;

pub mod permissions;
pub mod role_assignments;
pub mod users;

pub use permissions::{InMemoryPermissionTable, PermissionTableStore, PostgresPermissionTable};
pub use role_assignments::{
    InMemoryRoleAssignments, PostgresRoleAssignments, RoleAssignmentStore,
};
pub use users::{InMemoryUserStore, PostgresUserStore, UserStore};

/// Database role that request-scoped statements run as.
pub const REQUEST_ROLE: &str = "authenticated";

const SET_REQUEST_ROLE: &str = "SET LOCAL ROLE authenticated";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique key violation (SQLSTATE 23505).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A persisted value is outside the closed role/permission sets.
    #[error("invalid stored value: {0}")]
    InvalidData(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Privilege context for a storage call.
#[derive(Debug, Clone, Copy)]
pub enum DbScope<'a> {
    /// Trusted server-side access (provisioning, startup checks). Not
    /// subject to row policies.
    Service,
    /// On behalf of an end user: runs as [`REQUEST_ROLE`] with the request's
    /// token claims visible to the row policies.
    Request {
        sub: &'a SubjectId,
        claims: &'a Claims,
    },
}

impl<'a> DbScope<'a> {
    pub fn request(sub: &'a SubjectId, claims: &'a Claims) -> Self {
        DbScope::Request { sub, claims }
    }

    /// JSON claims document exposed to the row policies as `request.jwt.claims`.
    pub fn jwt_claims(&self) -> Option<serde_json::Value> {
        match self {
            DbScope::Service => None,
            DbScope::Request { sub, claims } => Some(json!({
                "sub": sub.as_str(),
                "role": REQUEST_ROLE,
                "user_role": claims.user_role,
                "user_roles": claims.user_roles,
                "permissions": claims.permissions,
            })),
        }
    }
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Begin a transaction carrying `scope`.
///
/// For request scope the role switch and the claims are transaction-local
/// (`SET LOCAL` / `set_config(.., true)`) and vanish at commit or rollback.
pub(crate) async fn begin_scoped<'p>(
    pool: &'p PgPool,
    scope: DbScope<'_>,
) -> Result<Transaction<'p, Postgres>, StoreError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error("begin_transaction", e))?;

    if let Some(claims) = scope.jwt_claims() {
        sqlx::query("SELECT set_config('request.jwt.claims', $1, true)")
            .bind(claims.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_request_claims", e))?;

        sqlx::query(SET_REQUEST_ROLE)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_request_role", e))?;
    }

    Ok(tx)
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("22P02") => StoreError::InvalidData(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Storage(format!("connection pool timed out in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
