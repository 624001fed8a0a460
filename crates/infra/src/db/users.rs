//! Users table: provisioned identities keyed by the provider subject id.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use folio_auth::rls::{self, ProtectedTable, RequestJwt, RowCommand};
use folio_auth::{PolicySnapshot, User};
use folio_core::{Email, SubjectId};

use super::{begin_scoped, map_sqlx_error, DbScope, StoreError};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, scope: DbScope<'_>, id: &SubjectId)
        -> Result<Option<User>, StoreError>;

    /// Rows visible in `scope`, ordered by id.
    async fn list(&self, scope: DbScope<'_>) -> Result<Vec<User>, StoreError>;

    /// Insert a new user (service scope). A duplicate id or email yields
    /// [`StoreError::Conflict`].
    async fn create(&self, user: &User) -> Result<User, StoreError>;

    /// Returns `None` when the row does not exist or is not updatable in `scope`.
    async fn update_email(
        &self,
        scope: DbScope<'_>,
        id: &SubjectId,
        email: &Email,
    ) -> Result<Option<User>, StoreError>;
}

/// Postgres-backed users table.
///
/// Request-scoped calls run inside a transaction that has switched to the
/// `authenticated` role, so the `users` row policies filter the result.
#[derive(Debug, Clone)]
pub struct PostgresUserStore {
    pool: Arc<PgPool>,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    #[instrument(skip(self, scope), fields(user_id = %id), err)]
    async fn find_by_id(
        &self,
        scope: DbScope<'_>,
        id: &SubjectId,
    ) -> Result<Option<User>, StoreError> {
        let mut tx = begin_scoped(&self.pool, scope).await?;
        let row = sqlx::query(
            r#"
            SELECT id, email, first_name, last_name
            FROM public.users
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("find_user", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        row.map(|r| user_from_row(&r)).transpose()
    }

    #[instrument(skip(self, scope), err)]
    async fn list(&self, scope: DbScope<'_>) -> Result<Vec<User>, StoreError> {
        let mut tx = begin_scoped(&self.pool, scope).await?;
        let rows = sqlx::query(
            r#"
            SELECT id, email, first_name, last_name
            FROM public.users
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("list_users", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        rows.iter().map(user_from_row).collect()
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn create(&self, user: &User) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO public.users (id, email, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, first_name, last_name
            "#,
        )
        .bind(user.id.as_str())
        .bind(user.email.as_str())
        .bind(user.first_name.as_deref())
        .bind(user.last_name.as_deref())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        user_from_row(&row)
    }

    #[instrument(skip(self, scope, email), fields(user_id = %id), err)]
    async fn update_email(
        &self,
        scope: DbScope<'_>,
        id: &SubjectId,
        email: &Email,
    ) -> Result<Option<User>, StoreError> {
        let mut tx = begin_scoped(&self.pool, scope).await?;
        let row = sqlx::query(
            r#"
            UPDATE public.users
            SET email = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, email, first_name, last_name
            "#,
        )
        .bind(id.as_str())
        .bind(email.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user_email", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        row.map(|r| user_from_row(&r)).transpose()
    }
}

#[derive(Debug)]
struct UserRow {
    id: String,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for UserRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
        })
    }
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: SubjectId::parse(row.id).map_err(|e| StoreError::InvalidData(e.to_string()))?,
            email: Email::parse(&row.email).map_err(|e| StoreError::InvalidData(e.to_string()))?,
            first_name: row.first_name,
            last_name: row.last_name,
        })
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<User, StoreError> {
    let row = UserRow::from_row(row)
        .map_err(|e| StoreError::InvalidData(format!("failed to read user row: {}", e)))?;
    User::try_from(row)
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory twin
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory users table for tests/dev.
///
/// Request-scoped calls are filtered through the same row predicates as the
/// database policies, evaluated against the injected policy snapshot.
#[derive(Debug)]
pub struct InMemoryUserStore {
    policy: PolicySnapshot,
    rows: RwLock<BTreeMap<SubjectId, User>>,
    create_calls: AtomicUsize,
}

impl InMemoryUserStore {
    pub fn new(policy: PolicySnapshot) -> Self {
        Self {
            policy,
            rows: RwLock::new(BTreeMap::new()),
            create_calls: AtomicUsize::new(0),
        }
    }

    /// Number of `create` calls issued, successful or not.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn visible(&self, scope: &DbScope<'_>, command: RowCommand, owner: &SubjectId) -> bool {
        match scope {
            DbScope::Service => true,
            DbScope::Request { sub, claims } => rls::row_allowed(
                &self.policy,
                &RequestJwt {
                    sub: Some(*sub),
                    claims: *claims,
                },
                ProtectedTable::Users,
                command,
                Some(owner),
            ),
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("users lock poisoned".to_string())
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(
        &self,
        scope: DbScope<'_>,
        id: &SubjectId,
    ) -> Result<Option<User>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .get(id)
            .filter(|u| self.visible(&scope, RowCommand::Select, &u.id))
            .cloned())
    }

    async fn list(&self, scope: DbScope<'_>) -> Result<Vec<User>, StoreError> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        Ok(rows
            .values()
            .filter(|u| self.visible(&scope, RowCommand::Select, &u.id))
            .cloned()
            .collect())
    }

    async fn create(&self, user: &User) -> Result<User, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if rows.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("users_pkey: {}", user.id)));
        }
        if rows.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }
        rows.insert(user.id.clone(), user.clone());
        Ok(user.clone())
    }

    async fn update_email(
        &self,
        scope: DbScope<'_>,
        id: &SubjectId,
        email: &Email,
    ) -> Result<Option<User>, StoreError> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        if !rows.contains_key(id) || !self.visible(&scope, RowCommand::Update, id) {
            return Ok(None);
        }
        if rows.values().any(|u| &u.email == email && &u.id != id) {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }
        Ok(rows.get_mut(id).map(|user| {
            user.email = email.clone();
            user.clone()
        }))
    }
}
