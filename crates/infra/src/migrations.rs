//! Schema migrations, generated from the role/permission model.
//!
//! The SQL enums, the seed rows of `role_permissions`, the token hook, the
//! `authorize()` predicate and the row policies are all rendered from
//! `folio_auth::{Role, Permission, SEED}`; there is no hand-written copy of
//! the permission table.

use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{info, instrument, warn};

use folio_auth::rls::{ProtectedTable, RowCommand};
use folio_auth::{Permission, PolicyDrift, PolicySnapshot, Role, SEED};

use crate::db::{map_sqlx_error, PermissionTableStore, PostgresPermissionTable, StoreError};

/// Role the identity provider uses to call the token hook.
pub const HOOK_EXECUTOR_ROLE: &str = "supabase_auth_admin";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {version} ({name}) failed: {source}")]
    Apply {
        version: i64,
        name: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("row level security is not enabled on {0}")]
    RlsDisabled(&'static str),

    #[error("protected table {0} is missing")]
    MissingTable(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: String,
}

/// All migrations in application order.
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "roles_and_enums",
            sql: roles_and_enums_sql(),
        },
        Migration {
            version: 2,
            name: "access_tables",
            sql: access_tables_sql(),
        },
        Migration {
            version: 3,
            name: "seed_role_permissions",
            sql: seed_sql(),
        },
        Migration {
            version: 4,
            name: "custom_access_token_hook",
            sql: hook_sql(),
        },
        Migration {
            version: 5,
            name: "authorize_and_policies",
            sql: policies_sql(),
        },
    ]
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn enum_values<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values
        .into_iter()
        .map(sql_literal)
        .collect::<Vec<_>>()
        .join(", ")
}

fn roles_and_enums_sql() -> String {
    let roles = enum_values(Role::ALL.iter().map(|r| r.as_str()));
    let permissions = enum_values(Permission::ALL.iter().map(|p| p.as_str()));
    format!(
        r#"
DO $$
BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = 'authenticated') THEN
        CREATE ROLE authenticated NOLOGIN;
        EXECUTE format('GRANT authenticated TO %I', current_user);
    END IF;
    IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = 'anon') THEN
        CREATE ROLE anon NOLOGIN;
    END IF;
    IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = '{hook}') THEN
        CREATE ROLE {hook} NOLOGIN;
        EXECUTE format('GRANT {hook} TO %I', current_user);
    END IF;
    IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'app_role') THEN
        CREATE TYPE public.app_role AS ENUM ({roles});
    END IF;
    IF NOT EXISTS (SELECT 1 FROM pg_type WHERE typname = 'app_permission') THEN
        CREATE TYPE public.app_permission AS ENUM ({permissions});
    END IF;
END
$$;

CREATE OR REPLACE FUNCTION public.request_jwt() RETURNS jsonb
LANGUAGE sql STABLE
AS $fn$
    SELECT coalesce(nullif(current_setting('request.jwt.claims', true), ''), '{{}}')::jsonb
$fn$;

CREATE OR REPLACE FUNCTION public.request_uid() RETURNS text
LANGUAGE sql STABLE
AS $fn$
    SELECT nullif(public.request_jwt() ->> 'sub', '')
$fn$;
"#,
        hook = HOOK_EXECUTOR_ROLE,
    )
}

fn access_tables_sql() -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS public.users (
    id          text PRIMARY KEY,
    email       text NOT NULL UNIQUE,
    first_name  text,
    last_name   text,
    created_at  timestamptz NOT NULL DEFAULT NOW(),
    updated_at  timestamptz NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS public.user_roles (
    user_id  text NOT NULL,
    role     public.app_role NOT NULL,
    PRIMARY KEY (user_id, role)
);
CREATE INDEX IF NOT EXISTS user_roles_user_id_idx ON public.user_roles (user_id);

CREATE TABLE IF NOT EXISTS public.role_permissions (
    id          bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
    role        public.app_role NOT NULL,
    permission  public.app_permission NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS role_permissions_role_permission_key
    ON public.role_permissions (role, permission);

GRANT USAGE ON SCHEMA public TO authenticated, {hook};
GRANT SELECT, UPDATE (email, updated_at) ON public.users TO authenticated;
GRANT SELECT, INSERT, UPDATE, DELETE ON public.role_permissions TO authenticated;
REVOKE ALL ON public.user_roles FROM authenticated, anon, public;
GRANT SELECT ON public.user_roles, public.role_permissions TO {hook};
"#,
        hook = HOOK_EXECUTOR_ROLE,
    )
}

fn seed_sql() -> String {
    let rows = SEED
        .iter()
        .flat_map(|(role, perms)| {
            perms.iter().map(move |p| {
                format!("    ({}, {})", sql_literal(role.as_str()), sql_literal(p.as_str()))
            })
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!(
        "INSERT INTO public.role_permissions (role, permission) VALUES\n{rows}\nON CONFLICT (role, permission) DO NOTHING;\n"
    )
}

fn hook_sql() -> String {
    format!(
        r#"
CREATE OR REPLACE FUNCTION public.custom_access_token_hook(event jsonb) RETURNS jsonb
LANGUAGE plpgsql STABLE
AS $fn$
DECLARE
    claims jsonb;
    roles public.app_role[];
    perms public.app_permission[];
BEGIN
    SELECT array_agg(ur.role ORDER BY ur.role) INTO roles
    FROM public.user_roles ur
    WHERE ur.user_id = event ->> 'user_id';

    SELECT array_agg(DISTINCT rp.permission ORDER BY rp.permission) INTO perms
    FROM public.role_permissions rp
    WHERE rp.role = ANY(roles);

    claims := coalesce(event -> 'claims', '{{}}'::jsonb);

    IF roles IS NOT NULL THEN
        claims := jsonb_set(claims, '{{user_role}}', to_jsonb(roles[1]));
    ELSE
        claims := jsonb_set(claims, '{{user_role}}', 'null'::jsonb);
    END IF;
    claims := jsonb_set(claims, '{{user_roles}}', coalesce(to_jsonb(roles), '[]'::jsonb));
    claims := jsonb_set(claims, '{{permissions}}', coalesce(to_jsonb(perms), '[]'::jsonb));

    RETURN jsonb_set(event, '{{claims}}', claims);
END;
$fn$;

GRANT EXECUTE ON FUNCTION public.custom_access_token_hook(jsonb) TO {hook};
REVOKE EXECUTE ON FUNCTION public.custom_access_token_hook(jsonb) FROM authenticated, anon, public;

DO $$
BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_policies WHERE tablename = 'user_roles' AND policyname = 'hook_reads_user_roles') THEN
        CREATE POLICY hook_reads_user_roles ON public.user_roles AS PERMISSIVE FOR SELECT TO {hook} USING (true);
    END IF;
    IF NOT EXISTS (SELECT 1 FROM pg_policies WHERE tablename = 'role_permissions' AND policyname = 'hook_reads_role_permissions') THEN
        CREATE POLICY hook_reads_role_permissions ON public.role_permissions AS PERMISSIVE FOR SELECT TO {hook} USING (true);
    END IF;
END
$$;
"#,
        hook = HOOK_EXECUTOR_ROLE,
    )
}

/// Predicate of one request-scoped row policy, or `None` when the table has
/// no policy for that command (the command is then denied by RLS).
fn policy_predicate(table: ProtectedTable, command: RowCommand) -> Option<&'static str> {
    const MANAGE: &str = "public.authorize('user.manage')";
    const MANAGE_OR_SELF: &str = "public.authorize('user.manage') OR id = public.request_uid()";
    match (table, command) {
        (ProtectedTable::RolePermissions, _) => Some(MANAGE),
        (ProtectedTable::Users, RowCommand::Select | RowCommand::Update) => Some(MANAGE_OR_SELF),
        (ProtectedTable::Users, RowCommand::Delete) => Some(MANAGE),
        (ProtectedTable::Users, RowCommand::Insert) => None,
        (ProtectedTable::UserRoles, _) => None,
    }
}

fn policy_name(table: ProtectedTable, command: RowCommand) -> String {
    format!(
        "{}_{}_policy",
        table.table_name(),
        command.as_sql().to_lowercase()
    )
}

fn policies_sql() -> String {
    let mut sql = String::from(
        r#"
CREATE OR REPLACE FUNCTION public.authorize(requested_permission public.app_permission)
RETURNS boolean
LANGUAGE plpgsql STABLE SECURITY DEFINER SET search_path = ''
AS $fn$
DECLARE
    bind_permissions int;
BEGIN
    SELECT count(*) INTO bind_permissions
    FROM public.role_permissions rp
    WHERE rp.permission = requested_permission
      AND rp.role::text = (public.request_jwt() ->> 'user_role');
    RETURN bind_permissions > 0;
END;
$fn$;

REVOKE EXECUTE ON FUNCTION public.authorize(public.app_permission) FROM anon, public;
GRANT EXECUTE ON FUNCTION public.authorize(public.app_permission) TO authenticated;
"#,
    );

    sql.push_str("\nDO $$\nBEGIN\n");
    for table in ProtectedTable::ALL {
        for command in RowCommand::ALL {
            let Some(predicate) = policy_predicate(table, command) else {
                continue;
            };
            let clause = match command {
                RowCommand::Select | RowCommand::Delete => format!("USING ({predicate})"),
                RowCommand::Insert => format!("WITH CHECK ({predicate})"),
                RowCommand::Update => format!("USING ({predicate}) WITH CHECK ({predicate})"),
            };
            let name = policy_name(table, command);
            sql.push_str(&format!(
                "    IF NOT EXISTS (SELECT 1 FROM pg_policies WHERE tablename = '{table}' AND policyname = '{name}') THEN\n        CREATE POLICY {name} ON public.{table} FOR {command} TO authenticated {clause};\n    END IF;\n",
                table = table.table_name(),
                command = command.as_sql(),
            ));
        }
    }
    sql.push_str("END\n$$;\n");
    sql.push_str(&reassert_rls_sql());
    sql
}

/// `ALTER TABLE .. ENABLE ROW LEVEL SECURITY` for every protected table.
pub fn reassert_rls_sql() -> String {
    ProtectedTable::ALL
        .iter()
        .map(|t| format!("ALTER TABLE public.{} ENABLE ROW LEVEL SECURITY;\n", t.table_name()))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────────────────────────

/// Applies pending migrations and verifies the row security posture.
pub struct Migrator {
    pool: PgPool,
}

impl Migrator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations, re-assert RLS, verify it, and report drift
    /// of the permission table. Returns the versions applied by this call.
    pub async fn run(&self) -> Result<Vec<i64>, MigrationError> {
        let applied = self.apply_pending().await?;
        self.reassert_rls().await?;
        self.verify_rls().await?;

        let drift = self.policy_drift().await?;
        if !drift.is_empty() {
            warn!(
                missing = ?drift.missing,
                unexpected = ?drift.unexpected,
                "role_permissions differs from the seed policy"
            );
        }
        Ok(applied)
    }

    #[instrument(skip(self), err)]
    async fn apply_pending(&self) -> Result<Vec<i64>, MigrationError> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS public.schema_migrations (
                version     bigint PRIMARY KEY,
                name        text NOT NULL,
                applied_at  timestamptz NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_schema_migrations", e))?;

        let rows = sqlx::query("SELECT version FROM public.schema_migrations")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_schema_migrations", e))?;
        let mut done = Vec::with_capacity(rows.len());
        for row in rows {
            let version: i64 = row
                .try_get("version")
                .map_err(|e| StoreError::InvalidData(format!("failed to read version: {}", e)))?;
            done.push(version);
        }

        let mut applied = Vec::new();
        for migration in migrations() {
            if done.contains(&migration.version) {
                continue;
            }
            self.apply(&migration).await.map_err(|source| MigrationError::Apply {
                version: migration.version,
                name: migration.name,
                source,
            })?;
            info!(version = migration.version, name = migration.name, "applied migration");
            applied.push(migration.version);
        }
        Ok(applied)
    }

    async fn apply(&self, migration: &Migration) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::raw_sql(&migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(migration.name, e))?;
        sqlx::query("INSERT INTO public.schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("record_migration", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    /// Enable RLS on every protected table, whether or not migrations ran.
    #[instrument(skip(self), err)]
    pub async fn reassert_rls(&self) -> Result<(), MigrationError> {
        sqlx::raw_sql(&reassert_rls_sql())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("reassert_rls", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn verify_rls(&self) -> Result<(), MigrationError> {
        for table in ProtectedTable::ALL {
            let row = sqlx::query(
                r#"
                SELECT c.relrowsecurity AS enabled
                FROM pg_class c
                JOIN pg_namespace n ON n.oid = c.relnamespace
                WHERE n.nspname = 'public' AND c.relname = $1 AND c.relkind = 'r'
                "#,
            )
            .bind(table.table_name())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("verify_rls", e))?;

            let row = row.ok_or(MigrationError::MissingTable(table.table_name()))?;
            let enabled: bool = row
                .try_get("enabled")
                .map_err(|e| StoreError::InvalidData(format!("failed to read relrowsecurity: {}", e)))?;
            if !enabled {
                return Err(MigrationError::RlsDisabled(table.table_name()));
            }
        }
        Ok(())
    }

    pub async fn policy_drift(&self) -> Result<PolicyDrift, MigrationError> {
        let actual = PostgresPermissionTable::new(self.pool.clone()).load().await?;
        Ok(PolicySnapshot::seed().drift_from(&actual))
    }
}
