//! Service wiring for the HTTP layer.

use std::sync::Arc;

use anyhow::Context as _;
use sqlx::PgPool;

use folio_infra::db::{
    PermissionTableStore, PostgresPermissionTable, PostgresRoleAssignments, PostgresUserStore,
    RoleAssignmentStore, UserStore,
};
use folio_infra::hook::PostgresTokenHook;
use folio_infra::identity::GoTrueClient;
use folio_infra::{AppConfig, IdentityProvider, ProvisioningService, TokenHook, WebhookVerifier};

use crate::session::{SessionResolver, SessionSettings, SupabaseStrategy};

/// The HTTP token hook; only mounted when a signing secret is configured.
#[derive(Clone)]
pub struct HookEndpoint {
    pub hook: Arc<dyn TokenHook>,
    pub verifier: WebhookVerifier,
}

#[derive(Clone)]
pub struct AppServices {
    pub users: Arc<dyn UserStore>,
    pub assignments: Arc<dyn RoleAssignmentStore>,
    pub permissions: Arc<dyn PermissionTableStore>,
    pub provider: Arc<dyn IdentityProvider>,
    pub hook: Option<HookEndpoint>,
    pub session: SessionSettings,
}

impl AppServices {
    pub fn resolver(&self) -> SessionResolver {
        SessionResolver::new(self.provider.clone(), self.session.clone())
    }

    pub fn strategy(&self) -> SupabaseStrategy {
        SupabaseStrategy::new(self.resolver(), ProvisioningService::new(self.users.clone()))
    }
}

/// Production wiring: Postgres stores, the provider's HTTP API, and the SQL
/// hook behind a dedicated pool.
pub fn build_services(
    config: &AppConfig,
    pool: PgPool,
    hook_pool: PgPool,
) -> anyhow::Result<AppServices> {
    let provider = GoTrueClient::new(
        config.supabase_url.clone(),
        config.supabase_anon_key.clone(),
        config.provider_timeout,
    )
    .context("failed to build identity provider client")?;

    let hook = match config.auth_hook_secret.as_deref() {
        Some(secret) => Some(HookEndpoint {
            hook: Arc::new(PostgresTokenHook::new(hook_pool)),
            verifier: WebhookVerifier::new(secret).context("AUTH_HOOK_SECRET is not a valid webhook secret")?,
        }),
        None => {
            tracing::info!("AUTH_HOOK_SECRET not set; HTTP token hook disabled");
            None
        }
    };

    Ok(AppServices {
        users: Arc::new(PostgresUserStore::new(pool.clone())),
        assignments: Arc::new(PostgresRoleAssignments::new(pool.clone())),
        permissions: Arc::new(PostgresPermissionTable::new(pool)),
        provider: Arc::new(provider),
        hook,
        session: SessionSettings::from_config(config),
    })
}
