//! Session resolution and the provider-session authentication strategy.
//!
//! Neither entry point here returns an error: every failure is logged and
//! degrades to "no user".

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use folio_auth::{
    decode_claims, session_cookies, Claims, ExternalIdentity, IdentityRecord, RequestCookie,
    SESSION_STRATEGY,
};
use folio_infra::identity::{CookieOptions, SessionCookieCodec};
use folio_infra::{AppConfig, IdentityProvider, ProviderError, ProvisioningService};

/// Cookie and timeout settings shared by the resolver and the auth routes.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cookie_prefix: String,
    pub codec: SessionCookieCodec,
    pub provider_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cookie_prefix: config.session_cookie_prefix.clone(),
            codec: SessionCookieCodec::new(
                config.session_storage_key(),
                CookieOptions::new(config.cookie_secure),
            ),
            provider_timeout: config.provider_timeout,
        }
    }
}

/// The authenticated provider user behind a request.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub identity: ExternalIdentity,
    pub claims: Claims,
}

/// Outcome of resolving one request's session.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSession {
    pub user: Option<SessionUser>,
    /// `Set-Cookie` values produced while resolving (refreshed or cleared
    /// provider session); the edge middleware forwards them unchanged.
    pub set_cookies: Vec<String>,
}

impl ResolvedSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Claims of the authenticated user, `None` when unauthenticated.
    pub fn claims(&self) -> Option<&Claims> {
        self.user.as_ref().map(|u| &u.claims)
    }
}

#[derive(Clone)]
pub struct SessionResolver {
    provider: Arc<dyn IdentityProvider>,
    settings: SessionSettings,
}

impl SessionResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>, settings: SessionSettings) -> Self {
        Self { provider, settings }
    }

    /// Resolve the session carried by a `Cookie` header.
    ///
    /// Only provider-prefixed cookies are considered; without any, the
    /// provider is not contacted at all.
    pub async fn resolve(&self, cookie_header: Option<&str>) -> ResolvedSession {
        let cookies = session_cookies(cookie_header, &self.settings.cookie_prefix);
        if cookies.is_empty() {
            return ResolvedSession::anonymous();
        }

        let mut set_cookies = Vec::new();
        let outcome = tokio::time::timeout(
            self.settings.provider_timeout,
            self.try_resolve(&cookies, &mut set_cookies),
        )
        .await;

        let user = match outcome {
            Ok(Ok(user)) => user,
            Ok(Err(e)) => {
                warn!(error = %e, "session resolution failed; treating request as unauthenticated");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.settings.provider_timeout.as_millis() as u64,
                    "session resolution timed out; treating request as unauthenticated"
                );
                None
            }
        };
        ResolvedSession { user, set_cookies }
    }

    async fn try_resolve(
        &self,
        cookies: &[RequestCookie],
        set_cookies: &mut Vec<String>,
    ) -> Result<Option<SessionUser>, ProviderError> {
        let codec = &self.settings.codec;
        let Some(mut session) = codec.read(cookies) else {
            return Ok(None);
        };

        if session.needs_refresh(chrono::Utc::now().timestamp()) {
            let Some(refresh_token) = session.refresh_token.clone() else {
                return Ok(None);
            };
            match self.provider.refresh_session(&refresh_token).await {
                Ok(fresh) => {
                    debug!("refreshed provider session");
                    *set_cookies = codec.write(&fresh, cookies)?;
                    session = fresh;
                }
                Err(ProviderError::Status { status, .. }) if (400..500).contains(&status) => {
                    // Refresh token rejected: the session is over.
                    *set_cookies = codec.clear(cookies);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        let Some(user) = self.provider.get_user(&session.access_token).await? else {
            return Ok(None);
        };

        Ok(Some(SessionUser {
            identity: user.to_external()?,
            claims: decode_claims(Some(&session.access_token)),
        }))
    }
}

/// Authentication strategy for the users collection: provider session in,
/// provisioned identity record out.
#[derive(Clone)]
pub struct SupabaseStrategy {
    resolver: SessionResolver,
    provisioning: ProvisioningService,
}

impl SupabaseStrategy {
    pub const NAME: &'static str = SESSION_STRATEGY;

    pub fn new(resolver: SessionResolver, provisioning: ProvisioningService) -> Self {
        Self {
            resolver,
            provisioning,
        }
    }

    /// Resolve and provision in one step.
    pub async fn authenticate(&self, cookie_header: Option<&str>) -> Option<IdentityRecord> {
        let session = self.resolver.resolve(cookie_header).await;
        self.provision(&session).await
    }

    /// Provision the user of an already-resolved session.
    pub async fn provision(&self, session: &ResolvedSession) -> Option<IdentityRecord> {
        let user = session.user.as_ref()?;
        match self
            .provisioning
            .find_or_create(&user.identity, user.claims.clone(), Self::NAME)
            .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                error!(user_id = %user.identity.id, error = %e, "provisioning failed; treating request as unauthenticated");
                None
            }
        }
    }
}
