//! Custom access token hook service.
//!
//! Two backends compute the same claims: [`PostgresTokenHook`] calls the
//! generated SQL function under the hook executor role, and
//! [`StoreTokenHook`] evaluates `folio_auth::hook` over the stores (used by
//! tests and non-Postgres deployments). Calls arriving over HTTP must carry a
//! valid standard-webhooks signature, checked by [`WebhookVerifier`].

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::instrument;

use folio_auth::{compute_claims, AccessTokenHookEvent};
use folio_core::SubjectId;

use crate::db::{map_sqlx_error, PermissionTableStore, RoleAssignmentStore, StoreError};
use crate::migrations::HOOK_EXECUTOR_ROLE;

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock skew accepted on `webhook-timestamp`.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 5 * 60;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("webhook timestamp outside tolerance")]
    StaleTimestamp,

    #[error("webhook signature mismatch")]
    InvalidSignature,

    #[error("invalid webhook secret")]
    InvalidSecret,

    #[error("malformed hook payload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait TokenHook: Send + Sync {
    /// Return the provider's hook response: `{ "claims": { .. } }`.
    async fn issue(&self, event: AccessTokenHookEvent) -> Result<Value, HookError>;
}

/// Runs `public.custom_access_token_hook` with a dedicated pool, switching to
/// the hook executor role for the call.
#[derive(Debug, Clone)]
pub struct PostgresTokenHook {
    pool: Arc<PgPool>,
}

impl PostgresTokenHook {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl TokenHook for PostgresTokenHook {
    #[instrument(skip(self, event), fields(user_id = %event.user_id), err)]
    async fn issue(&self, event: AccessTokenHookEvent) -> Result<Value, HookError> {
        let payload =
            serde_json::to_value(&event).map_err(|e| HookError::Malformed(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query(&format!("SET LOCAL ROLE {HOOK_EXECUTOR_ROLE}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_hook_role", e))?;
        let row = sqlx::query("SELECT public.custom_access_token_hook($1::jsonb) AS event")
            .bind(&payload)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("custom_access_token_hook", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let event: Value = row
            .try_get("event")
            .map_err(|e| HookError::Malformed(format!("failed to read hook result: {e}")))?;
        let claims = event
            .get("claims")
            .cloned()
            .ok_or_else(|| HookError::Malformed("hook result has no claims".to_string()))?;
        Ok(serde_json::json!({ "claims": claims }))
    }
}

/// Hook evaluated in-process over the role assignment and permission stores.
#[derive(Clone)]
pub struct StoreTokenHook {
    assignments: Arc<dyn RoleAssignmentStore>,
    permissions: Arc<dyn PermissionTableStore>,
}

impl StoreTokenHook {
    pub fn new(
        assignments: Arc<dyn RoleAssignmentStore>,
        permissions: Arc<dyn PermissionTableStore>,
    ) -> Self {
        Self {
            assignments,
            permissions,
        }
    }
}

#[async_trait]
impl TokenHook for StoreTokenHook {
    #[instrument(skip(self, event), fields(user_id = %event.user_id), err)]
    async fn issue(&self, event: AccessTokenHookEvent) -> Result<Value, HookError> {
        let user_id = SubjectId::parse(event.user_id.clone())
            .map_err(|e| HookError::Malformed(e.to_string()))?;
        let roles = self.assignments.roles_for(&user_id).await?;
        let policy = self.permissions.load().await?;
        let injected = compute_claims(&roles, &policy);
        Ok(event.into_response(&injected))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Webhook signature verification
// ─────────────────────────────────────────────────────────────────────────────

/// Standard-webhooks verifier (`webhook-id`, `webhook-timestamp`,
/// `webhook-signature: v1,<base64 hmac>`).
#[derive(Clone)]
pub struct WebhookVerifier {
    key: Vec<u8>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier").finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Accepts `v1,whsec_<base64>`, `whsec_<base64>` or bare base64.
    pub fn new(secret: &str) -> Result<Self, HookError> {
        let secret = secret.trim();
        let secret = secret.strip_prefix("v1,").unwrap_or(secret);
        let secret = secret.strip_prefix("whsec_").unwrap_or(secret);
        let key = STANDARD
            .decode(secret)
            .map_err(|_| HookError::InvalidSecret)?;
        if key.is_empty() {
            return Err(HookError::InvalidSecret);
        }
        Ok(Self { key })
    }

    fn mac(&self, id: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, HookError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| HookError::InvalidSecret)?;
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }

    /// `v1,<base64>` signature for a payload.
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> Result<String, HookError> {
        let mac = self.mac(id, &timestamp.to_string(), body)?;
        Ok(format!("v1,{}", STANDARD.encode(mac.finalize().into_bytes())))
    }

    /// Verify a delivery; `signatures` may list several space-separated
    /// candidates (key rotation).
    pub fn verify(
        &self,
        id: Option<&str>,
        timestamp: Option<&str>,
        signatures: Option<&str>,
        body: &[u8],
        now_unix: i64,
    ) -> Result<(), HookError> {
        let id = id.ok_or(HookError::MissingHeader("webhook-id"))?;
        let timestamp = timestamp.ok_or(HookError::MissingHeader("webhook-timestamp"))?;
        let signatures = signatures.ok_or(HookError::MissingHeader("webhook-signature"))?;

        let sent_at: i64 = timestamp.trim().parse().map_err(|_| HookError::StaleTimestamp)?;
        let skew = now_unix.checked_sub(sent_at).map(i64::unsigned_abs);
        if skew.is_none_or(|s| s > WEBHOOK_TOLERANCE_SECS.unsigned_abs()) {
            return Err(HookError::StaleTimestamp);
        }

        for candidate in signatures.split_whitespace() {
            let Some(encoded) = candidate.strip_prefix("v1,") else {
                continue;
            };
            let Ok(expected) = STANDARD.decode(encoded) else {
                continue;
            };
            if self.mac(id, timestamp.trim(), body)?.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(HookError::InvalidSignature)
    }
}
