//! Configuration loading and representation.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} missing")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime configuration of the service.
///
/// Provider URL/key and the database URL are required: a deployment that
/// lacks them must not start (it would otherwise treat every request as
/// unauthenticated).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub database_url: String,
    pub hook_database_url: String,
    pub auth_hook_secret: Option<String>,
    pub session_cookie_prefix: String,
    pub provider_timeout: Duration,
    pub bind_addr: SocketAddr,
    pub cookie_secure: bool,
}

pub const DEFAULT_COOKIE_PREFIX: &str = "sb-";
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

impl AppConfig {
    /// Load from the process environment (after reading `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let supabase_url = required("SUPABASE_URL")?;
        let parsed = reqwest::Url::parse(&supabase_url).map_err(|e| ConfigError::Invalid {
            name: "SUPABASE_URL",
            reason: e.to_string(),
        })?;
        if parsed.host_str().is_none() {
            return Err(ConfigError::Invalid {
                name: "SUPABASE_URL",
                reason: "no host".to_string(),
            });
        }

        let supabase_anon_key = required("SUPABASE_ANON_KEY")?;
        let database_url = required("DATABASE_URL")?;
        let hook_database_url = get("HOOK_DATABASE_URL").unwrap_or_else(|| database_url.clone());

        let provider_timeout_ms = match get("PROVIDER_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().ok().filter(|ms| *ms > 0).ok_or_else(|| {
                ConfigError::Invalid {
                    name: "PROVIDER_TIMEOUT_MS",
                    reason: format!("expected a positive integer, got '{raw}'"),
                }
            })?,
            None => DEFAULT_PROVIDER_TIMEOUT_MS,
        };

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "BIND_ADDR",
            reason: format!("'{bind_raw}' is not a socket address"),
        })?;

        let cookie_secure = match get("COOKIE_SECURE").as_deref() {
            None | Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "COOKIE_SECURE",
                    reason: format!("expected true/false, got '{other}'"),
                });
            }
        };

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
            database_url,
            hook_database_url,
            auth_hook_secret: get("AUTH_HOOK_SECRET"),
            session_cookie_prefix: get("SESSION_COOKIE_PREFIX")
                .unwrap_or_else(|| DEFAULT_COOKIE_PREFIX.to_string()),
            provider_timeout: Duration::from_millis(provider_timeout_ms),
            bind_addr,
            cookie_secure,
        })
    }

    /// Name of the provider's session cookie: `<prefix><project-ref>-auth-token`,
    /// where the project ref is the first label of the provider host.
    pub fn session_storage_key(&self) -> String {
        let project_ref = reqwest::Url::parse(&self.supabase_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.split('.').next().unwrap_or(h).to_string()))
            .unwrap_or_default();
        format!("{}{}-auth-token", self.session_cookie_prefix, project_ref)
    }
}
