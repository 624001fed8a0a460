//! HTTP client for the provider's auth API (`/auth/v1/*`).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::instrument;

use super::{IdentityProvider, OtpType, ProviderError, ProviderSession, ProviderUser};

/// Provider auth API client.
///
/// Every call is bounded by `timeout`; on expiry the call fails with
/// [`ProviderError::Timeout`] and callers treat the request as
/// unauthenticated.
#[derive(Debug, Clone)]
pub struct GoTrueClient {
    base_url: String,
    anon_key: String,
    http: Client,
    timeout: Duration,
}

impl GoTrueClient {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            http,
            timeout,
        })
    }

    fn transport(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout.as_millis())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.base_url, path)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout.as_millis()))?
    }

    async fn post_session(&self, url: String, body: Value) -> Result<ProviderSession, ProviderError> {
        let res = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let session: ProviderSession = read_json(res).await?;
        Ok(session.with_expiry_from(chrono::Utc::now().timestamp()))
    }
}

async fn read_json<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ProviderError> {
    let status = res.status();
    if !status.is_success() {
        let body: Value = res.json().await.unwrap_or(Value::Null);
        let message = ["msg", "error_description", "message", "error"]
            .iter()
            .find_map(|k| body.get(*k).and_then(Value::as_str))
            .unwrap_or("no message")
            .to_string();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            message,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    #[instrument(skip(self, access_token), err)]
    async fn get_user(&self, access_token: &str) -> Result<Option<ProviderUser>, ProviderError> {
        self.bounded(async {
            let res = self
                .http
                .get(self.url("/user"))
                .header("apikey", &self.anon_key)
                .bearer_auth(access_token)
                .send()
                .await
                .map_err(|e| self.transport(e))?;

            match res.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
                _ => read_json::<ProviderUser>(res).await.map(Some),
            }
        })
        .await
    }

    #[instrument(skip(self, refresh_token), err)]
    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError> {
        self.bounded(self.post_session(
            self.url("/token?grant_type=refresh_token"),
            json!({ "refresh_token": refresh_token }),
        ))
        .await
    }

    #[instrument(skip(self, token_hash), err)]
    async fn verify_otp(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<ProviderSession, ProviderError> {
        self.bounded(self.post_session(
            self.url("/verify"),
            json!({ "type": otp_type, "token_hash": token_hash }),
        ))
        .await
    }
}
