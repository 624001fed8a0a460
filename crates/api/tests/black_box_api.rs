use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{EncodingKey, Header};
use reqwest::{header, redirect::Policy, StatusCode};
use serde_json::{json, Map};

use folio_api::app::{build_app, AppServices, HookEndpoint};
use folio_api::session::SessionSettings;
use folio_auth::{Permission, PolicySnapshot, Role, User};
use folio_core::{Email, SubjectId};
use folio_infra::db::{
    InMemoryPermissionTable, InMemoryRoleAssignments, InMemoryUserStore, RoleAssignmentStore,
    UserStore,
};
use folio_infra::identity::{CookieOptions, OtpType, SessionCookieCodec};
use folio_infra::{
    DbScope, IdentityProvider, ProviderError, ProviderSession, ProviderUser, StoreError,
    StoreTokenHook, WebhookVerifier,
};

const STORAGE_KEY: &str = "sb-test-auth-token";
const HOOK_SECRET: &str = "v1,whsec_c2VjcmV0LWtleS1mb3ItdGVzdHM=";
const FAR_FUTURE: i64 = 4_000_000_000;

// ─────────────────────────────────────────────────────────────────────────────
// Fake identity provider
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeProvider {
    users: RwLock<HashMap<String, ProviderUser>>,
    refreshes: RwLock<HashMap<String, ProviderSession>>,
    otps: RwLock<HashMap<String, ProviderSession>>,
    calls: AtomicUsize,
}

impl FakeProvider {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn get_user(&self, access_token: &str) -> Result<Option<ProviderUser>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if access_token == "slow" {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Ok(self.users.read().unwrap().get(access_token).cloned())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.refreshes
            .read()
            .unwrap()
            .get(refresh_token)
            .cloned()
            .ok_or_else(|| ProviderError::Status {
                status: 400,
                message: "Invalid Refresh Token".into(),
            })
    }

    async fn verify_otp(
        &self,
        token_hash: &str,
        _otp_type: OtpType,
    ) -> Result<ProviderSession, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.otps
            .read()
            .unwrap()
            .get(token_hash)
            .cloned()
            .ok_or_else(|| ProviderError::Status {
                status: 403,
                message: "Email link is invalid or has expired".into(),
            })
    }
}

/// Users store whose backend is down.
#[derive(Default)]
struct UnavailableUserStore {
    calls: AtomicUsize,
}

impl UnavailableUserStore {
    fn fail(&self) -> StoreError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StoreError::Storage("connection refused".to_string())
    }
}

#[async_trait]
impl UserStore for UnavailableUserStore {
    async fn find_by_id(&self, _: DbScope<'_>, _: &SubjectId) -> Result<Option<User>, StoreError> {
        Err(self.fail())
    }

    async fn list(&self, _: DbScope<'_>) -> Result<Vec<User>, StoreError> {
        Err(self.fail())
    }

    async fn create(&self, _: &User) -> Result<User, StoreError> {
        Err(self.fail())
    }

    async fn update_email(
        &self,
        _: DbScope<'_>,
        _: &SubjectId,
        _: &Email,
    ) -> Result<Option<User>, StoreError> {
        Err(self.fail())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test server
// ─────────────────────────────────────────────────────────────────────────────

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    provider: Arc<FakeProvider>,
    users: Arc<InMemoryUserStore>,
    assignments: Arc<InMemoryRoleAssignments>,
    codec: SessionCookieCodec,
    client: reqwest::Client,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with_users(None).await
    }

    /// Spawn with `store` backing the users collection instead of the
    /// in-memory one.
    async fn spawn_with_users(store: Option<Arc<dyn UserStore>>) -> Self {
        let policy = PolicySnapshot::seed();
        let provider = Arc::new(FakeProvider::default());
        let users = Arc::new(InMemoryUserStore::new(policy.clone()));
        let user_store = store.unwrap_or_else(|| users.clone() as Arc<dyn UserStore>);
        let assignments = Arc::new(InMemoryRoleAssignments::new());
        let permissions = Arc::new(InMemoryPermissionTable::new(policy));
        let codec = SessionCookieCodec::new(STORAGE_KEY, CookieOptions::new(false));

        let services = AppServices {
            users: user_store,
            assignments: assignments.clone(),
            permissions: permissions.clone(),
            provider: provider.clone(),
            hook: Some(HookEndpoint {
                hook: Arc::new(StoreTokenHook::new(assignments.clone(), permissions)),
                verifier: WebhookVerifier::new(HOOK_SECRET).unwrap(),
            }),
            session: SessionSettings {
                cookie_prefix: "sb-".to_string(),
                codec: codec.clone(),
                provider_timeout: Duration::from_millis(300),
            },
        };

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .unwrap();

        Self {
            base_url,
            handle,
            provider,
            users,
            assignments,
            codec,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register a provider user holding `role` and return the `Cookie`
    /// header of their session.
    fn login(&self, id: &str, role: Role) -> String {
        self.login_as(provider_user(id), role)
    }

    fn login_as(&self, user: ProviderUser, role: Role) -> String {
        let token = mint_token(&user.id, role);
        self.provider.users.write().unwrap().insert(token.clone(), user);
        self.cookie_for(&session(&token, Some("r-unused"), FAR_FUTURE))
    }

    fn cookie_for(&self, session: &ProviderSession) -> String {
        let set = self.codec.write(session, &[]).unwrap();
        let pair = set[0].split(';').next().unwrap();
        format!("theme=dark; {pair}")
    }

    async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut req = self.client.get(self.url(path));
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        req.send().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_token(sub: &str, role: Role) -> String {
    let policy = PolicySnapshot::seed();
    jsonwebtoken::encode(
        &Header::default(),
        &json!({
            "sub": sub,
            "role": "authenticated",
            "exp": FAR_FUTURE,
            "user_role": role,
            "user_roles": [role],
            "permissions": policy.permissions_for(role),
        }),
        &EncodingKey::from_secret(b"provider-signing-key"),
    )
    .expect("failed to encode jwt")
}

fn provider_user(id: &str) -> ProviderUser {
    let mut user_metadata = Map::new();
    user_metadata.insert("first_name".into(), json!("First"));
    user_metadata.insert("last_name".into(), json!(id));
    ProviderUser {
        id: id.to_string(),
        email: Some(format!("{id}@example.com")),
        user_metadata,
    }
}

fn session(access_token: &str, refresh_token: Option<&str>, expires_at: i64) -> ProviderSession {
    ProviderSession {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        token_type: Some("bearer".to_string()),
        expires_in: Some(3600),
        expires_at: Some(expires_at),
        user: None,
    }
}

fn location(res: &reqwest::Response) -> &str {
    res.headers()[header::LOCATION].to_str().unwrap()
}

fn set_cookies(res: &reqwest::Response) -> Vec<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Route guard
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_outside_the_guard() {
    let srv = TestServer::spawn().await;
    let res = srv.get("/health", None).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn anonymous_admin_redirects_to_login_without_provider_call() {
    let srv = TestServer::spawn().await;

    let res = srv.get("/admin", Some("theme=dark; lang=en")).await;
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&res), "/login?redirectTo=/admin");

    let res = srv.get("/admin/rbac/roles", None).await;
    assert_eq!(location(&res), "/login?redirectTo=/admin");

    assert_eq!(srv.provider.calls(), 0);
}

#[tokio::test]
async fn anonymous_protected_path_redirects_to_login() {
    let srv = TestServer::spawn().await;

    let res = srv.get("/dashboard", None).await;
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&res), "/login");

    let res = srv.get("/api/users", None).await;
    assert_eq!(location(&res), "/login");
}

#[tokio::test]
async fn public_paths_pass_without_session() {
    let srv = TestServer::spawn().await;

    for path in ["/", "/login", "/signup", "/forgot-password", "/error"] {
        let res = srv.get(path, None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn admin_requires_user_manage() {
    let srv = TestServer::spawn().await;

    let writer = srv.login("writer-1", Role::Writer);
    let res = srv.get("/admin", Some(&writer)).await;
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&res), "/403");

    let admin = srv.login("admin-1", Role::Admin);
    let res = srv.get("/admin", Some(&admin)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["principal"]["id"], "admin-1");
    assert_eq!(body["collections"][0]["slug"], "users");
}

#[tokio::test]
async fn session_unknown_to_provider_is_unauthenticated() {
    let srv = TestServer::spawn().await;

    let cookie = srv.cookie_for(&session(&mint_token("ghost", Role::Admin), None, FAR_FUTURE));
    let res = srv.get("/dashboard", Some(&cookie)).await;
    assert_eq!(location(&res), "/login");
    assert_eq!(srv.provider.calls(), 1);
}

#[tokio::test]
async fn slow_provider_fails_closed() {
    let srv = TestServer::spawn().await;

    let cookie = srv.cookie_for(&session("slow", None, FAR_FUTURE));
    let res = srv.get("/whoami", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&res), "/login");
}

#[tokio::test]
async fn expired_session_is_refreshed_and_cookies_forwarded() {
    let srv = TestServer::spawn().await;

    let fresh_token = mint_token("user-1", Role::User);
    srv.provider
        .users
        .write()
        .unwrap()
        .insert(fresh_token.clone(), provider_user("user-1"));
    srv.provider
        .refreshes
        .write()
        .unwrap()
        .insert("r-1".to_string(), session(&fresh_token, Some("r-2"), FAR_FUTURE));

    let stale = srv.cookie_for(&session("expired-token", Some("r-1"), 1));
    let res = srv.get("/whoami", Some(&stale)).await;

    assert_eq!(res.status(), StatusCode::OK);
    let cookies = set_cookies(&res);
    assert!(cookies.iter().any(|c| c.starts_with(&format!("{STORAGE_KEY}=base64-"))));
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["id"], "user-1");
}

#[tokio::test]
async fn rejected_refresh_clears_cookie_on_redirect() {
    let srv = TestServer::spawn().await;

    let stale = srv.cookie_for(&session("expired-token", Some("revoked"), 1));
    let res = srv.get("/dashboard", Some(&stale)).await;

    assert_eq!(location(&res), "/login");
    let cookies = set_cookies(&res);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with(&format!("{STORAGE_KEY}=; Path=/; Max-Age=0")));
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity provisioning
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn whoami_provisions_once() {
    let srv = TestServer::spawn().await;
    let cookie = srv.login("user-1", Role::User);

    for _ in 0..2 {
        let res = srv.get("/whoami", Some(&cookie)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["id"], "user-1");
        assert_eq!(body["email"], "user-1@example.com");
        assert_eq!(body["first_name"], "First");
        assert_eq!(body["collection"], "users");
        assert_eq!(body["_strategy"], "supabase");
        assert_eq!(body["claims"]["user_role"], "user");
    }

    assert_eq!(srv.users.create_calls(), 1);
}

#[tokio::test]
async fn identity_without_email_is_not_provisioned() {
    let srv = TestServer::spawn().await;
    let mut user = provider_user("admin-1");
    user.email = None;
    let cookie = srv.login_as(user, Role::Admin);

    let res = srv.get("/whoami", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // The guard lets the admin token through; the collection rule refuses
    // a request without a provisioned principal.
    let res = srv.get("/admin", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv.get("/api/users/me", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(srv.users.create_calls(), 0);
    let rows = srv.users.list(DbScope::Service).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn store_failure_during_provisioning_is_unauthenticated() {
    let store = Arc::new(UnavailableUserStore::default());
    let backend: Arc<dyn UserStore> = store.clone();
    let srv = TestServer::spawn_with_users(Some(backend)).await;
    let cookie = srv.login("admin-1", Role::Admin);

    let res = srv.get("/whoami", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthenticated");

    let res = srv.get("/admin", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv.get("/api/users", Some(&cookie)).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    assert!(store.calls.load(Ordering::SeqCst) > 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Users collection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_is_filtered_by_row_policy() {
    let srv = TestServer::spawn().await;
    let admin = srv.login("admin-1", Role::Admin);
    let writer = srv.login("writer-1", Role::Writer);

    // Provision both.
    srv.get("/whoami", Some(&admin)).await;
    srv.get("/whoami", Some(&writer)).await;

    let res = srv.get("/api/users", Some(&writer)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let docs = body["docs"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["id"], "writer-1");

    let res = srv.get("/api/users", Some(&admin)).await;
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["docs"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn reading_another_user_is_forbidden() {
    let srv = TestServer::spawn().await;
    let admin = srv.login("admin-1", Role::Admin);
    let writer = srv.login("writer-1", Role::Writer);
    srv.get("/whoami", Some(&admin)).await;

    let res = srv.get("/api/users/admin-1", Some(&writer)).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");

    let res = srv.get("/api/users/writer-1", Some(&writer)).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.get("/api/users/me", Some(&writer)).await;
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user"]["id"], "writer-1");
}

#[tokio::test]
async fn names_are_read_only_and_email_is_editable() {
    let srv = TestServer::spawn().await;
    let cookie = srv.login("user-1", Role::User);

    let res = srv
        .client
        .patch(srv.url("/api/users/user-1"))
        .header(header::COOKIE, &cookie)
        .json(&json!({ "first_name": "Other" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = srv
        .client
        .patch(srv.url("/api/users/user-1"))
        .header(header::COOKIE, &cookie)
        .json(&json!({ "last_name": null }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = srv
        .client
        .patch(srv.url("/api/users/user-1"))
        .header(header::COOKIE, &cookie)
        .json(&json!({ "email": "New@Example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["email"], "new@example.com");
    assert_eq!(body["first_name"], "First");
}

#[tokio::test]
async fn updating_another_user_or_deleting_is_forbidden() {
    let srv = TestServer::spawn().await;
    let admin = srv.login("admin-1", Role::Admin);
    let user = srv.login("user-1", Role::User);
    srv.get("/whoami", Some(&user)).await;

    let res = srv
        .client
        .patch(srv.url("/api/users/user-1"))
        .header(header::COOKIE, &admin)
        .json(&json!({ "email": "takeover@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    for cookie in [&admin, &user] {
        let res = srv
            .client
            .delete(srv.url("/api/users/user-1"))
            .header(header::COOKIE, cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RBAC inspection and role assignment
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rbac_registry_and_explain() {
    let srv = TestServer::spawn().await;
    let admin = srv.login("admin-1", Role::Admin);

    let res = srv.get("/admin/rbac/roles", Some(&admin)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["roles"].as_array().unwrap().len(), 4);

    let res = srv.get("/admin/rbac/permissions/user.manage", Some(&admin)).await;
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["permission"]["granted_to"], json!(["admin"]));

    let res = srv
        .get("/admin/rbac/explain?permission=user.manage", Some(&admin))
        .await;
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["explanation"]["granted"], true);

    let res = srv
        .get("/admin/rbac/explain?permission=bogus", Some(&admin))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn assigned_role_flows_into_hook_and_explain() {
    let srv = TestServer::spawn().await;
    let admin = srv.login("admin-1", Role::Admin);
    let user = srv.login("user-1", Role::User);
    srv.get("/whoami", Some(&user)).await;

    let res = srv
        .client
        .put(srv.url("/admin/rbac/users/user-1/roles/writer"))
        .header(header::COOKIE, &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let roles = srv
        .assignments
        .roles_for(&SubjectId::parse("user-1").unwrap())
        .await
        .unwrap();
    assert_eq!(roles, vec![Role::Writer]);

    let res = srv
        .get(
            "/admin/rbac/explain/user-1?permission=content.create",
            Some(&admin),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["explanation"]["granted"], true);

    let res = srv
        .client
        .delete(srv.url("/admin/rbac/users/user-1/roles/admin"))
        .header(header::COOKIE, &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

// ─────────────────────────────────────────────────────────────────────────────
// Token hook
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn signed_hook_call_injects_claims() {
    let srv = TestServer::spawn().await;
    let user_id = SubjectId::parse("writer-1").unwrap();
    srv.assignments.assign(&user_id, Role::Writer).await.unwrap();

    let body = serde_json::to_vec(&json!({
        "user_id": "writer-1",
        "claims": { "sub": "writer-1", "role": "authenticated", "aal": "aal1" },
        "authentication_method": "password",
    }))
    .unwrap();
    let now = chrono::Utc::now().timestamp();
    let signature = WebhookVerifier::new(HOOK_SECRET)
        .unwrap()
        .sign("msg_1", now, &body)
        .unwrap();

    let res = srv
        .client
        .post(srv.url("/hooks/custom-access-token"))
        .header("webhook-id", "msg_1")
        .header("webhook-timestamp", now.to_string())
        .header("webhook-signature", signature)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let out: serde_json::Value = res.json().await.unwrap();
    let claims = &out["claims"];
    assert_eq!(claims["user_role"], "writer");
    assert_eq!(claims["user_roles"], json!(["writer"]));
    assert_eq!(claims["aal"], "aal1");
    let permissions = claims["permissions"].as_array().unwrap();
    assert_eq!(permissions.len(), 8);
    assert!(permissions.contains(&json!(Permission::ContentCreate.as_str())));
    assert!(!permissions.contains(&json!(Permission::UserManage.as_str())));
}

#[tokio::test]
async fn unsigned_hook_call_is_rejected() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .post(srv.url("/hooks/custom-access-token"))
        .json(&json!({ "user_id": "writer-1", "claims": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

// ─────────────────────────────────────────────────────────────────────────────
// Email confirmation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn confirm_sets_session_and_follows_next() {
    let srv = TestServer::spawn().await;
    srv.provider.otps.write().unwrap().insert(
        "good-hash".to_string(),
        session(&mint_token("user-1", Role::User), Some("r-1"), FAR_FUTURE),
    );

    let res = srv
        .client
        .get(srv.url("/auth/confirm"))
        .query(&[("token_hash", "good-hash"), ("type", "email"), ("next", "/dashboard")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&res), "/dashboard");
    assert!(set_cookies(&res)
        .iter()
        .any(|c| c.starts_with(&format!("{STORAGE_KEY}=base64-"))));

    let res = srv
        .client
        .get(srv.url("/auth/confirm"))
        .query(&[("token_hash", "good-hash"), ("type", "email"), ("next", "//evil.example")])
        .send()
        .await
        .unwrap();
    assert_eq!(location(&res), "/");
}

#[tokio::test]
async fn confirm_failures_go_to_error_page() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .get(srv.url("/auth/confirm"))
        .query(&[("token_hash", "expired"), ("type", "email")])
        .send()
        .await
        .unwrap();
    assert_eq!(location(&res), "/error");
    assert!(set_cookies(&res).is_empty());

    let res = srv.get("/auth/confirm?type=email", None).await;
    assert_eq!(location(&res), "/error");
}
