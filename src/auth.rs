//! Authentication state and flows.
//!
//! The credential itself lives only in the [`TokenStore`]. What survives a
//! restart is the last known user profile, persisted under
//! [`AUTH_STORAGE_KEY`]; whether the user counts as signed in is always
//! derived from the token store.

use crate::error::{self, ErrorKind, HttpError, Result};
use crate::keys;
use crate::models::{AuthUser, MessageResponse, SigninBody, SigninResponse, SignupBody};
use async_trait::async_trait;
use exn::ResultExt;
use moim_auth::TokenStore;
use moim_http::session::SessionHandler;
use moim_http::{ApiClient, Body, Method, MultipartForm, QueryParams};
use moim_query::{QueryCache, QueryOptions, RefetchType, Subscription};
use moim_storage::StoreHandle;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const AUTH_STORAGE_KEY: &str = "auth-store";
const PERSIST_VERSION: u32 = 2;
const ME_STALE_TIME: Duration = Duration::from_secs(30);

#[derive(Default, Serialize, Deserialize)]
struct Persisted {
    state: PersistedState,
    version: u32,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedState {
    user: Option<AuthUser>,
}

/// Signed-in user state shared by the whole application.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    tokens: TokenStore,
    store: StoreHandle,
    user: RwLock<Option<AuthUser>>,
}

impl AuthSession {
    /// Restore the persisted user profile. An unreadable profile is dropped.
    pub async fn load(tokens: TokenStore, store: StoreHandle) -> Result<Self> {
        let raw = store.read(AUTH_STORAGE_KEY).await.or_raise(|| ErrorKind::Storage)?;
        let user = raw.and_then(|raw| match serde_json::from_str::<Persisted>(&raw) {
            Ok(persisted) => persisted.state.user,
            Err(error) => {
                tracing::warn!(%error, "Persisted auth state is unreadable; ignoring");
                None
            },
        });
        Ok(Self { inner: Arc::new(SessionInner { tokens, store, user: RwLock::new(user) }) })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.inner.user.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.tokens.is_present()
    }

    pub async fn set_user(&self, user: Option<AuthUser>) -> Result<()> {
        let persisted = Persisted { state: PersistedState { user: user.clone() }, version: PERSIST_VERSION };
        *self.inner.user.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = user;
        let raw = serde_json::to_string(&persisted).or_raise(|| ErrorKind::Storage)?;
        self.inner.store.write(AUTH_STORAGE_KEY, &raw).await.or_raise(|| ErrorKind::Storage)
    }

    /// Forget the credential and the user.
    pub async fn clear(&self) -> Result<()> {
        self.inner.tokens.clear();
        self.set_user(None).await
    }

    /// Refresh the user profile with `fetcher`, if a credential exists.
    ///
    /// `None` from the server, or a 401, signs the user out. Any other
    /// failure keeps the credential; the server may just be unreachable.
    pub async fn hydrate_user<F, Fut>(&self, fetcher: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = moim_http::error::Result<Option<AuthUser>>>,
    {
        if !self.is_authenticated() {
            return Ok(());
        }
        match fetcher().await {
            Ok(Some(user)) => self.set_user(Some(user)).await,
            Ok(None) => self.clear().await,
            Err(error) if error.status() == Some(401) => {
                tracing::info!("Credential rejected while hydrating user; signing out");
                self.clear().await
            },
            Err(error) => {
                tracing::warn!(%error, "Could not hydrate user; keeping credential");
                Ok(())
            },
        }
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("authenticated", &self.is_authenticated())
            .field("user", &self.user().map(|user| user.id))
            .finish()
    }
}

/// Drops every piece of session-derived state once the server rejects the
/// credential.
pub struct SessionTeardown {
    cache: QueryCache<HttpError>,
    session: AuthSession,
}

impl SessionTeardown {
    pub fn new(cache: QueryCache<HttpError>, session: AuthSession) -> Self {
        Self { cache, session }
    }
}

#[async_trait]
impl SessionHandler for SessionTeardown {
    async fn session_expired(&self) {
        // The failed request may itself be a cached fetch of the `auth`
        // namespace; cancelling aborts its task, so nothing awaits after that.
        if let Err(error) = self.session.clear().await {
            tracing::warn!(?error, "Could not clear persisted auth state");
        }
        let auth = keys::auth::all();
        self.cache.cancel(&auth);
        self.cache.remove(&auth);
    }
}

/// `GET /auths/user`, with a rejected credential reading as "nobody".
async fn fetch_me(client: ApiClient) -> moim_http::error::Result<Option<AuthUser>> {
    match client.get::<Option<AuthUser>>("/auths/user", &QueryParams::new()).await {
        Err(error) if error.status() == Some(401) => Ok(None),
        other => other,
    }
}

/// Sign-in, sign-out and profile flows.
#[derive(Clone)]
pub struct Auth {
    client: ApiClient,
    cache: QueryCache<HttpError>,
    session: AuthSession,
}

impl Auth {
    pub fn new(client: ApiClient, cache: QueryCache<HttpError>, session: AuthSession) -> Self {
        Self { client, cache, session }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    fn me_options(&self, authed: bool) -> QueryOptions {
        QueryOptions::identity()
            .stale_time(ME_STALE_TIME)
            .gc_time(self.cache.defaults().gc_time)
            .enabled(authed)
    }

    /// Subscribe to the current user. Only fetches while a credential exists.
    pub fn current_user(&self) -> Subscription<Option<AuthUser>, HttpError> {
        let authed = self.session.is_authenticated();
        let client = self.client.clone();
        self.cache.subscribe(keys::auth::me_state(authed), move || fetch_me(client.clone()), self.me_options(authed))
    }

    /// Sign in and load the signed-in user.
    ///
    /// Whatever the `auth` namespace held is cancelled and refetched first, so
    /// nothing cached for the previous session can surface afterwards.
    #[tracing::instrument(skip_all)]
    pub async fn signin(&self, body: &SigninBody) -> Result<Option<AuthUser>> {
        let json = serde_json::to_value(body).or_raise(|| ErrorKind::Encode)?;
        let response: SigninResponse = error::api(self.client.post("/auths/signin", Some(Body::Json(json))).await)?;
        match response.token() {
            Some(token) => self.session.tokens().set(token),
            None => tracing::warn!("Sign-in response carried no token"),
        }

        let auth = keys::auth::all();
        self.cache.cancel(&auth);
        self.cache.invalidate(&auth, RefetchType::Active).await;
        let client = self.client.clone();
        let user = self
            .cache
            .fetch_now(keys::auth::me_state(true), move || fetch_me(client.clone()), self.me_options(true))
            .await;
        let user = (*error::query(user)?).clone();
        self.session.set_user(user.clone()).await?;
        tracing::info!(user = ?user.as_ref().map(|user| user.id), "Signed in");
        Ok(user)
    }

    /// Sign out, optimistically.
    ///
    /// Local state is cleared before the server is told, and the `auth`
    /// namespace is invalidated afterwards whether or not the server agreed.
    #[tracing::instrument(skip_all)]
    pub async fn signout(&self) -> Result<()> {
        let auth = keys::auth::all();
        self.cache.cancel(&auth);
        self.session.tokens().clear();
        self.cache.set_data(&keys::auth::me_state(true), None::<AuthUser>);
        self.cache.set_data(&keys::auth::me_state(false), None::<AuthUser>);
        let cleared = self.session.set_user(None).await;

        let outcome = self.client.request(Method::POST, "/auths/signout").empty_response().send::<()>().await;
        self.cache.invalidate(&auth, RefetchType::Active).await;
        error::api(outcome)?;
        cleared?;
        tracing::info!("Signed out");
        Ok(())
    }

    pub async fn signup(&self, body: &SignupBody) -> Result<MessageResponse> {
        let json = serde_json::to_value(body).or_raise(|| ErrorKind::Encode)?;
        error::api(self.client.post("/auths/signup", Some(Body::Json(json))).await)
    }

    /// `PUT /auths/user` with a multipart form (`companyName`, `image`).
    pub async fn update_user(&self, form: MultipartForm) -> Result<AuthUser> {
        let user: AuthUser = error::api(self.client.request(Method::PUT, "/auths/user").multipart(form).send().await)?;
        self.session.set_user(Some(user.clone())).await?;
        self.cache.invalidate(&keys::auth::me(), RefetchType::Active).await;
        Ok(user)
    }

    /// Refresh the persisted profile from the server.
    pub async fn hydrate(&self) -> Result<()> {
        let client = self.client.clone();
        self.session.hydrate_user(|| async move { client.get("/auths/user", &QueryParams::new()).await }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, harness_with, user_json};
    use moim_http::error::{ApiError, ErrorKind as HttpErrorKind};
    use moim_http::transport::MockResponse;
    use moim_storage::backend::MemoryStore;
    use rstest::rstest;
    use serde_json::{Value, json};

    fn persisted_user(name: &str) -> String {
        json!({"state": {"user": user_json(7, name)}, "version": 2}).to_string()
    }

    async fn stored(harness: &crate::testing::Harness) -> Value {
        use moim_storage::KeyValueStore;
        serde_json::from_str(&harness.backend.read(AUTH_STORAGE_KEY).await.unwrap().unwrap()).unwrap()
    }

    fn credentials() -> SigninBody {
        SigninBody { email: "kim@example.com".into(), password: "secret123".into() }
    }

    #[tokio::test]
    async fn test_expired_session_tears_down_auth_state() {
        let harness = harness_with(MemoryStore::with_entries([(AUTH_STORAGE_KEY, persisted_user("kim"))])).await;
        let moim = &harness.moim;
        assert_eq!(moim.session.user().map(|user| user.id), Some(7));
        moim.tokens.set("stale");
        moim.cache.set_data(&keys::auth::me_state(true), moim.session.user());
        moim.cache.set_data(&keys::gatherings::list(None), Vec::<u64>::new());
        harness.transport.on(Method::GET, "/gatherings/joined", MockResponse::json(401, json!({"message": "expired"})));

        let error = moim.client.get::<Value>("/gatherings/joined", &QueryParams::new()).await.unwrap_err();
        assert!(matches!(&*error, HttpErrorKind::SessionExpired(_)));
        assert!(!moim.tokens.is_present());
        assert!(!moim.cache.contains(&keys::auth::me_state(true)));
        assert!(moim.cache.contains(&keys::gatherings::list(None)));
        assert_eq!(moim.session.user(), None);
        assert_eq!(stored(&harness).await["state"]["user"], Value::Null);
        assert_eq!(harness.redirects(), vec!["/signin?redirect=%2Fmy%3Ftab%3D1%23top".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_signin_keeps_session() {
        let harness = harness().await;
        harness.moim.tokens.set("current");
        harness.transport.on(
            Method::POST,
            "/auths/signin",
            MockResponse::json(401, json!({"code": "INVALID_CREDENTIALS", "message": "wrong password"})),
        );

        let error = harness.moim.auth().signin(&credentials()).await.unwrap_err();
        assert!(matches!(&*error, ErrorKind::Api { status: Some(401), session_expired: false }));
        let raw = harness.moim.client.post::<Value>("/auths/signin", None).await.unwrap_err();
        assert_eq!(raw.code(), Some("INVALID_CREDENTIALS"));

        assert_eq!(harness.moim.tokens.get().unwrap().as_str(), "current");
        assert!(harness.redirects().is_empty());
    }

    #[tokio::test]
    async fn test_signin_stores_token_and_user() {
        let harness = harness().await;
        harness.transport.on(Method::POST, "/auths/signin", MockResponse::json(200, json!({"accessToken": "fresh"})));
        harness.transport.on(Method::GET, "/auths/user", MockResponse::json(200, user_json(7, "kim")));

        let user = harness.moim.auth().signin(&credentials()).await.unwrap().unwrap();
        assert_eq!(user.name, "kim");
        assert_eq!(harness.moim.tokens.get().unwrap().as_str(), "fresh");
        assert_eq!(harness.transport.last_request().unwrap().header("authorization"), Some("Bearer fresh"));
        assert_eq!(harness.moim.session.user(), Some(user));

        let stored = stored(&harness).await;
        assert_eq!(stored["version"], 2);
        assert_eq!(stored["state"]["user"]["id"], 7);
        assert!(!stored.to_string().contains("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_response_from_before_signout_is_discarded() {
        let harness = harness().await;
        let auth = harness.moim.auth();
        harness.moim.tokens.set("old");
        harness
            .transport
            .on(Method::GET, "/auths/user", MockResponse::json(200, user_json(1, "old")).with_delay(Duration::from_secs(5)))
            .on(Method::GET, "/auths/user", MockResponse::json(200, user_json(2, "new")));
        harness.transport.on(Method::POST, "/auths/signout", MockResponse::empty(200));
        harness.transport.on(Method::POST, "/auths/signin", MockResponse::json(200, json!({"token": "new"})));

        let current = auth.current_user();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(current.state().is_fetching);

        auth.signout().await.unwrap();
        let user = auth.signin(&credentials()).await.unwrap();
        assert_eq!(user.map(|user| user.id), Some(2));

        tokio::time::sleep(Duration::from_secs(10)).await;
        let data = harness.moim.cache.get_data::<Option<AuthUser>>(&keys::auth::me_state(true)).unwrap();
        assert_eq!((*data).as_ref().map(|user| user.id), Some(2));
        assert_eq!(harness.moim.session.user().map(|user| user.id), Some(2));
    }

    #[tokio::test]
    async fn test_signout_clears_locally_even_if_the_server_fails() {
        let harness = harness().await;
        harness.moim.tokens.set("abc");
        harness.moim.cache.set_data(&keys::auth::me_state(true), Some(AuthUser {
            id: 7,
            email: "kim@example.com".into(),
            name: "kim".into(),
            company_name: None,
            image: None,
        }));
        harness.transport.on(Method::POST, "/auths/signout", MockResponse::json(500, json!({"message": "oops"})));

        let error = harness.moim.auth().signout().await.unwrap_err();
        assert_eq!(error.status(), Some(500));
        assert!(!harness.moim.tokens.is_present());
        assert_eq!(harness.transport.last_request().unwrap().header("authorization"), None);
        let me = harness.moim.cache.get_data::<Option<AuthUser>>(&keys::auth::me_state(true)).unwrap();
        assert!(me.is_none());
        assert!(harness.redirects().is_empty());
    }

    #[tokio::test]
    async fn test_guest_never_fetches_current_user() {
        let harness = harness().await;
        let current = harness.moim.auth().current_user();
        assert_eq!(current.key(), &keys::auth::me_state(false));
        assert!(current.settled().await.data.is_none());
        assert_eq!(harness.transport.count(Method::GET, "/auths/user"), 0);
    }

    #[tokio::test]
    async fn test_rejected_credential_while_loading_user() {
        let harness = harness().await;
        harness.moim.tokens.set("abc");
        harness.transport.on(Method::GET, "/auths/user", MockResponse::json(401, json!({"message": "expired"})));
        let current = harness.moim.auth().current_user();
        current.settled().await;
        assert!(!harness.moim.tokens.is_present());
        assert!(harness.moim.cache.get_data::<Option<AuthUser>>(&keys::auth::me_state(true)).is_none());
        assert_eq!(harness.redirects().len(), 1);
        assert_eq!(harness.transport.count(Method::GET, "/auths/user"), 1);
    }

    #[tokio::test]
    async fn test_update_user_sends_multipart() {
        let harness = harness().await;
        harness.moim.tokens.set("abc");
        let mut updated = user_json(7, "kim");
        updated["companyName"] = json!("Moim Inc");
        harness.transport.on(Method::PUT, "/auths/user", MockResponse::json(200, updated));

        let form = MultipartForm::new().text("companyName", "Moim Inc");
        let user = harness.moim.auth().update_user(form).await.unwrap();
        assert_eq!(user.company_name.as_deref(), Some("Moim Inc"));
        assert_eq!(harness.moim.session.user(), Some(user));
        assert_eq!(harness.transport.last_request().unwrap().header("content-type"), None);
    }

    #[rstest]
    #[case::signed_out(Ok(()), false)]
    #[case::rejected(Err(HttpErrorKind::SessionExpired(ApiError::new(401, "expired"))), false)]
    #[case::unauthorized(Err(HttpErrorKind::Http(ApiError::new(401, "nope"))), false)]
    #[case::server_down(Err(HttpErrorKind::Http(ApiError::new(503, "busy"))), true)]
    #[case::offline(Err(HttpErrorKind::Network("offline".into())), true)]
    #[tokio::test]
    async fn test_hydrate_user(
        #[case] outcome: std::result::Result<(), HttpErrorKind>,
        #[case] keeps_token: bool,
    ) {
        let harness = harness().await;
        harness.moim.tokens.set("abc");
        let outcome = outcome.map(|()| None::<AuthUser>).map_err(exn::Exn::from);
        harness.moim.session.hydrate_user(|| async { outcome }).await.unwrap();
        assert_eq!(harness.moim.tokens.is_present(), keeps_token);
    }

    #[tokio::test]
    async fn test_hydrate_user_refreshes_profile() {
        let harness = harness().await;
        harness.moim.tokens.set("abc");
        harness.transport.on(Method::GET, "/auths/user", MockResponse::json(200, user_json(7, "kim")));
        harness.moim.auth().hydrate().await.unwrap();
        assert_eq!(harness.moim.session.user().map(|user| user.name), Some("kim".to_string()));
    }

    #[tokio::test]
    async fn test_unreadable_persisted_session_is_ignored() {
        let harness = harness_with(MemoryStore::with_entries([(AUTH_STORAGE_KEY, "{oops")])).await;
        assert_eq!(harness.moim.session.user(), None);
        assert!(!harness.moim.session.is_authenticated());
    }
}
