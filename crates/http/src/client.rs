use crate::body::{Body, MultipartForm};
use crate::error::{ApiError, ErrorKind, Result};
use crate::messages;
use crate::query::QueryParams;
use crate::session::{Navigator, SessionHandler, is_auth_endpoint, sign_in_redirect};
use crate::transport::{HttpRequest, HttpResponse, RequestBody, TransportHandle};
use exn::ResultExt;
use moim_auth::{Token, TokenStore};
use moim_loading::LoadingCoordinator;
use reqwest::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Typed client for the moim API.
///
/// Cloning is cheap; clones share the transport, token store and hooks.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    base_url: String,
    team_id: String,
    transport: TransportHandle,
    tokens: TokenStore,
    fallback_token: RwLock<Option<Token>>,
    loading: Option<LoadingCoordinator>,
    session: Option<Arc<dyn SessionHandler>>,
    navigator: Option<Arc<dyn Navigator>>,
}

pub struct ApiClientBuilder {
    base_url: String,
    team_id: String,
    transport: TransportHandle,
    tokens: TokenStore,
    fallback_token: Option<Token>,
    loading: Option<LoadingCoordinator>,
    session: Option<Arc<dyn SessionHandler>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl ApiClientBuilder {
    /// Drive this coordinator around non-GET requests.
    pub fn loading(mut self, loading: LoadingCoordinator) -> Self {
        self.loading = Some(loading);
        self
    }

    pub fn session_handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.session = Some(handler);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn fallback_token(mut self, token: Option<Token>) -> Self {
        self.fallback_token = token;
        self
    }

    pub fn build(self) -> ApiClient {
        ApiClient {
            inner: Arc::new(Inner {
                base_url: self.base_url.trim_end_matches('/').to_string(),
                team_id: self.team_id,
                transport: self.transport,
                tokens: self.tokens,
                fallback_token: RwLock::new(self.fallback_token),
                loading: self.loading,
                session: self.session,
                navigator: self.navigator,
            }),
        }
    }
}

impl ApiClient {
    pub fn builder(
        base_url: impl Into<String>,
        team_id: impl Into<String>,
        transport: TransportHandle,
        tokens: TokenStore,
    ) -> ApiClientBuilder {
        ApiClientBuilder {
            base_url: base_url.into(),
            team_id: team_id.into(),
            transport,
            tokens,
            fallback_token: None,
            loading: None,
            session: None,
            navigator: None,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    /// Token used when the token store is empty.
    pub fn set_fallback_token(&self, token: Option<Token>) {
        let mut fallback = self.inner.fallback_token.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *fallback = token;
    }

    fn token(&self) -> Option<Token> {
        self.inner.tokens.get().or_else(|| {
            self.inner.fallback_token.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
        })
    }

    /// Absolute URL for `path`, without a query string.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}{}", self.inner.base_url, self.inner.team_id, normalize_path(path))
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> ApiRequest {
        ApiRequest {
            client: self.clone(),
            method,
            path: normalize_path(&path.into()),
            query: QueryParams::new(),
            headers: HeaderMap::new(),
            body: None,
            empty_response: false,
            loading: true,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &QueryParams) -> Result<T> {
        self.request(Method::GET, path).query(query.clone()).send().await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Option<Body>) -> Result<T> {
        self.request(Method::POST, path).body(body).send().await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Option<Body>) -> Result<T> {
        self.request(Method::PUT, path).body(body).send().await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::DELETE, path).send().await
    }

    /// Clear the credential, run host teardown, then navigate to sign-in.
    async fn expire_session(&self, path: &str) {
        self.inner.tokens.clear();
        if let Some(handler) = &self.inner.session {
            handler.session_expired().await;
        }
        let Some(navigator) = &self.inner.navigator else { return };
        if let Some(location) = navigator.current_location() {
            let target = sign_in_redirect(&location);
            tracing::info!(path, redirect = %target, "session expired; redirecting to sign-in");
            navigator.replace(&target);
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') { path.to_string() } else { format!("/{path}") }
}

/// Structured error body. Anything that doesn't fit falls back to the
/// status-only message.
#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    parameter: Option<String>,
}
impl ErrorBody {
    fn parse(body: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(body).ok()?;
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

/// A request being built. Nothing is sent until [`send`](Self::send).
#[must_use = "requests do nothing until sent"]
pub struct ApiRequest {
    client: ApiClient,
    method: Method,
    path: String,
    query: QueryParams,
    headers: HeaderMap,
    body: Option<Body>,
    empty_response: bool,
    loading: bool,
}

impl ApiRequest {
    pub fn query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn body(mut self, body: Option<Body>) -> Self {
        self.body = body;
        self
    }

    pub fn json(self, value: Value) -> Self {
        self.body(Some(Body::Json(value)))
    }

    pub fn multipart(self, form: MultipartForm) -> Self {
        self.body(Some(Body::Multipart(form)))
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Don't read the success body; decode as if it were `null`.
    pub fn empty_response(mut self) -> Self {
        self.empty_response = true;
        self
    }

    /// Whether this request drives the loading indicator (non-GET only).
    pub fn loading(mut self, enabled: bool) -> Self {
        self.loading = enabled;
        self
    }

    /// Send and decode the success body into `T`.
    ///
    /// # Errors
    ///
    /// See [`ErrorKind`] for how failures are classified.
    pub async fn send<T: DeserializeOwned>(self) -> Result<T> {
        let path = self.path.clone();
        let decoded = match self.execute().await? {
            None => serde_json::from_value(Value::Null),
            Some(bytes) => serde_json::from_slice(&bytes),
        };
        decoded.map_err(|error| {
            tracing::warn!(path, %error, "response did not match the expected shape");
            exn::Exn::from(ErrorKind::schema_validation())
        })
    }

    /// Send and return the success body as untyped JSON (`null` when empty).
    pub async fn send_value(self) -> Result<Value> {
        self.send().await
    }

    fn build(&mut self) -> Result<HttpRequest> {
        let mut headers = std::mem::take(&mut self.headers);
        let body = match self.body.take() {
            Some(Body::Multipart(form)) => RequestBody::Multipart(form),
            other => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                match other {
                    Some(Body::Json(value)) => RequestBody::Bytes(
                        serde_json::to_vec(&value).or_raise(|| ErrorKind::InvalidRequest("unserializable body".into()))?,
                    ),
                    _ => RequestBody::Empty,
                }
            },
        };
        if let Some(token) = self.client.token() {
            let value = HeaderValue::from_str(&token.bearer())
                .or_raise(|| ErrorKind::InvalidRequest("token is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        let url = format!("{}{}", self.client.url(&self.path), self.query.to_query_string());
        Ok(HttpRequest { method: self.method.clone(), url, headers, body })
    }

    /// Returns the success body, or `None` when the response is empty.
    #[tracing::instrument(skip_all, fields(method = %self.method, path = %self.path))]
    async fn execute(mut self) -> Result<Option<Vec<u8>>> {
        let _loading = match &self.client.inner.loading {
            Some(loading) if self.loading && self.method != Method::GET => Some(loading.enter()),
            _ => None,
        };
        let request = self.build()?;
        let response = self.client.inner.transport.send(request).await?;
        if response.status.is_success() {
            if self.empty_response || response.declares_empty() {
                return Ok(None);
            }
            return Ok(Some(response.body));
        }
        Err(self.classify_failure(response).await)
    }

    async fn classify_failure(&self, response: HttpResponse) -> crate::error::Error {
        let status = response.status.as_u16();
        let error = match ErrorBody::parse(&response.body) {
            Some(ErrorBody { code, message, parameter }) => ApiError {
                status,
                message: messages::user_message(status, code.as_deref(), message.as_deref()),
                code,
                parameter,
            },
            None => ApiError::new(status, messages::for_status(status)),
        };
        tracing::debug!(status, code = ?error.code, "request failed");
        if response.status == StatusCode::UNAUTHORIZED && !is_auth_endpoint(&self.path) {
            self.client.expire_session(&self.path).await;
            return exn::Exn::from(ErrorKind::SessionExpired(error));
        }
        exn::Exn::from(ErrorKind::Http(error))
    }
}
