//! Scripted in-memory transport for testing.

use super::{HttpRequest, HttpResponse, Transport};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Scripted response for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    outcome: Outcome,
    delay: Option<Duration>,
}

#[derive(Debug, Clone)]
enum Outcome {
    Respond { status: StatusCode, headers: HeaderMap, body: Vec<u8> },
    Fail(String),
}

impl MockResponse {
    /// JSON response with the given status.
    ///
    /// Panics on an invalid status code. If test setup is wrong, then the
    /// test should not pass.
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::raw(status, headers, body.to_string().into_bytes())
    }

    /// Plain-text (non-JSON) body.
    pub fn text(status: u16, body: &str) -> Self {
        Self::raw(status, HeaderMap::new(), body.as_bytes().to_vec())
    }

    /// Response without a body.
    pub fn empty(status: u16) -> Self {
        Self::raw(status, HeaderMap::new(), Vec::new())
    }

    /// The request never reaches a server.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self { outcome: Outcome::Fail(message.into()), delay: None }
    }

    fn raw(status: u16, headers: HeaderMap, body: Vec<u8>) -> Self {
        let Ok(status) = StatusCode::from_u16(status) else {
            panic!("MockResponse: invalid status {status}");
        };
        Self { outcome: Outcome::Respond { status, headers, body }, delay: None }
    }

    /// Add a response header.
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        if let Outcome::Respond { headers, .. } = &mut self.outcome {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        self
    }

    /// Hold the response back for `delay` (tokio time, so paused clocks apply).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct Route {
    method: Method,
    path: String,
    responses: VecDeque<MockResponse>,
}

/// In-memory transport that replays scripted responses and records requests.
///
/// Routes match on method and on the request path *after* the team segment,
/// ignoring the query string. Responses queued for a route are served in
/// order; the last one repeats forever.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Path without the leading team segment or query.
fn route_path(url: &str) -> String {
    let path = url::Url::parse(url).map(|url| url.path().to_string()).unwrap_or_default();
    match path.get(1..).and_then(|rest| rest.find('/')) {
        Some(index) => path[index + 1..].to_string(),
        None => "/".to_string(),
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method path`.
    pub fn on(&self, method: Method, path: &str, response: MockResponse) -> &Self {
        let mut routes = lock(&self.routes);
        match routes.iter_mut().find(|route| route.method == method && route.path == path) {
            Some(route) => route.responses.push_back(response),
            None => routes.push(Route { method, path: path.to_string(), responses: VecDeque::from([response]) }),
        }
        self
    }

    /// Every request sent so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Number of requests sent to `method path`.
    pub fn count(&self, method: Method, path: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|request| request.method == method && route_path(&request.url) == path)
            .count()
    }

    fn next_response(&self, method: &Method, path: &str) -> Option<MockResponse> {
        let mut routes = lock(&self.routes);
        let route = routes.iter_mut().find(|route| &route.method == method && route.path == path)?;
        if route.responses.len() > 1 { route.responses.pop_front() } else { route.responses.front().cloned() }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let path = route_path(&request.url);
        let method = request.method.clone();
        lock(&self.requests).push(request);
        let Some(response) = self.next_response(&method, &path) else {
            exn::bail!(ErrorKind::Network(format!("no mock response for {method} {path}")));
        };
        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        match response.outcome {
            Outcome::Respond { status, headers, body } => Ok(HttpResponse { status, headers, body }),
            Outcome::Fail(message) => Err(exn::Exn::from(ErrorKind::Network(message))),
        }
    }
}
