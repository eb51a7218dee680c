//! Wire-level transports.
//!
//! [`ApiClient`](crate::ApiClient) builds a fully-resolved [`HttpRequest`] and
//! hands it to a [`Transport`]; everything about status classification and
//! decoding happens back in the client. Transports only move bytes, and must
//! never serve responses from a cache.

#[cfg(any(test, feature = "mock"))]
mod mock;
mod remote;

#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockResponse, MockTransport};
pub use self::remote::ReqwestTransport;
use crate::body::MultipartForm;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use reqwest::{Method, StatusCode};
use std::sync::Arc;

pub type TransportHandle = Arc<dyn Transport>;

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Bytes(Vec<u8>),
    Multipart(MultipartForm),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL including the query string
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}
impl HttpRequest {
    /// Body decoded as JSON, for assertions on recorded requests.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        match &self.body {
            RequestBody::Bytes(bytes) => serde_json::from_slice(bytes).ok(),
            RequestBody::Empty | RequestBody::Multipart(_) => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}
impl HttpResponse {
    /// Whether the server declared an empty body.
    pub fn declares_empty(&self) -> bool {
        self.status == StatusCode::NO_CONTENT
            || self.headers.get(CONTENT_LENGTH).is_some_and(|length| length.as_bytes() == b"0")
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Name of the transport (used for logging only).
    fn name(&self) -> &str;

    /// Perform the request.
    ///
    /// Any response, including error statuses, is `Ok`. Only failures to get a
    /// response at all are errors, and they must be
    /// [`ErrorKind::Network`](crate::error::ErrorKind::Network).
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}
