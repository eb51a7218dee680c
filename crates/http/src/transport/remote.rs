//! Reqwest-backed transport.

use super::{HttpRequest, HttpResponse, RequestBody, Transport};
use crate::body::{MultipartForm, PartValue};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

const USER_AGENT: &str = concat!("moim/", env!("CARGO_PKG_VERSION"));

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .or_raise(|| ErrorKind::InvalidRequest("could not build HTTP client".to_string()))?;
        Ok(Self { client })
    }

    fn multipart(form: MultipartForm) -> Result<Form> {
        let mut multipart = Form::new();
        for part in form.parts() {
            let name = part.name.clone();
            multipart = match &part.value {
                PartValue::Text(text) => multipart.text(name, text.clone()),
                PartValue::File { file_name, mime, bytes } => {
                    let mut file = Part::bytes(bytes.clone()).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        file = file
                            .mime_str(mime)
                            .or_raise(|| ErrorKind::InvalidRequest(format!("invalid MIME type {mime:?}")))?;
                    }
                    multipart.part(name, file)
                },
            };
        }
        Ok(multipart)
    }
}

fn map_transport_error(error: reqwest::Error) -> ErrorKind {
    if error.is_timeout() {
        ErrorKind::Network("request timed out".to_string())
    } else if error.is_connect() {
        ErrorKind::Network(format!("connection failed: {error}"))
    } else {
        ErrorKind::Network(error.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &str {
        "reqwest"
    }

    #[tracing::instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.request(request.method, &request.url).headers(request.headers);
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Multipart(form) => builder.multipart(Self::multipart(form)?),
        };
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_transport_error)?.to_vec();
        tracing::debug!(%status, bytes = body.len(), "response received");
        Ok(HttpResponse { status, headers, body })
    }
}
