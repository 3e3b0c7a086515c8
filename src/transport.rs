//! HTTP transport seam.
//!
//! The trust core only needs a request/response primitive that tells a
//! completed response apart from a connection failure or timeout. Anything
//! implementing [`Transport`] will do; [`HttpTransport`] is the reqwest-backed
//! implementation used by the CLI.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// HTTP methods used by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequest {
    /// Look up a request header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A completed response. Header names are stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub text: String,
}

impl HttpResponse {
    /// Create a response with a status and body.
    pub fn new(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            text: text.into(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a response header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Failures before a response was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),
    /// No response within the configured timeout.
    #[error("connection timeout")]
    Timeout,
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connection(reason) => Error::ConnectionFailed(reason),
            TransportError::Timeout => Error::Timeout,
        }
    }
}

/// Request/response primitive the client talks through.
pub trait Transport: Send + Sync {
    /// Send one request and wait for its response.
    fn request(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = std::result::Result<HttpResponse, TransportError>> + Send;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport honoring the timeout and certificate settings.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_certificate)
            .build()
            .map_err(|e| Error::Config(format!("failed to create http client: {e}")))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn request(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = std::result::Result<HttpResponse, TransportError>> + Send {
        async move {
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Delete => reqwest::Method::DELETE,
            };

            debug!(method = %request.method, url = %request.url, "sending request");

            let mut builder = self.client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder
                .body(request.body)
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
                })
                .collect();
            let text = response.text().await.map_err(map_reqwest_error)?;

            Ok(HttpResponse {
                status,
                headers,
                text,
            })
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}
