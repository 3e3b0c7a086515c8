//! Signed request/response exchange with the server.
//!
//! Every API call signs its body with the own key (or an injected
//! [`Signer`]) and every response must carry a valid server signature over
//! its body. The response signature is checked before the status code is
//! looked at, so a forged error body can never bypass verification.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::crypto::{self, Signer};
use crate::error::{Error, Result, VerificationFailure};
use crate::keystore::{KeyStore, Lifecycle};
use crate::protocol::{format_signature_header, parse_signature_header, ProtocolVersion, API_SEGMENT};
use crate::transport::{HttpRequest, Method, Transport};

/// Status codes accepted as success.
pub const SUCCESS_STATUS: [u16; 2] = [200, 204];

/// Status the server answers with when it can not verify our signature.
const UNAUTHORIZED: u16 = 401;

const JSON_MIME: &str = "application/json";
const TEXT_MIME: &str = "text/plain";

/// A verified response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No body.
    Empty,
    /// Plain text body.
    Text(String),
    /// Parsed JSON body.
    Json(Value),
}

impl Payload {
    /// Whether the payload carries no data (empty body, JSON null or empty array).
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Empty => true,
            Payload::Text(text) => text.is_empty(),
            Payload::Json(Value::Null) => true,
            Payload::Json(Value::Array(items)) => items.is_empty(),
            Payload::Json(_) => false,
        }
    }

    /// Text content; JSON strings are unwrapped.
    pub fn into_text(self) -> Option<String> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Json(Value::String(text)) => Some(text),
            _ => None,
        }
    }
}

/// Signs outbound requests and verifies inbound responses.
pub struct RequestAuthenticator<T> {
    transport: T,
    api_url: String,
    protocol: ProtocolVersion,
    user_agent: String,
    signer: Option<Arc<dyn Signer>>,
}

impl<T: Transport> RequestAuthenticator<T> {
    /// Create an authenticator talking to `config.api_url` through `transport`.
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        Self {
            transport,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            protocol: config.protocol,
            user_agent: config.user_agent.clone(),
            signer: None,
        }
    }

    /// Replace (or clear) the injected signer.
    pub fn set_signer(&mut self, signer: Option<Arc<dyn Signer>>) {
        self.signer = signer;
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Perform a signed API call and return the verified body.
    pub async fn call(
        &self,
        keys: &KeyStore,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Payload> {
        if keys.lifecycle() != Lifecycle::Active {
            return Err(Error::IdentityDeleted);
        }

        let body = match body {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };

        let signer: &dyn Signer = match &self.signer {
            Some(signer) => signer.as_ref(),
            None => keys.own_key(),
        };
        let signature = signer.sign(body.as_bytes())?;

        let content_type = if body.is_empty() { TEXT_MIME } else { JSON_MIME };
        let header = self.protocol.signature_header();
        let request = HttpRequest {
            method,
            url: format!("{}/{API_SEGMENT}/{path}", self.api_url),
            headers: vec![
                ("content-type".to_string(), content_type.to_string()),
                ("user-agent".to_string(), self.user_agent.clone()),
                (header.to_string(), format_signature_header(&signature)),
            ],
            body,
        };

        debug!(%method, path, "signed api request");
        let response = self.transport.request(request).await?;

        let signature = response
            .header(header)
            .ok_or(VerificationFailure::MissingHeader)
            .and_then(parse_signature_header)
            .map_err(|failure| {
                warn!(%method, path, %failure, "response verification failed");
                Error::VerificationFailed(failure)
            })?;

        let server = keys.server_key().ok_or_else(|| {
            warn!(%method, path, "no server key cached");
            Error::VerificationFailed(VerificationFailure::NoServerKey)
        })?;

        let grace = self.protocol.grace();
        if !server.verify_within(response.text.as_bytes(), &signature, crypto::now(), grace) {
            warn!(%method, path, status = response.status, "response signature mismatch");
            return Err(Error::VerificationFailed(VerificationFailure::SignatureMismatch));
        }

        if response.status == UNAUTHORIZED {
            warn!(%method, path, "server could not verify request");
            return Err(Error::VerificationFailed(VerificationFailure::RejectedByServer));
        }

        if !SUCCESS_STATUS.contains(&response.status) {
            debug!(%method, path, status = response.status, "server rejected request");
            return Err(Error::ServerRejected(response.text));
        }

        if response.text.is_empty() {
            return Ok(Payload::Empty);
        }

        let mime = response.header("content-type").unwrap_or(TEXT_MIME);
        if mime.starts_with(JSON_MIME) {
            Ok(Payload::Json(serde_json::from_str(&response.text)?))
        } else {
            Ok(Payload::Text(response.text))
        }
    }

    /// Fetch a static file from the API root without signing or verification.
    pub async fn fetch_file(&self, path: &str) -> Result<String> {
        let request = HttpRequest {
            method: Method::Get,
            url: format!("{}/{path}", self.api_url),
            headers: vec![("user-agent".to_string(), self.user_agent.clone())],
            body: String::new(),
        };

        let response = self.transport.request(request).await?;
        if !SUCCESS_STATUS.contains(&response.status) {
            return Err(Error::ServerRejected(format!(
                "{path} not found ({})",
                response.status
            )));
        }
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_payloads() {
        assert!(Payload::Empty.is_empty());
        assert!(Payload::Text(String::new()).is_empty());
        assert!(Payload::Json(Value::Null).is_empty());
        assert!(Payload::Json(json!([])).is_empty());
        assert!(!Payload::Json(json!([{"nonce": "", "data": ""}])).is_empty());
        assert!(!Payload::Json(json!({})).is_empty());
    }

    #[test]
    fn text_unwraps_json_strings() {
        assert_eq!(Payload::Text("pem".into()).into_text().as_deref(), Some("pem"));
        assert_eq!(Payload::Json(json!("pem")).into_text().as_deref(), Some("pem"));
        assert_eq!(Payload::Json(json!({"key": "pem"})).into_text(), None);
        assert_eq!(Payload::Empty.into_text(), None);
    }
}
