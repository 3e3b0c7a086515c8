//! Client configuration.
//!
//! ```
//! use pssst::config::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .with_api_url("https://api.pssst.name")
//!     .with_timeout(Duration::from_secs(10))
//!     .build_validated()
//!     .unwrap();
//! assert!(config.verify_certificate);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::ProtocolVersion;

/// API address used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:62221";

/// Environment variable overriding the API address.
pub const API_ENV_VAR: &str = "PSSST";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for a [`MailboxClient`](crate::MailboxClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the API, without the version segment.
    pub api_url: String,

    /// Wire protocol revision spoken with the server.
    pub protocol: ProtocolVersion,

    /// Directory holding the key containers.
    pub key_dir: PathBuf,

    /// Expected SHA-512 fingerprint (hex) of the server key file.
    pub server_fingerprint: Option<String>,

    /// Whether the transport validates TLS certificates.
    pub verify_certificate: bool,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Value of the `user-agent` header.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            protocol: ProtocolVersion::default(),
            key_dir: default_key_dir(),
            server_fingerprint: None,
            verify_certificate: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: format!("Pssst CLI {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Create a configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Defaults plus the `PSSST` environment override.
    pub fn from_env() -> Self {
        let builder = ClientConfigBuilder::new();
        match std::env::var(API_ENV_VAR) {
            Ok(url) if !url.trim().is_empty() => builder.with_api_override(url.trim()).build(),
            _ => builder.build(),
        }
    }

    /// Use `server` as the API address. Certificate verification is turned
    /// off for overrides: trust comes from the signed responses instead.
    pub fn with_server_override(mut self, server: &str) -> Self {
        self.api_url = server.trim_end_matches('/').to_string();
        self.verify_certificate = false;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let lower = self.api_url.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Err(Error::Config(format!(
                "api url must start with http:// or https://: {}",
                self.api_url
            )));
        }

        if self.key_dir.as_os_str().is_empty() {
            return Err(Error::Config("key directory cannot be empty".into()));
        }

        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }

        if let Some(fingerprint) = &self.server_fingerprint {
            if fingerprint.len() != 128 || !fingerprint.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::Config(
                    "server fingerprint must be 128 hex characters".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Clone, Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Start from defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish without validation.
    pub fn build(self) -> ClientConfig {
        self.config
    }

    /// Finish and validate.
    pub fn build_validated(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Set the API address. Certificate verification stays as configured.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the API address as an override (disables certificate checks).
    pub fn with_api_override(mut self, url: impl AsRef<str>) -> Self {
        self.config = self.config.with_server_override(url.as_ref());
        self
    }

    /// Set the protocol revision.
    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Set the key container directory.
    pub fn with_key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.key_dir = dir.into();
        self
    }

    /// Pin the server key to a SHA-512 fingerprint.
    pub fn with_server_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.config.server_fingerprint = Some(fingerprint.into().to_ascii_lowercase());
        self
    }

    /// Toggle TLS certificate verification explicitly.
    pub fn with_certificate_verification(mut self, verify: bool) -> Self {
        self.config.verify_certificate = verify;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }
}

fn default_key_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
