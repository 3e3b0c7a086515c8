//! Error types for the pssst client.
//!
//! Validation errors (`InvalidIdentity`, `PasswordRequired`, `WeakPassword`)
//! are raised before any network activity. `VerificationFailed` always aborts
//! a call: a response that fails verification is never interpreted as data.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The raw user name does not match the identity grammar.
    #[error("User name invalid")]
    InvalidIdentity,

    /// A password is needed to protect or unlock the private key.
    #[error("Password required")]
    PasswordRequired,

    /// The password does not satisfy the strength policy.
    #[error("Password weak")]
    WeakPassword,

    /// The stored private key could not be imported. Covers corrupt data too.
    #[error("Password wrong")]
    WrongPassword,

    /// The local container is gone; this client can not be used any further.
    #[error("User was deleted")]
    IdentityDeleted,

    /// No container entry exists for the label.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The response (or our request, as judged by the server) failed
    /// signature verification.
    #[error("Verification failed")]
    VerificationFailed(VerificationFailure),

    /// The server answered with a verified, non-success response.
    #[error("{0}")]
    ServerRejected(String),

    /// The server could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server did not answer in time.
    #[error("Connection timeout")]
    Timeout,

    /// The fetched server key does not match the configured fingerprint.
    #[error("Server key untrusted")]
    UntrustedServerKey,

    /// Cryptographic primitive failure (key generation, OAEP, cipher).
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Malformed base64, JSON or envelope data.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid client configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Container file I/O failure.
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Diagnostic detail for [`Error::VerificationFailed`].
///
/// The kinds are collapsed into one error for callers; the detail only
/// ends up in logs and `Debug` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The response carried no signature header.
    MissingHeader,
    /// The signature header did not match `digits; base64`.
    MalformedHeader,
    /// The signature did not verify, or the timestamp is outside the grace window.
    SignatureMismatch,
    /// No server public key is cached to verify against.
    NoServerKey,
    /// The server refused to verify our request signature.
    RejectedByServer,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingHeader => "signature header missing",
            Self::MalformedHeader => "signature header malformed",
            Self::SignatureMismatch => "signature mismatch",
            Self::NoServerKey => "no server key cached",
            Self::RejectedByServer => "request rejected by server",
        };
        f.write_str(text)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Encoding(err.to_string())
    }
}
