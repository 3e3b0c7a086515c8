//! Wire protocol revisions and the signature header codec.
//!
//! The header name, the envelope field names and the mailbox layout changed
//! between server revisions. [`ProtocolVersion`] collects those choices so no
//! call site hardcodes one revision.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::crypto::{Signature, GRACE_TIME};
use crate::error::{Error, VerificationFailure};
use crate::identity::{Address, AddressScheme};

/// API version path segment shared by all supported revisions.
pub const API_SEGMENT: &str = "2";

/// Clock skew tolerated by servers of the legacy revision.
pub const LEGACY_GRACE_TIME: u64 = 30;

/// How the server hands out mailbox contents on pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    /// One GET returns every pending message as a JSON array and empties the box.
    Drain,
    /// One GET returns at most one message (a JSON object) or an empty body.
    Single,
}

/// Supported wire protocol revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// `x-pssst-hash` header, `{nonce, data}` envelopes, `/box` mailboxes,
    /// scrypt addresses.
    #[default]
    Current,
    /// `content-hash` header, `{head: {nonce, user}, body}` envelopes,
    /// mailbox at the user address, SHA-256 addresses, 30 second grace.
    Legacy,
}

impl ProtocolVersion {
    /// Name of the request/response signature header.
    pub fn signature_header(self) -> &'static str {
        match self {
            Self::Current => "x-pssst-hash",
            Self::Legacy => "content-hash",
        }
    }

    /// Allowed clock skew in seconds between signer and verifier.
    pub fn grace(self) -> u64 {
        match self {
            Self::Current => GRACE_TIME,
            Self::Legacy => LEGACY_GRACE_TIME,
        }
    }

    /// Envelope object nesting the wrapped key and sender, if any.
    pub fn head_field(self) -> Option<&'static str> {
        match self {
            Self::Current => None,
            Self::Legacy => Some("head"),
        }
    }

    /// Head field naming the sender's address. The server verifies the
    /// push against that user's key and strips the field before storing.
    pub fn sender_field(self) -> Option<&'static str> {
        match self {
            Self::Current => None,
            Self::Legacy => Some("user"),
        }
    }

    /// Envelope field holding the RSA-wrapped key and IV.
    pub fn wrapped_key_field(self) -> &'static str {
        "nonce"
    }

    /// Envelope field holding the symmetric ciphertext.
    pub fn ciphertext_field(self) -> &'static str {
        match self {
            Self::Current => "data",
            Self::Legacy => "body",
        }
    }

    /// Hash used to derive user addresses.
    pub fn address_scheme(self) -> AddressScheme {
        match self {
            Self::Current => AddressScheme::Scrypt,
            Self::Legacy => AddressScheme::Sha256,
        }
    }

    /// How pull responses are shaped.
    pub fn pull_mode(self) -> PullMode {
        match self {
            Self::Current => PullMode::Drain,
            Self::Legacy => PullMode::Single,
        }
    }

    /// Path of a user resource (create, delete).
    pub fn user_path(self, address: &Address) -> String {
        address.to_string()
    }

    /// Path of a user's public key.
    pub fn key_path(self, address: &Address) -> String {
        format!("{address}/key")
    }

    /// Path of a user's mailbox (push, pull).
    pub fn mailbox_path(self, address: &Address) -> String {
        match self {
            Self::Current => format!("{address}/box"),
            Self::Legacy => address.to_string(),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("current"),
            Self::Legacy => f.write_str("legacy"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" | "2" => Ok(Self::Current),
            "legacy" | "1" => Ok(Self::Legacy),
            other => Err(Error::Config(format!("unknown protocol version: {other}"))),
        }
    }
}

/// Render a signature as `"<timestamp>; <base64>"`.
pub fn format_signature_header(signature: &Signature) -> String {
    format!("{}; {}", signature.timestamp, STANDARD.encode(&signature.bytes))
}

/// Parse a header matching `^[0-9]+; ?[A-Za-z0-9+/]+=*$`.
pub fn parse_signature_header(value: &str) -> Result<Signature, VerificationFailure> {
    let (timestamp, encoded) = value
        .split_once(';')
        .ok_or(VerificationFailure::MalformedHeader)?;
    let encoded = encoded.strip_prefix(' ').unwrap_or(encoded);

    if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VerificationFailure::MalformedHeader);
    }

    let body = encoded.trim_end_matches('=');
    let valid_base64 = !body.is_empty()
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/');
    if !valid_base64 {
        return Err(VerificationFailure::MalformedHeader);
    }

    let timestamp = timestamp
        .parse::<i64>()
        .map_err(|_| VerificationFailure::MalformedHeader)?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| VerificationFailure::MalformedHeader)?;

    Ok(Signature { timestamp, bytes })
}
