//! Canonical user names and the addresses derived from them.
//!
//! A raw user string looks like `[pssst.]name[:password][@server]`. The name
//! part is 2-63 word characters and always stored lowercased. The canonical
//! form `pssst.<name>` is the single input for both the local container file
//! name and the server-side address hash.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Namespace every canonical name lives in.
pub const NAMESPACE: &str = "pssst";

/// Minimum length of the name segment.
pub const MIN_NAME_LEN: usize = 2;

/// Maximum length of the name segment.
pub const MAX_NAME_LEN: usize = 63;

/// Minimum password length accepted for protecting a private key.
pub const MIN_PASSWORD_LEN: usize = 8;

const ADDRESS_SALT: &[u8] = b"[Pssst!]";
const ADDRESS_LEN: usize = 32;

/// Hash function used to turn a canonical name into an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressScheme {
    /// scrypt with the fixed pssst salt (N=16384, r=8, p=1).
    Scrypt,
    /// Plain SHA-256 of the canonical name.
    Sha256,
}

/// A parsed user identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    username: String,
    password: Option<String>,
    server: Option<String>,
}

impl Identity {
    /// Parse a raw user string.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_with(raw, None, None)
    }

    /// Parse a raw user string with explicit password and server overrides.
    ///
    /// Explicit values win over the `:password` and `@server` suffixes; the
    /// suffixes are still stripped from the name.
    pub fn parse_with(raw: &str, password: Option<String>, server: Option<String>) -> Result<Self> {
        let raw = raw.trim();
        let rest = raw
            .strip_prefix(NAMESPACE)
            .and_then(|r| r.strip_prefix('.'))
            .unwrap_or(raw);

        validate_grammar(rest)?;

        let (rest, suffix_server) = match rest.split_once('@') {
            Some((name, server)) => (name, Some(server.to_string())),
            None => (rest, None),
        };
        let (name, suffix_password) = match rest.split_once(':') {
            Some((name, password)) => (name, Some(password.to_string())),
            None => (rest, None),
        };

        Ok(Self {
            username: name.to_ascii_lowercase(),
            password: password.or(suffix_password),
            server: server.or(suffix_server),
        })
    }

    /// The lowercased user name without namespace.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password, if one was supplied.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The server override, if one was supplied.
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Replace the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// The canonical name `pssst.<username>`.
    pub fn canonical(&self) -> CanonicalName {
        CanonicalName(format!("{NAMESPACE}.{}", self.username))
    }

    /// Derive the server-side address of this identity.
    pub fn address(&self, scheme: AddressScheme) -> Result<Address> {
        self.canonical().address(scheme)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NAMESPACE}.{}", self.username)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("server", &self.server)
            .finish()
    }
}

/// The canonical representation of a user name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalName(String);

impl CanonicalName {
    /// The canonical string, e.g. `pssst.alice`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the local key container for this name.
    pub fn file_name(&self) -> String {
        format!(".{}", self.0)
    }

    /// Hash the canonical name into an address.
    pub fn address(&self, scheme: AddressScheme) -> Result<Address> {
        let mut out = [0u8; ADDRESS_LEN];
        match scheme {
            AddressScheme::Scrypt => {
                let params = scrypt::Params::new(14, 8, 1, ADDRESS_LEN)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                scrypt::scrypt(self.0.as_bytes(), ADDRESS_SALT, &params, &mut out)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
            }
            AddressScheme::Sha256 => out.copy_from_slice(&Sha256::digest(self.0.as_bytes())),
        }
        Ok(Address(hex::encode(out)))
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex-encoded address used as the server-side resource key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// The lowercase hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check a password against the strength policy: at least one uppercase
/// letter, one lowercase letter, one digit and [`MIN_PASSWORD_LEN`] chars.
pub fn check_password_strength(password: &str) -> Result<()> {
    let strong = password.chars().count() >= MIN_PASSWORD_LEN
        && password.chars().any(|c| c.is_uppercase())
        && password.chars().any(|c| c.is_lowercase())
        && password.chars().any(|c| c.is_ascii_digit());

    if strong {
        Ok(())
    } else {
        Err(Error::WeakPassword)
    }
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// Matches `\w{2,63}(:\S+)?(@\S+)?` against the input without namespace.
fn validate_grammar(input: &str) -> Result<()> {
    let name_len = input.bytes().take_while(|&b| is_word(b)).count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&name_len) {
        return Err(Error::InvalidIdentity);
    }

    let tail = &input[name_len..];
    if tail.is_empty() {
        return Ok(());
    }

    let value = tail
        .strip_prefix(':')
        .or_else(|| tail.strip_prefix('@'))
        .ok_or(Error::InvalidIdentity)?;

    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(Error::InvalidIdentity);
    }
    Ok(())
}
