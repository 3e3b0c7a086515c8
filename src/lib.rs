//! # Pssst
//!
//! Client trust core for the pssst end-to-end encrypted mailbox service.
//!
//! ## Features
//!
//! - Canonical user names and server-side address derivation
//! - RSA key pairs with password-protected local storage
//! - Hybrid (RSA-OAEP + AES-256-CBC) message encryption
//! - Timestamp-bound signatures on every request and response
//! - A per-identity key container caching server and peer keys
//!
//! ## Example
//!
//! ```no_run
//! use pssst::{ClientConfig, Identity, MailboxClient};
//!
//! # async fn example() -> pssst::Result<()> {
//! let alice = Identity::parse("alice:Pass1234")?;
//! let mut client = MailboxClient::connect(alice, ClientConfig::from_env()).await?;
//!
//! client.create().await?;
//! client.push("bob", b"Hello Bob!").await?;
//!
//! while let Some(message) = client.pull().await? {
//!     println!("{}", String::from_utf8_lossy(&message));
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod message;
pub mod protocol;
pub mod transport;

mod client;

pub use auth::{Payload, RequestAuthenticator};
pub use client::MailboxClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use crypto::{KeyPair, Signature, Signer};
pub use error::{Error, Result, VerificationFailure};
pub use identity::{Address, CanonicalName, Identity};
pub use keystore::{KeyStore, Label, Lifecycle};
pub use message::EncryptedMessage;
pub use protocol::ProtocolVersion;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, Transport, TransportError};
