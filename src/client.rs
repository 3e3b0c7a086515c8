use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::{Payload, RequestAuthenticator};
use crate::config::ClientConfig;
use crate::crypto::{fingerprint, KeyPair, Signer};
use crate::error::{Error, Result};
use crate::identity::{Address, Identity};
use crate::keystore::{KeyStore, Label, Lifecycle};
use crate::message::EncryptedMessage;
use crate::protocol::{ProtocolVersion, PullMode};
use crate::transport::{HttpTransport, Method, Transport};

/// Path of the server public key file below the API root.
const SERVER_KEY_FILE: &str = "key";

/// Main client for one local identity.
///
/// Each operation is a sequence of signed request/response round trips;
/// a client never has more than one request in flight.
pub struct MailboxClient<T = HttpTransport> {
    identity: Identity,
    address: Address,
    config: ClientConfig,
    keys: KeyStore,
    auth: RequestAuthenticator<T>,
    inbox: VecDeque<EncryptedMessage>,
}

impl MailboxClient<HttpTransport> {
    /// Open `identity` against the configured server over HTTP.
    pub async fn connect(identity: Identity, config: ClientConfig) -> Result<Self> {
        let config = effective_config(&identity, config);
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(identity, config, transport).await
    }
}

impl<T: Transport> MailboxClient<T> {
    /// Open `identity` using a custom transport.
    ///
    /// Validates configuration and password before any network activity,
    /// opens (or creates) the key container and, on first use, fetches and
    /// caches the server public key.
    pub async fn with_transport(identity: Identity, config: ClientConfig, transport: T) -> Result<Self> {
        let config = effective_config(&identity, config);
        config.validate()?;

        let password = identity.password().ok_or(Error::PasswordRequired)?;
        let address = identity.address(config.protocol.address_scheme())?;
        let scheme = KeyStore::scheme_for(&config.api_url);
        let mut keys = KeyStore::open(&config.key_dir, &identity, password, &scheme)?;

        let auth = RequestAuthenticator::new(transport, &config);

        if keys.server_key().is_none() {
            let pem = auth.fetch_file(SERVER_KEY_FILE).await?;
            if let Some(expected) = &config.server_fingerprint {
                if fingerprint(pem.as_bytes()) != expected.to_ascii_lowercase() {
                    return Err(Error::UntrustedServerKey);
                }
            }
            keys.save_server_key(pem.as_bytes())?;
            debug!(scheme = %scheme, "cached server key");
        }

        Ok(Self {
            identity,
            address,
            config,
            keys,
            auth,
            inbox: VecDeque::new(),
        })
    }

    /// The identity this client acts for.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The own server-side address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The local key container.
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// The effective configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The protocol revision in use.
    pub fn protocol(&self) -> ProtocolVersion {
        self.config.protocol
    }

    /// Lifecycle of the local identity.
    pub fn lifecycle(&self) -> Lifecycle {
        self.keys.lifecycle()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        self.auth.transport()
    }

    /// Sign requests with `signer` instead of the own key (`None` restores it).
    pub fn set_signer(&mut self, signer: Option<Arc<dyn Signer>>) {
        self.auth.set_signer(signer);
    }

    /// Register the own public key with the server.
    pub async fn create(&self) -> Result<()> {
        let key = String::from_utf8(self.keys.own_key().export_public()?)
            .map_err(|e| Error::Encoding(e.to_string()))?;
        let path = self.protocol().user_path(&self.address);

        self.auth
            .call(&self.keys, Method::Post, &path, Some(&json!({ "key": key })))
            .await?;

        info!(identity = %self.identity, "created user");
        Ok(())
    }

    /// Delete the user on the server and the local container.
    ///
    /// The client can not be used any further afterwards.
    pub async fn delete(&mut self) -> Result<()> {
        let path = self.protocol().user_path(&self.address);
        self.auth.call(&self.keys, Method::Delete, &path, None).await?;

        self.keys.delete()?;
        self.inbox.clear();

        info!(identity = %self.identity, "deleted user");
        Ok(())
    }

    /// Fetch the public key of `peer` from the server.
    pub async fn find(&self, peer: &str) -> Result<KeyPair> {
        let peer = Identity::parse(peer)?;
        self.find_identity(&peer).await
    }

    async fn find_identity(&self, peer: &Identity) -> Result<KeyPair> {
        let address = peer.address(self.protocol().address_scheme())?;
        let path = self.protocol().key_path(&address);

        let pem = self
            .auth
            .call(&self.keys, Method::Get, &path, None)
            .await?
            .into_text()
            .ok_or_else(|| Error::Encoding("public key response is not text".into()))?;

        KeyPair::import(pem.as_bytes(), None)
            .map_err(|_| Error::Encoding(format!("invalid public key for {peer}")))
    }

    /// Encrypt `payload` for `peer` and push it into the peer's mailbox.
    ///
    /// The peer's public key is fetched once and cached in the container.
    pub async fn push(&self, peer: &str, payload: &[u8]) -> Result<()> {
        let peer = Identity::parse(peer)?;
        let label = Label::Peer(peer.username().to_string());

        let key = if self.keys.contains(&label)? {
            KeyPair::import(&self.keys.load(&label)?, None)?
        } else {
            let key = self.find_identity(&peer).await?;
            self.keys.save(&label, &key.export_public()?)?;
            key
        };

        let envelope = key
            .encrypt(payload)?
            .to_envelope(self.protocol(), &self.address);
        let address = peer.address(self.protocol().address_scheme())?;
        let path = self.protocol().mailbox_path(&address);

        self.auth
            .call(&self.keys, Method::Put, &path, Some(&envelope))
            .await?;

        debug!(peer = %peer, bytes = payload.len(), "pushed message");
        Ok(())
    }

    /// Pull the next message, or `None` if the mailbox is empty.
    ///
    /// Messages the server handed out in bulk are queued locally and
    /// returned by later calls before the server is asked again. Messages
    /// that can not be decrypted are logged and dropped.
    pub async fn pull(&mut self) -> Result<Option<Vec<u8>>> {
        if self.keys.lifecycle() != Lifecycle::Active {
            return Err(Error::IdentityDeleted);
        }

        loop {
            if self.inbox.is_empty() && self.fetch_mailbox().await? == 0 {
                return Ok(None);
            }
            let Some(message) = self.inbox.pop_front() else {
                continue;
            };
            if let Some(plaintext) = open_message(self.keys.own_key(), &message) {
                return Ok(Some(plaintext));
            }
        }
    }

    /// Pull every pending message.
    ///
    /// Everything is fetched before anything is decrypted, so a failed
    /// request leaves already fetched messages queued for the next call.
    pub async fn pull_all(&mut self) -> Result<Vec<Vec<u8>>> {
        if self.keys.lifecycle() != Lifecycle::Active {
            return Err(Error::IdentityDeleted);
        }

        while self.fetch_mailbox().await? > 0 {
            if self.protocol().pull_mode() == PullMode::Drain {
                break;
            }
        }

        let own = self.keys.own_key();
        Ok(self
            .inbox
            .drain(..)
            .filter_map(|message| open_message(own, &message))
            .collect())
    }

    // Returns how many envelopes the server handed out, malformed ones
    // included. Malformed envelopes are logged and skipped.
    async fn fetch_mailbox(&mut self) -> Result<usize> {
        let path = self.protocol().mailbox_path(&self.address);
        let payload = self.auth.call(&self.keys, Method::Get, &path, None).await?;
        if payload.is_empty() {
            return Ok(0);
        }

        let protocol = self.protocol();
        let envelopes = match (protocol.pull_mode(), payload) {
            (PullMode::Drain, Payload::Json(Value::Array(items))) => items,
            (PullMode::Single, Payload::Json(envelope @ Value::Object(_))) => vec![envelope],
            (_, other) => {
                return Err(Error::Encoding(format!("unexpected mailbox response: {other:?}")));
            }
        };

        let received = envelopes.len();
        for envelope in &envelopes {
            match EncryptedMessage::from_envelope(envelope, protocol) {
                Ok(message) => self.inbox.push_back(message),
                Err(err) => warn!(%err, "skipping malformed envelope"),
            }
        }

        debug!(received, queued = self.inbox.len(), "fetched mailbox");
        Ok(received)
    }
}

fn open_message(own: &KeyPair, message: &EncryptedMessage) -> Option<Vec<u8>> {
    match own.decrypt(message) {
        Ok(plaintext) => Some(plaintext),
        Err(err) => {
            warn!(%err, "dropping message that can not be decrypted");
            None
        }
    }
}

fn effective_config(identity: &Identity, config: ClientConfig) -> ClientConfig {
    match identity.server() {
        Some(server) if config.api_url != server.trim_end_matches('/') => {
            config.with_server_override(server)
        }
        _ => config,
    }
}
