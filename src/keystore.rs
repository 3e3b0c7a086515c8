//! Local key container, one file per identity.
//!
//! The container lives at `<dir>/.pssst.<username>` and maps entry names to
//! base64 key bytes. The own private key is stored under `self`; the server
//! key and peer keys are namespaced by the server scheme (`host[:port]`), so
//! the same peer cached against two servers does not collide.
//!
//! Only one process may use a container at a time. Concurrent writers are
//! not supported.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto::{KeyPair, RSA_SIZE};
use crate::error::{Error, Result};
use crate::identity::{check_password_strength, CanonicalName, Identity};

const OWN_ENTRY: &str = "self";
const SERVER_ENTRY: &str = "server";
const PEER_DIR: &str = "peers";

/// A container entry label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Label {
    /// The own password-protected private key.
    Own,
    /// The cached server public key.
    Server,
    /// A cached peer public key, by username.
    Peer(String),
}

impl Label {
    fn entry_name(&self, scheme: &str) -> String {
        match self {
            Label::Own => OWN_ENTRY.to_string(),
            Label::Server => format!("{scheme}/{SERVER_ENTRY}"),
            Label::Peer(name) => format!("{scheme}/{PEER_DIR}/{name}"),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Own => f.write_str(OWN_ENTRY),
            Label::Server => f.write_str(SERVER_ENTRY),
            Label::Peer(name) => f.write_str(name),
        }
    }
}

/// Lifecycle of a local identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No container exists yet.
    NotCreated,
    /// The container exists and is usable.
    Active,
    /// The container was deleted; the identity can not be used any further.
    Deleted,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Container {
    entries: BTreeMap<String, String>,
}

/// Persistent key container for one identity.
pub struct KeyStore {
    path: PathBuf,
    scheme: String,
    own: KeyPair,
    server: Option<KeyPair>,
    deleted: bool,
}

impl KeyStore {
    /// Location of the container for `canonical` inside `dir`.
    pub fn path_for(dir: &Path, canonical: &CanonicalName) -> PathBuf {
        dir.join(canonical.file_name())
    }

    /// Whether a container exists for `identity` in `dir`.
    pub fn probe(dir: &Path, identity: &Identity) -> Lifecycle {
        if Self::path_for(dir, &identity.canonical()).exists() {
            Lifecycle::Active
        } else {
            Lifecycle::NotCreated
        }
    }

    /// Derive the entry namespace from an API URL, e.g.
    /// `https://api.pssst.name/` becomes `api.pssst.name`.
    pub fn scheme_for(api_url: &str) -> String {
        let trimmed = api_url.trim().trim_end_matches('/');
        let lower = trimmed.to_ascii_lowercase();
        let without = if lower.starts_with("https://") {
            &trimmed["https://".len()..]
        } else if lower.starts_with("http://") {
            &trimmed["http://".len()..]
        } else {
            trimmed
        };
        without.to_string()
    }

    /// Open the container for `identity`, creating it with a fresh key pair
    /// if it does not exist yet.
    ///
    /// Creation checks the password strength; opening imports the stored
    /// private key and fails with [`Error::WrongPassword`] if that fails.
    pub fn open(dir: &Path, identity: &Identity, password: &str, scheme: &str) -> Result<Self> {
        let path = Self::path_for(dir, &identity.canonical());

        let own = if path.exists() {
            let container = read_container(&path)?;
            let bytes = container_entry(&container, OWN_ENTRY)?;
            KeyPair::import(&bytes, Some(password))?
        } else {
            check_password_strength(password)?;
            let own = KeyPair::generate(RSA_SIZE)?;
            let mut container = Container::default();
            container.entries.insert(
                OWN_ENTRY.to_string(),
                STANDARD.encode(own.export_private(password)?),
            );
            fs::create_dir_all(dir)?;
            write_container(&path, &container)?;
            info!(identity = %identity, path = %path.display(), "created key container");
            own
        };

        let mut store = Self {
            path,
            scheme: scheme.to_string(),
            own,
            server: None,
            deleted: false,
        };

        if store.contains(&Label::Server)? {
            let bytes = store.load(&Label::Server)?;
            let key = KeyPair::import(&bytes, None)
                .map_err(|_| Error::Crypto("cached server key unreadable".into()))?;
            store.server = Some(key);
        }

        Ok(store)
    }

    /// Path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Namespace used for server and peer entries.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Whether the container file is present.
    pub fn exists(&self) -> bool {
        !self.deleted && self.path.exists()
    }

    /// Current lifecycle state. A container removed from disk behind our
    /// back counts as deleted.
    pub fn lifecycle(&self) -> Lifecycle {
        if self.exists() {
            Lifecycle::Active
        } else {
            Lifecycle::Deleted
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.lifecycle() {
            Lifecycle::Active => Ok(()),
            _ => Err(Error::IdentityDeleted),
        }
    }

    /// The own key pair.
    pub fn own_key(&self) -> &KeyPair {
        &self.own
    }

    /// The cached server key, if any.
    pub fn server_key(&self) -> Option<&KeyPair> {
        self.server.as_ref()
    }

    /// Cache the server public key.
    pub fn save_server_key(&mut self, pem: &[u8]) -> Result<()> {
        let key = KeyPair::import(pem, None)?;
        self.save(&Label::Server, pem)?;
        self.server = Some(key);
        Ok(())
    }

    /// Peer labels cached for the active scheme, alphabetically. The server
    /// entry is included only when asked for.
    pub fn list(&self, include_server: bool) -> Result<Vec<Label>> {
        self.ensure_active()?;
        let container = read_container(&self.path)?;

        let peer_prefix = format!("{}/{PEER_DIR}/", self.scheme);
        let server_entry = Label::Server.entry_name(&self.scheme);

        let mut labels: Vec<Label> = container
            .entries
            .keys()
            .filter_map(|entry| {
                if include_server && *entry == server_entry {
                    Some(Label::Server)
                } else {
                    entry
                        .strip_prefix(&peer_prefix)
                        .map(|name| Label::Peer(name.to_string()))
                }
            })
            .collect();
        labels.sort();
        Ok(labels)
    }

    /// Whether an entry exists for `label`.
    pub fn contains(&self, label: &Label) -> Result<bool> {
        self.ensure_active()?;
        let container = read_container(&self.path)?;
        Ok(container.entries.contains_key(&label.entry_name(&self.scheme)))
    }

    /// Load the bytes stored under `label`.
    pub fn load(&self, label: &Label) -> Result<Vec<u8>> {
        self.ensure_active()?;
        let container = read_container(&self.path)?;
        container_entry(&container, &label.entry_name(&self.scheme))
            .map_err(|_| Error::KeyNotFound(label.to_string()))
    }

    /// Store `bytes` under `label`, replacing any previous entry.
    pub fn save(&self, label: &Label, bytes: &[u8]) -> Result<()> {
        self.ensure_active()?;
        let mut container = read_container(&self.path)?;
        container
            .entries
            .insert(label.entry_name(&self.scheme), STANDARD.encode(bytes));
        write_container(&self.path, &container)?;
        debug!(label = %label, "saved key container entry");
        Ok(())
    }

    /// Remove the container. Irreversible.
    pub fn delete(&mut self) -> Result<()> {
        self.ensure_active()?;
        fs::remove_file(&self.path)?;
        self.deleted = true;
        self.server = None;
        info!(path = %self.path.display(), "deleted key container");
        Ok(())
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("path", &self.path)
            .field("scheme", &self.scheme)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

fn container_entry(container: &Container, name: &str) -> Result<Vec<u8>> {
    let encoded = container
        .entries
        .get(name)
        .ok_or_else(|| Error::KeyNotFound(name.to_string()))?;
    Ok(STANDARD.decode(encoded)?)
}

fn read_container(path: &Path) -> Result<Container> {
    let raw = fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::IdentityDeleted,
        _ => Error::Storage(e),
    })?;
    Ok(serde_json::from_slice(&raw)?)
}

// Write to a sibling file and rename over the container.
fn write_container(path: &Path, container: &Container) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp)?;
    file.write_all(&serde_json::to_vec(container)?)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
