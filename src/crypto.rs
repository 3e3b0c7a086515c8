//! RSA key pairs, hybrid encryption and timestamp-bound signatures.
//!
//! Messages are encrypted with a fresh AES-256-CBC key and IV per call; the
//! 48-byte key+IV blob is wrapped with RSA-OAEP for the recipient.
//!
//! Signatures bind a body to the signing time: the body is authenticated
//! with HMAC-SHA256 keyed by the decimal timestamp, the MAC is hashed again
//! with SHA-256 and that digest is signed with RSA PKCS#1 v1.5. A signature
//! only verifies within [`GRACE_TIME`] seconds of its timestamp.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use aes::Aes256;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};
use crate::message::EncryptedMessage;

/// Default and minimum RSA modulus size in bits.
pub const RSA_SIZE: usize = 2048;

/// AES-256 key length.
pub const KEY_SIZE: usize = 32;

/// AES block (and IV) length.
pub const BLOCK_SIZE: usize = 16;

/// Length of the wrapped key+IV blob.
pub const NONCE_SIZE: usize = KEY_SIZE + BLOCK_SIZE;

/// Maximum clock skew in seconds between signer and verifier.
pub const GRACE_TIME: u64 = 5;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Current time in epoch seconds.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// SHA-512 fingerprint (lowercase hex) of a PEM document.
pub fn fingerprint(pem: &[u8]) -> String {
    hex::encode(Sha512::digest(pem))
}

/// A timestamp and the signature bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Signing time in epoch seconds.
    pub timestamp: i64,
    /// RSA PKCS#1 v1.5 signature bytes.
    pub bytes: Vec<u8>,
}

/// Anything that can sign a request body.
///
/// The request authenticator takes a signer as a capability, so tests can
/// swap in broken signers without touching the key pair.
pub trait Signer: Send + Sync {
    /// Sign `body` at the current time.
    fn sign(&self, body: &[u8]) -> Result<Signature>;
}

/// One RSA key: always the public half, optionally the private half.
#[derive(Clone)]
pub struct KeyPair {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl KeyPair {
    /// Generate a fresh key pair with a modulus of `bits` bits.
    pub fn generate(bits: usize) -> Result<Self> {
        if bits < RSA_SIZE {
            return Err(Error::Crypto(format!("key size {bits} below {RSA_SIZE} bits")));
        }

        let private =
            RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(Self::from_private(private))
    }

    /// Import a PEM encoded key.
    ///
    /// With a password the input must be an encrypted PKCS#8 private key.
    /// Without one, plain private keys (PKCS#8, PKCS#1) and public keys
    /// (SPKI, PKCS#1) are accepted. Every parse or decrypt failure reports
    /// [`Error::WrongPassword`]; the format can not tell a wrong password from
    /// corrupt data.
    pub fn import(bytes: &[u8], password: Option<&str>) -> Result<Self> {
        let pem = std::str::from_utf8(bytes).map_err(|_| Error::WrongPassword)?;

        let pair = match password {
            Some(password) => RsaPrivateKey::from_pkcs8_encrypted_pem(pem, password)
                .map(Self::from_private)
                .map_err(|_| Error::WrongPassword)?,
            None => Self::import_plain(pem)?,
        };

        if pair.bits() < RSA_SIZE {
            return Err(Error::Crypto(format!(
                "key size {} below {RSA_SIZE} bits",
                pair.bits()
            )));
        }
        Ok(pair)
    }

    fn import_plain(pem: &str) -> Result<Self> {
        if let Ok(private) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(Self::from_private(private));
        }
        if let Ok(private) = RsaPrivateKey::from_pkcs1_pem(pem) {
            return Ok(Self::from_private(private));
        }
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map(|public| Self {
                public,
                private: None,
            })
            .map_err(|_| Error::WrongPassword)
    }

    fn from_private(private: RsaPrivateKey) -> Self {
        Self {
            public: private.to_public_key(),
            private: Some(private),
        }
    }

    fn private(&self) -> Result<&RsaPrivateKey> {
        self.private
            .as_ref()
            .ok_or_else(|| Error::Crypto("private key required".into()))
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public.size() * 8
    }

    /// Whether the private half is present.
    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    /// Export the private key as password-encrypted PKCS#8 PEM.
    pub fn export_private(&self, password: &str) -> Result<Vec<u8>> {
        let pem = self
            .private()?
            .to_pkcs8_encrypted_pem(&mut OsRng, password, LineEnding::LF)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(pem.as_bytes().to_vec())
    }

    /// Export the public key as SPKI PEM.
    pub fn export_public(&self) -> Result<Vec<u8>> {
        let pem = self
            .public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(pem.into_bytes())
    }

    /// Encrypt `plaintext` for the holder of this key's private half.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedMessage> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256CbcEnc::new_from_slices(&nonce[..KEY_SIZE], &nonce[KEY_SIZE..])
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let wrapped_key = self
            .public
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &nonce)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        Ok(EncryptedMessage {
            wrapped_key,
            ciphertext,
        })
    }

    /// Decrypt a message encrypted for this key.
    ///
    /// The padding length is taken from the last plaintext byte without
    /// checking the remaining padding bytes.
    pub fn decrypt(&self, message: &EncryptedMessage) -> Result<Vec<u8>> {
        let nonce = self
            .private()?
            .decrypt(Oaep::new::<Sha1>(), &message.wrapped_key)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        if nonce.len() != NONCE_SIZE {
            return Err(Error::Crypto(format!("unwrapped key has {} bytes", nonce.len())));
        }

        let cipher = Aes256CbcDec::new_from_slices(&nonce[..KEY_SIZE], &nonce[KEY_SIZE..])
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let mut data = cipher
            .decrypt_padded_vec_mut::<NoPadding>(&message.ciphertext)
            .map_err(|_| Error::Crypto("ciphertext is not block aligned".into()))?;

        let padding = *data
            .last()
            .ok_or_else(|| Error::Crypto("ciphertext is empty".into()))? as usize;
        // A zero or oversized padding byte leaves nothing, like slicing off
        // `-padding` bytes from the end.
        let keep = match padding {
            0 => 0,
            n => data.len().saturating_sub(n),
        };
        data.truncate(keep);
        Ok(data)
    }

    /// Sign `body` at the current time.
    pub fn sign(&self, body: &[u8]) -> Result<Signature> {
        self.sign_at(body, now())
    }

    /// Sign `body` as of `timestamp`.
    pub fn sign_at(&self, body: &[u8], timestamp: i64) -> Result<Signature> {
        let digest = signing_digest(body, timestamp)?;
        let bytes = self
            .private()?
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(Signature { timestamp, bytes })
    }

    /// Verify `signature` over `body` against the current time.
    pub fn verify(&self, body: &[u8], signature: &Signature) -> bool {
        self.verify_at(body, signature, now())
    }

    /// Verify `signature` over `body` as seen at time `now`.
    pub fn verify_at(&self, body: &[u8], signature: &Signature, now: i64) -> bool {
        self.verify_within(body, signature, now, GRACE_TIME)
    }

    /// Verify `signature` over `body` at time `now`, allowing `grace` seconds
    /// of clock skew.
    pub fn verify_within(&self, body: &[u8], signature: &Signature, now: i64, grace: u64) -> bool {
        if now.abs_diff(signature.timestamp) > grace {
            return false;
        }

        match signing_digest(body, signature.timestamp) {
            Ok(digest) => self
                .public
                .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature.bytes)
                .is_ok(),
            Err(_) => false,
        }
    }
}

impl Signer for KeyPair {
    fn sign(&self, body: &[u8]) -> Result<Signature> {
        KeyPair::sign(self, body)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .field("private", &self.has_private())
            .finish()
    }
}

fn signing_digest(body: &[u8], timestamp: i64) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(timestamp.to_string().as_bytes())
        .map_err(|e| Error::Crypto(e.to_string()))?;
    mac.update(body);
    Ok(Sha256::digest(mac.finalize().into_bytes()).into())
}
