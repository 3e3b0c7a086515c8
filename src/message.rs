use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identity::Address;
use crate::protocol::ProtocolVersion;

/// A hybrid-encrypted message.
///
/// `wrapped_key` is the RSA-OAEP encrypted AES key and IV; only the
/// recipient's private key recovers it. `ciphertext` is the AES-256-CBC
/// encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub wrapped_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedMessage {
    /// Build the JSON envelope for the given protocol revision.
    ///
    /// `sender` is only carried by revisions that name the sender in the
    /// envelope head.
    pub fn to_envelope(&self, protocol: ProtocolVersion, sender: &Address) -> Value {
        let mut head = Map::new();
        head.insert(
            protocol.wrapped_key_field().to_string(),
            Value::String(STANDARD.encode(&self.wrapped_key)),
        );
        if let Some(field) = protocol.sender_field() {
            head.insert(field.to_string(), Value::String(sender.to_string()));
        }

        let mut envelope = match protocol.head_field() {
            Some(field) => {
                let mut outer = Map::new();
                outer.insert(field.to_string(), Value::Object(head));
                outer
            }
            None => head,
        };
        envelope.insert(
            protocol.ciphertext_field().to_string(),
            Value::String(STANDARD.encode(&self.ciphertext)),
        );
        Value::Object(envelope)
    }

    /// Parse a JSON envelope of the given protocol revision.
    pub fn from_envelope(envelope: &Value, protocol: ProtocolVersion) -> Result<Self> {
        let head = match protocol.head_field() {
            Some(field) => envelope
                .get(field)
                .filter(|head| head.is_object())
                .ok_or_else(|| Error::Encoding(format!("envelope field '{field}' missing")))?,
            None => envelope,
        };

        Ok(Self {
            wrapped_key: decode_field(head, protocol.wrapped_key_field())?,
            ciphertext: decode_field(envelope, protocol.ciphertext_field())?,
        })
    }
}

fn decode_field(envelope: &Value, field: &str) -> Result<Vec<u8>> {
    let encoded = envelope
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Encoding(format!("envelope field '{field}' missing")))?;
    Ok(STANDARD.decode(encoded)?)
}
