//! Opaque encrypted values carried inside event payloads.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value sealed by an external crypto provider.
///
/// The core never opens it; it only stores and replays it. The ciphertext is
/// base64 in JSON.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedValue {
    pub algorithm: String,
    pub key_id: String,
    #[serde(serialize_with = "to_b64", deserialize_with = "from_b64")]
    pub ciphertext: Vec<u8>,
}

impl SealedValue {
    pub fn new(algorithm: impl Into<String>, key_id: impl Into<String>, ciphertext: Vec<u8>) -> Self {
        Self {
            algorithm: algorithm.into(),
            key_id: key_id.into(),
            ciphertext,
        }
    }
}

impl core::fmt::Debug for SealedValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SealedValue")
            .field("algorithm", &self.algorithm)
            .field("key_id", &self.key_id)
            .field("ciphertext", &format_args!("{} bytes", self.ciphertext.len()))
            .finish()
    }
}

fn to_b64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&B64.encode(bytes))
}

fn from_b64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    B64.decode(encoded).map_err(serde::de::Error::custom)
}
