//! Pluggable payload serialization
//!
//! The codec runs on every write (fillers included) and on every read before
//! a chunk reaches a subscription. Implementations must be stateless and safe
//! for concurrent use.

use crate::error::{Error, Result};

/// Application payload carried by a chunk
pub type Payload = serde_json::Value;

/// Converts payloads to and from their stored wire form
pub trait PayloadCodec: Send + Sync {
    /// Serialize a payload for storage
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>>;

    /// Deserialize a stored payload for delivery
    fn decode(&self, bytes: &[u8]) -> Result<Payload>;

    /// Tag identifying the codec, persisted alongside durable records
    fn name(&self) -> &'static str;
}

/// Default codec: JSON bytes, payload preserved unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        serde_json::to_vec(payload).map_err(|e| Error::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Payload> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
