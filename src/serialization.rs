// Pluggable value codec
//
// The cache stores opaque bytes; the codec that turns caller values into
// those bytes is a plug-in. Binary encoding is the default; a JSON codec
// ships for callers that need host-side payloads to stay readable.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Value codec used by the cache client
pub trait CacheSerializer: Send + Sync + 'static {
    /// Encode a value into the bytes stored on the cache host
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode bytes fetched from a cache host back into a value
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Default codec: compact binary encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl CacheSerializer for BincodeSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            value,
            bincode::config::standard(),
        )?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(value)
    }
}

/// JSON codec for human-readable payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl CacheSerializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
