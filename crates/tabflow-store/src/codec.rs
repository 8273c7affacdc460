//! Value encoding for stored entries.
//!
//! Entries are serde_json bytes, so typed row values keep their
//! extended-JSON tags on the way through the store.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

pub fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Codec(format!("json serialize: {e}")))
}

pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    serde_json::from_slice(bytes).map_err(|e| Error::Codec(format!("json deserialize: {e}")))
}
