//! Versioned envelope for stored JSON objects.
//!
//! Every value written to the store is wrapped as `{"version": N,
//! "value": ...}` so the schema can evolve; readers dispatch on the
//! version tag and refuse versions they do not know.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    value: serde_json::Value,
}

/// Wrap `value` in a version envelope and encode it as JSON.
pub fn encode<T: Serialize>(version: u32, value: &T) -> Result<Vec<u8>, StoreError> {
    let env = Envelope {
        version,
        value: serde_json::to_value(value)?,
    };
    Ok(serde_json::to_vec(&env)?)
}

/// Decode a version envelope, returning the version tag and the payload.
pub fn decode(data: &[u8]) -> Result<(u32, serde_json::Value), StoreError> {
    let env: Envelope = serde_json::from_slice(data)?;
    Ok((env.version, env.value))
}
