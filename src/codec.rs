//! Object codec: the byte-level boundary between a live object body and its
//! on-disk image.
//!
//! The object model itself (inheritance, method lookup, variable scoping)
//! is out of scope for this crate; `ObjectBody` stands in for "variables,
//! methods, parents" as an opaque, serializable bag so the cache and block
//! store have something concrete to round-trip. Encoded with `bincode`, the
//! same way the rest of this crate's on-disk structures are encoded.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Tag a deleted block is overwritten with; `decode` refuses to
/// deserialize past it.
pub const DELOBJ_TAG: &[u8] = b"delobj";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectBody {
    pub parents: Vec<i64>,
    pub variables: Vec<(String, String)>,
}

impl ObjectBody {
    pub fn new(parents: Vec<i64>) -> Self {
        Self {
            parents,
            variables: Vec::new(),
        }
    }
}

/// Serialize `body`. Total and length-stable: `encode(body).len()` is
/// exactly the byte length `size_object` would report for `body`.
pub fn encode(body: &ObjectBody) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(body, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Deserialize bytes previously produced by [`encode`]. Fails if `bytes`
/// begins with the `delobj` scavenging tag — the block was deleted and
/// whatever follows is not a valid object image.
pub fn decode(bytes: &[u8]) -> Result<ObjectBody> {
    if bytes.len() >= DELOBJ_TAG.len() && &bytes[..DELOBJ_TAG.len()] == DELOBJ_TAG {
        return Err(StoreError::Corrupt(
            "object image begins with delobj tag".into(),
        ));
    }
    let (body, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(body)
}
