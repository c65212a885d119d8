//! Cache key construction
//!
//! Keys look like `<entity>:<identifier>[:<param hash>]`, so every entry of
//! one logical entity can be dropped with a single prefix invalidation.

use std::borrow::Cow;
use std::fmt::Display;

use ring::digest::{SHA256, digest};
use serde::Serialize;

/// Prefix of keys that were too long and got replaced by their digest
const DIGEST_PREFIX: &str = "#sha256:";

/// Hex-encoded SHA-256 of `bytes`
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(digest(&SHA256, bytes).as_ref())
}

/// Replace keys longer than `max_len` with a fixed-length digest.
///
/// Rehashed keys no longer share a prefix with their entity, so prefix
/// invalidation cannot reach them.
pub fn normalize_key(key: &str, max_len: usize) -> Cow<'_, str> {
    if key.len() <= max_len {
        Cow::Borrowed(key)
    } else {
        Cow::Owned(format!("{}{}", DIGEST_PREFIX, digest_hex(key.as_bytes())))
    }
}

/// Builder for namespaced cache keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    entity: String,
    identifier: String,
    param_hash: Option<String>,
}

impl CacheKey {
    pub fn new(entity: impl Into<String>, identifier: impl Display) -> Self {
        Self {
            entity: entity.into(),
            identifier: identifier.to_string(),
            param_hash: None,
        }
    }

    /// Append a short hash of `params`' JSON encoding.
    ///
    /// Params that fail to serialize leave the key without a hash segment.
    pub fn with_params<P: Serialize + ?Sized>(mut self, params: &P) -> Self {
        self.param_hash = serde_json::to_vec(params)
            .ok()
            .map(|bytes| digest_hex(&bytes)[..16].to_string());
        self
    }

    /// Prefix shared by every key of this entity
    pub fn entity_prefix(entity: &str) -> String {
        format!("{}:", entity)
    }

    pub fn build(&self) -> String {
        match &self.param_hash {
            Some(hash) => format!("{}:{}:{}", self.entity, self.identifier, hash),
            None => format!("{}:{}", self.entity, self.identifier),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.build())
    }
}
