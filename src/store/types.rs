use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Attributes shipped along with object bytes and written into archive headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ObjAttrs {
    pub size: u64,
    pub mtime_ms: u64,
    /// xxh3-64 of the object bytes.
    pub checksum: u64,
    pub version: u64,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub attrs: ObjAttrs,
    pub data: Bytes,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{bucket}/{name}: object not found")]
    NotFound { bucket: String, name: String },

    #[error("{bucket}/{name}: read failed: {reason}")]
    Io {
        bucket: String,
        name: String,
        reason: String,
    },

    #[error("forwarding to owner failed: {0}")]
    Forward(String),

    #[error("no active node owns the object")]
    NoOwner,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
