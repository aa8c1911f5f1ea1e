//! Object Store Module
//!
//! Local object storage consumed by get-batch senders and the coordinator.
//!
//! ## Core Concepts
//! - **Placement**: every object lives on the node selected by HRW over its unique name
//!   (`provider/bucket/object`), see the `placement` module.
//! - **Access**: `ObjectStore` is the narrow read/write interface; `MemStore` keeps
//!   objects in memory, sharded by bucket.
//! - **Writes**: `ObjectService` stores an object locally when this node owns it and
//!   forwards it to the owner otherwise.

pub mod handlers;
pub mod memory;
pub mod protocol;
pub mod service;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;

use crate::bucket::types::Bucket;
use types::{ObjAttrs, StoreError, StoredObject};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &Bucket, name: &str) -> Result<StoredObject, StoreError>;

    async fn put(&self, bucket: &Bucket, name: &str, data: Bytes) -> Result<ObjAttrs, StoreError>;

    fn object_count(&self) -> usize;
}

#[cfg(test)]
mod tests;
