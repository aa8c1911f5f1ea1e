use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::xxh3_64;

use super::ObjectStore;
use super::types::{ObjAttrs, StoreError, StoredObject};
use crate::bucket::types::Bucket;

/// In-memory object store.
/// Structure: `bucket uname -> object name -> object`.
pub struct MemStore {
    local_data: DashMap<String, DashMap<String, StoredObject>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            local_data: DashMap::new(),
        }
    }

    pub fn contains(&self, bucket: &Bucket, name: &str) -> bool {
        self.local_data
            .get(&bucket.uname())
            .map(|objects| objects.contains_key(name))
            .unwrap_or(false)
    }

    pub fn remove(&self, bucket: &Bucket, name: &str) -> bool {
        self.local_data
            .get(&bucket.uname())
            .map(|objects| objects.remove(name).is_some())
            .unwrap_or(false)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemStore {
    async fn get(&self, bucket: &Bucket, name: &str) -> Result<StoredObject, StoreError> {
        if let Some(objects) = self.local_data.get(&bucket.uname())
            && let Some(object) = objects.get(name)
        {
            return Ok(object.clone());
        }

        Err(StoreError::NotFound {
            bucket: bucket.name.clone(),
            name: name.to_string(),
        })
    }

    async fn put(&self, bucket: &Bucket, name: &str, data: Bytes) -> Result<ObjAttrs, StoreError> {
        let objects = self
            .local_data
            .entry(bucket.uname())
            .or_insert_with(DashMap::new);

        let version = objects
            .get(name)
            .map(|existing| existing.attrs.version + 1)
            .unwrap_or(1);
        let attrs = ObjAttrs {
            size: data.len() as u64,
            mtime_ms: now_ms(),
            checksum: xxh3_64(&data),
            version,
        };
        objects.insert(
            name.to_string(),
            StoredObject {
                attrs: attrs.clone(),
                data,
            },
        );

        tracing::debug!("Stored {}/{} (v{}, {} bytes)", bucket.uname(), name, version, attrs.size);
        Ok(attrs)
    }

    fn object_count(&self) -> usize {
        self.local_data
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
