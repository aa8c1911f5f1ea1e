use dashmap::DashMap;

use super::types::{Bucket, DEFAULT_PROVIDER};
use crate::error::BatchError;

/// Resolves bucket names (plus optional provider) to configured buckets.
pub struct BucketDirectory {
    buckets: DashMap<String, Bucket>,
}

impl BucketDirectory {
    pub fn new(buckets: Vec<Bucket>) -> Self {
        let map = DashMap::new();
        for bucket in buckets {
            tracing::debug!("Registered bucket {}", bucket.uname());
            map.insert(bucket.uname(), bucket);
        }
        Self { buckets: map }
    }

    pub fn lookup(&self, name: &str, provider: Option<&str>) -> Result<Bucket, BatchError> {
        if name.is_empty() {
            return Err(BatchError::InvalidRequest("empty bucket name".to_string()));
        }
        let provider = provider.filter(|p| !p.is_empty()).unwrap_or(DEFAULT_PROVIDER);
        self.buckets
            .get(&format!("{}/{}", provider, name))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BatchError::BucketNotFound(name.to_string()))
    }

    pub fn insert(&self, bucket: Bucket) {
        self.buckets.insert(bucket.uname(), bucket);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
