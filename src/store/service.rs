use anyhow::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use super::ObjectStore;
use super::protocol::{ENDPOINT_INTERNAL_OBJECTS, PutObjectResponse};
use super::types::{ObjAttrs, StoreError};
use crate::bucket::types::Bucket;
use crate::membership::service::MembershipService;
use crate::membership::types::Node;
use crate::placement::object_owner;
use crate::retry::send_with_retry;

/// Write path of the object store: stores objects on the HRW owner.
pub struct ObjectService {
    store: Arc<dyn ObjectStore>,
    membership: Arc<MembershipService>,
    http_client: reqwest::Client,
    forward_timeout: Duration,
    forward_attempts: usize,
}

impl ObjectService {
    pub fn new(store: Arc<dyn ObjectStore>, membership: Arc<MembershipService>) -> Self {
        Self {
            store,
            membership,
            http_client: reqwest::Client::new(),
            forward_timeout: Duration::from_millis(2_000),
            forward_attempts: 3,
        }
    }

    pub fn with_forwarding(mut self, timeout: Duration, attempts: usize) -> Self {
        self.forward_timeout = timeout;
        self.forward_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Stores the object on its owner: locally, or by forwarding to the owner node.
    pub async fn put_object(
        &self,
        bucket: &Bucket,
        name: &str,
        data: Bytes,
    ) -> Result<PutObjectResponse, StoreError> {
        let active = self.membership.get_active_members();
        let owner = object_owner(&active, &bucket.object_uname(name)).ok_or(StoreError::NoOwner)?;

        if owner.id == *self.membership.local_id() {
            let attrs = self.store.put(bucket, name, data).await?;
            return Ok(put_response(bucket, name, &owner, &attrs));
        }

        tracing::debug!("Forwarding {}/{} to owner {}", bucket.name, name, owner);
        self.forward_put(&owner, bucket, name, data)
            .await
            .map_err(|e| StoreError::Forward(e.to_string()))
    }

    /// Handles a forwarded write. The sender already resolved this node as the owner.
    pub async fn put_local(
        &self,
        bucket: &Bucket,
        name: &str,
        data: Bytes,
    ) -> Result<PutObjectResponse, StoreError> {
        let attrs = self.store.put(bucket, name, data).await?;
        Ok(put_response(bucket, name, &self.membership.local_node, &attrs))
    }

    async fn forward_put(
        &self,
        owner: &Node,
        bucket: &Bucket,
        name: &str,
        data: Bytes,
    ) -> Result<PutObjectResponse> {
        let url = format!(
            "{}/{}/{}?provider={}",
            owner.http_url(ENDPOINT_INTERNAL_OBJECTS),
            bucket.name,
            name,
            bucket.provider
        );
        let response = send_with_retry(self.forward_attempts, || {
            self.http_client
                .put(url.clone())
                .body(data.clone())
                .timeout(self.forward_timeout)
        })
        .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Forwarded put failed: {}", response.status()));
        }
        Ok(response.json::<PutObjectResponse>().await?)
    }
}

fn put_response(bucket: &Bucket, name: &str, node: &Node, attrs: &ObjAttrs) -> PutObjectResponse {
    PutObjectResponse {
        success: true,
        bucket: bucket.name.clone(),
        name: name.to_string(),
        node: Some(node.id.to_string()),
        size: attrs.size,
        checksum: attrs.checksum,
    }
}
