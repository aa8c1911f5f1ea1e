//! Object Store Module Tests
//!
//! ## Test Scopes
//! - **MemStore**: put/get, versions, checksums, bucket isolation.
//! - **ObjectService**: local writes on a single-node cluster.

#[cfg(test)]
mod tests {
    use crate::bucket::types::Bucket;
    use crate::membership::service::MembershipService;
    use crate::membership::types::{Node, NodeId, NodeState};
    use crate::store::ObjectStore;
    use crate::store::memory::MemStore;
    use crate::store::service::ObjectService;
    use bytes::Bytes;
    use std::sync::Arc;
    use xxhash_rust::xxh3::xxh3_64;

    // ============================================================
    // MEMSTORE
    // ============================================================

    #[tokio::test]
    async fn test_put_then_get() {
        // ARRANGE
        let store = MemStore::new();
        let bucket = Bucket::new("images");

        // ACT
        let attrs = store
            .put(&bucket, "cat.jpg", Bytes::from_static(b"meow"))
            .await
            .unwrap();
        let object = store.get(&bucket, "cat.jpg").await.unwrap();

        // ASSERT
        assert_eq!(object.data, Bytes::from_static(b"meow"));
        assert_eq!(attrs.size, 4);
        assert_eq!(attrs.checksum, xxh3_64(b"meow"));
        assert_eq!(attrs.version, 1);
        assert_eq!(object.attrs, attrs);
    }

    #[tokio::test]
    async fn test_overwrite_bumps_version() {
        let store = MemStore::new();
        let bucket = Bucket::new("images");

        store.put(&bucket, "a", Bytes::from_static(b"1")).await.unwrap();
        let attrs = store.put(&bucket, "a", Bytes::from_static(b"22")).await.unwrap();

        assert_eq!(attrs.version, 2);
        assert_eq!(attrs.size, 2);
        assert_eq!(store.object_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = MemStore::new();
        let bucket = Bucket::new("images");

        let err = store.get(&bucket, "ghost").await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let store = MemStore::new();
        let a = Bucket::new("a");
        let mut remote = Bucket::new("a");
        remote.provider = "s3".to_string();

        store.put(&a, "obj", Bytes::from_static(b"x")).await.unwrap();

        assert!(store.contains(&a, "obj"));
        assert!(!store.contains(&remote, "obj"));
        assert!(store.get(&Bucket::new("b"), "obj").await.is_err());
        assert!(store.remove(&a, "obj"));
        assert_eq!(store.object_count(), 0);
    }

    // ============================================================
    // OBJECT SERVICE
    // ============================================================

    #[tokio::test]
    async fn test_single_node_put_stores_locally() {
        // ARRANGE
        let node = Node {
            id: NodeId::from("solo"),
            http_addr: "127.0.0.1:6000".parse().unwrap(),
            data_addr: "127.0.0.1:7000".parse().unwrap(),
            state: NodeState::Active,
        };
        let membership = MembershipService::new(&node.id, vec![node.clone()]).unwrap();
        let store = Arc::new(MemStore::new());
        let service = ObjectService::new(store.clone(), membership);
        let bucket = Bucket::new("data");

        // ACT
        let resp = service
            .put_object(&bucket, "dir/file.bin", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        // ASSERT
        assert!(resp.success);
        assert_eq!(resp.node.as_deref(), Some("solo"));
        assert_eq!(resp.size, 7);
        assert!(store.contains(&bucket, "dir/file.bin"));
    }
}
