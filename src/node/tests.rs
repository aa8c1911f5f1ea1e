//! Node Tests
//!
//! End-to-end get-batch over real HTTP: edge, coordinator and contributors running as
//! in-process nodes.
//!
//! ## Test Scopes
//! - **Happy path**: single node and multi-node archives, redirect contract.
//! - **Failures**: broken data movers, unknown tasks, node-count mismatch.
//! - **Surfaces**: rate limiting, object writes, cluster view.

#[cfg(test)]
mod tests {
    use crate::batch::types::HEADER_TASK_ID;
    use crate::bucket::types::{Bucket, RateLimitProps};
    use crate::node::cluster::TestCluster;
    use crate::router::protocol::ClusterResponse;
    use crate::store::protocol::PutObjectResponse;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::io::Read;
    use std::time::Duration;

    fn tar_names_and_data(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().to_string();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (name, data)
            })
            .collect()
    }

    fn coordinator_of(redirect: &reqwest::Response) -> String {
        let location = redirect
            .headers()
            .get(reqwest::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        location
            .split(['?', '&'])
            .find_map(|kv| kv.strip_prefix("tid="))
            .unwrap()
            .to_string()
    }

    // ============================================================
    // HAPPY PATH
    // ============================================================

    #[tokio::test]
    async fn test_single_node_batch() {
        // ARRANGE
        let bucket = Bucket::new("b");
        let cluster = TestCluster::start(1, vec![bucket.clone()]).await;
        for name in ["one", "two", "three"] {
            cluster.seed(&bucket, name, name.as_bytes()).await;
        }
        let body = json!({"in": [{"objname": "one"}, {"objname": "two"}, {"objname": "three"}]});

        // ACT
        let redirect = cluster.get_batch(0, "/v1/ml/moss/b", &body).await;
        assert_eq!(redirect.status(), StatusCode::TEMPORARY_REDIRECT);
        let task_id = redirect.headers().get(HEADER_TASK_ID).unwrap().to_str().unwrap().to_string();
        let response = cluster.follow(&redirect, &body).await;

        // ASSERT
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
            "application/x-tar"
        );
        assert_eq!(response.headers().get(HEADER_TASK_ID).unwrap().to_str().unwrap(), task_id);
        let entries = tar_names_and_data(&response.bytes().await.unwrap());
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b/one", "b/two", "b/three"]);
        assert_eq!(entries[1].1, b"two");
        assert_eq!(cluster.hub.data_frames(), 0);
    }

    #[tokio::test]
    async fn test_multi_node_batch_in_request_order() {
        // ARRANGE: one object on every node, requested in reverse node order
        let bucket = Bucket::new("b");
        let cluster = TestCluster::start(4, vec![bucket.clone()]).await;
        let mut names = Vec::new();
        for i in (0..4).rev() {
            let name = cluster.name_owned_by(&bucket, i, "shard");
            cluster.seed(&bucket, &name, format!("payload of {}", name).as_bytes()).await;
            names.push(name);
        }
        let body = json!({
            "in": names.iter().map(|n| json!({"objname": n})).collect::<Vec<_>>(),
            "mime": "tar"
        });

        // ACT
        let redirect = cluster.get_batch(2, "/v1/ml/moss/b", &body).await;
        assert_eq!(redirect.status(), StatusCode::TEMPORARY_REDIRECT);
        let response = cluster.follow(&redirect, &body).await;

        // ASSERT
        assert_eq!(response.status(), StatusCode::OK);
        let entries = tar_names_and_data(&response.bytes().await.unwrap());
        assert_eq!(entries.len(), 4);
        for ((entry, data), name) in entries.iter().zip(&names) {
            assert_eq!(entry, &format!("b/{}", name));
            assert_eq!(data, format!("payload of {}", name).as_bytes());
        }
        // three objects crossed the data mover, the coordinator's own was read locally
        assert_eq!(cluster.hub.data_frames(), 3);
    }

    #[tokio::test]
    async fn test_buckets_named_per_item() {
        let photos = Bucket::new("photos");
        let docs = Bucket::new("docs");
        let cluster = TestCluster::start(2, vec![photos.clone(), docs.clone()]).await;
        cluster.seed(&photos, "cat.jpg", b"meow").await;
        cluster.seed(&docs, "readme", b"hello").await;
        let body = json!({
            "in": [
                {"objname": "readme", "bucket": "docs"},
                {"objname": "cat.jpg", "bucket": "photos"},
                {"objname": "dog.jpg", "bucket": "photos"}
            ],
            "mime": ".tar"
        });

        let redirect = cluster.get_batch(0, "/v1/ml/moss", &body).await;
        assert_eq!(redirect.status(), StatusCode::TEMPORARY_REDIRECT);
        let response = cluster.follow(&redirect, &body).await;

        assert_eq!(response.status(), StatusCode::OK);
        let entries = tar_names_and_data(&response.bytes().await.unwrap());
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["docs/readme", "photos/cat.jpg", "__404__/photos/dog.jpg"]);
    }

    #[tokio::test]
    async fn test_duplicate_phase_two_is_harmless() {
        // ARRANGE
        let bucket = Bucket::new("b");
        let cluster = TestCluster::start(3, vec![bucket.clone()]).await;
        let names: Vec<String> = (0..3).map(|i| cluster.name_owned_by(&bucket, i, "dup")).collect();
        for name in &names {
            cluster.seed(&bucket, name, b"x").await;
        }
        let body = json!({"in": names.iter().map(|n| json!({"objname": n})).collect::<Vec<_>>()});

        let redirect = cluster.get_batch(0, "/v1/ml/moss/b", &body).await;
        assert_eq!(redirect.status(), StatusCode::TEMPORARY_REDIRECT);
        let coordinator = coordinator_of(&redirect);
        let contributor = cluster
            .members
            .iter()
            .position(|m| m.id.as_str() != coordinator)
            .unwrap();

        // ACT: replay the control message the edge sent to a contributor
        let location = redirect.headers().get(reqwest::header::LOCATION).unwrap().to_str().unwrap();
        let path_and_query = &location[location.find("/v1/").unwrap()..];
        let replay = cluster
            .client
            .post(cluster.url(contributor, path_and_query))
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let response = cluster.follow(&redirect, &body).await;

        // ASSERT: accepted while sending, or refused once the contributor is done
        assert!(
            replay.status() == StatusCode::OK || replay.status() == StatusCode::CONFLICT,
            "unexpected {}",
            replay.status()
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(tar_names_and_data(&response.bytes().await.unwrap()).len(), 3);
        assert_eq!(cluster.hub.data_frames(), 2);
    }

    // ============================================================
    // FAILURES
    // ============================================================

    #[tokio::test]
    async fn test_broken_data_mover_fails_the_request() {
        // ARRANGE: every node owns one object and no node can send data frames
        let bucket = Bucket::new("b");
        let cluster = TestCluster::start(3, vec![bucket.clone()]).await;
        let mut names = Vec::new();
        for (i, member) in cluster.members.iter().enumerate() {
            let name = cluster.name_owned_by(&bucket, i, "broken");
            cluster.seed(&bucket, &name, b"data").await;
            names.push(name);
            cluster.hub.fail_data_after(&member.id, 0);
        }
        let body = json!({"in": names.iter().map(|n| json!({"objname": n})).collect::<Vec<_>>()});

        // ACT
        let redirect = cluster.get_batch(1, "/v1/ml/moss/b", &body).await;
        assert_eq!(redirect.status(), StatusCode::TEMPORARY_REDIRECT);
        let response = tokio::time::timeout(Duration::from_secs(10), cluster.follow(&redirect, &body))
            .await
            .expect("the coordinator must not hang");

        // ASSERT
        assert!(response.status().is_server_error(), "got {}", response.status());
        let text = response.text().await.unwrap();
        assert!(text.contains("aborted"), "{}", text);
    }

    #[tokio::test]
    async fn test_data_request_for_unknown_task() {
        let cluster = TestCluster::start(1, vec![Bucket::new("b")]).await;
        let body = json!({"in": [{"objname": "x"}]});

        let unknown = cluster
            .client
            .get(cluster.url(0, &format!("/v1/ml/moss/b/{}/w1/1?tid=t1", uuid::Uuid::new_v4())))
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let malformed = cluster
            .client
            .get(cluster.url(0, "/v1/ml/moss/b/not-a-task/w1/1?tid=t1"))
            .body(body.to_string())
            .send()
            .await
            .unwrap();

        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_parent_segment_in_name_is_a_bad_request() {
        let bucket = Bucket::new("b");
        let cluster = TestCluster::start(2, vec![bucket.clone()]).await;
        cluster.seed(&bucket, "ok", b"ok").await;
        let body = json!({"in": [{"objname": "ok"}, {"objname": "a/../b"}]});

        let response = cluster.get_batch(0, "/v1/ml/moss/b", &body).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.text().await.unwrap().contains(".."));
    }

    #[tokio::test]
    async fn test_stale_wave_does_not_spoil_the_redirect() {
        // ARRANGE
        let bucket = Bucket::new("b");
        let cluster = TestCluster::start(3, vec![bucket.clone()]).await;
        let names: Vec<String> = (0..3).map(|i| cluster.name_owned_by(&bucket, i, "w")).collect();
        for name in &names {
            cluster.seed(&bucket, name, name.as_bytes()).await;
        }
        let body = json!({"in": names.iter().map(|n| json!({"objname": n})).collect::<Vec<_>>()});
        let redirect = cluster.get_batch(0, "/v1/ml/moss/b", &body).await;
        let location = redirect
            .headers()
            .get(reqwest::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let (path, query) = location.split_once('?').unwrap();
        let mut segments: Vec<&str> = path.split('/').collect();
        let wave = segments.len() - 2;
        segments[wave] = "stale-wave";
        let stale = format!("{}?{}", segments.join("/"), query);

        // ACT
        let rejected = cluster
            .client
            .get(stale)
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let response = cluster.follow(&redirect, &body).await;

        // ASSERT
        assert_eq!(rejected.status(), StatusCode::CONFLICT);
        assert_eq!(response.status(), StatusCode::OK);
        let entries = tar_names_and_data(&response.bytes().await.unwrap());
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn test_control_with_wrong_node_count_conflicts() {
        let cluster = TestCluster::start(2, vec![Bucket::new("b")]).await;
        let body = json!({"in": [{"objname": "x"}]});

        let response = cluster
            .client
            .post(cluster.url(0, "/v1/ml/moss/b/noxid/w1/5?tid=t1"))
            .body(body.to_string())
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(response.headers().get(HEADER_TASK_ID).is_none());
    }

    // ============================================================
    // SURFACES
    // ============================================================

    #[tokio::test]
    async fn test_rate_limited_request_gets_empty_429() {
        let mut bucket = Bucket::new("b");
        bucket.props.rate_limit = RateLimitProps {
            enabled: true,
            max_tokens: 1,
            interval_ms: 60_000,
        };
        let cluster = TestCluster::start(1, vec![bucket.clone()]).await;
        cluster.seed(&bucket, "a", b"a").await;
        let body = json!({"in": [{"objname": "a"}]});

        let first = cluster.get_batch(0, "/v1/ml/moss/b", &body).await;
        let second = cluster.get_batch(0, "/v1/ml/moss/b", &body).await;

        assert_eq!(first.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_is_forwarded_to_owner() {
        // ARRANGE
        let bucket = Bucket::new("b");
        let cluster = TestCluster::start(3, vec![bucket.clone()]).await;
        let name = cluster.name_owned_by(&bucket, 2, "fwd");

        // ACT: write through t1
        let response = cluster
            .client
            .put(cluster.url(0, &format!("/v1/objects/b/{}", name)))
            .body("forwarded")
            .send()
            .await
            .unwrap();

        // ASSERT
        assert_eq!(response.status(), StatusCode::OK);
        let put: PutObjectResponse = response.json().await.unwrap();
        assert!(put.success);
        assert_eq!(put.node.as_deref(), Some("t3"));
        assert_eq!(put.size, 9);
        assert!(cluster.nodes[2].store.contains(&bucket, &name));
        assert!(!cluster.nodes[0].store.contains(&bucket, &name));
    }

    #[tokio::test]
    async fn test_put_to_unknown_bucket() {
        let cluster = TestCluster::start(1, vec![Bucket::new("b")]).await;

        let response = cluster
            .client
            .put(cluster.url(0, "/v1/objects/nope/x"))
            .body("x")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cluster_view() {
        let bucket = Bucket::new("b");
        let cluster = TestCluster::start(3, vec![bucket.clone()]).await;
        cluster.seed(&bucket, "a", b"a").await;
        let body = json!({"in": [{"objname": "a"}]});
        let redirect = cluster.get_batch(0, "/v1/ml/moss/b", &body).await;
        assert_eq!(redirect.status(), StatusCode::TEMPORARY_REDIRECT);

        let view: ClusterResponse = cluster
            .client
            .get(cluster.url(0, "/v1/cluster"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(view.local_node, "t1");
        assert_eq!(view.active, 3);
        assert_eq!(view.nodes.len(), 3);
        assert_eq!(view.edge.requests, 1);
        assert_eq!(view.edge.redirected, 1);
    }
}
