//! In-process test cluster: every node serves its real HTTP surface on an ephemeral
//! port, and the data movers are joined by one loopback hub.

use bytes::Bytes;
use std::sync::Arc;

use super::NodeContext;
use crate::bucket::types::Bucket;
use crate::config::{ClusterConfig, LocalNodeConfig, NodeConfig, RateLimitConfig, TimeoutsConfig, TransportConfig};
use crate::membership::types::{Node, NodeId, NodeState};
use crate::placement::object_owner;
use crate::store::ObjectStore;
use crate::store::memory::MemStore;
use crate::transport::LoopbackHub;

pub(crate) struct TestNode {
    pub ctx: NodeContext,
    pub store: Arc<MemStore>,
    pub base_url: String,
}

pub(crate) struct TestCluster {
    pub hub: Arc<LoopbackHub>,
    pub members: Vec<Node>,
    pub nodes: Vec<TestNode>,
    pub client: reqwest::Client,
}

impl TestCluster {
    pub async fn start(n: usize, buckets: Vec<Bucket>) -> Self {
        Self::start_with(n, buckets, |_| {}).await
    }

    /// Starts `n` nodes; `tweak` adjusts each node's configuration before it is built.
    pub async fn start_with(n: usize, buckets: Vec<Bucket>, tweak: impl Fn(&mut NodeConfig)) -> Self {
        let mut listeners = Vec::with_capacity(n);
        for _ in 0..n {
            listeners.push(tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap());
        }
        let members: Vec<Node> = listeners
            .iter()
            .enumerate()
            .map(|(i, listener)| {
                let addr = listener.local_addr().unwrap();
                Node {
                    id: NodeId(format!("t{}", i + 1)),
                    http_addr: addr,
                    // unused: the loopback hub carries the data frames
                    data_addr: addr,
                    state: NodeState::Active,
                }
            })
            .collect();

        let hub = LoopbackHub::new(256);
        let mut nodes = Vec::with_capacity(n);
        for (member, listener) in members.iter().zip(listeners) {
            let mut config = NodeConfig {
                node: LocalNodeConfig {
                    id: member.id.to_string(),
                },
                cluster: ClusterConfig {
                    nodes: members.clone(),
                },
                timeouts: TimeoutsConfig::default(),
                ratelimit: RateLimitConfig::default(),
                transport: TransportConfig::default(),
                buckets: buckets.clone(),
            };
            tweak(&mut config);

            let store = Arc::new(MemStore::new());
            let ctx = NodeContext::build(config, hub.transport(member.id.clone()), store.clone()).unwrap();
            let app = ctx.app();
            tokio::spawn(async move {
                let _ = axum::serve(listener, app).await;
            });
            nodes.push(TestNode {
                ctx,
                store,
                base_url: format!("http://{}", member.http_addr),
            });
        }

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            hub,
            members,
            nodes,
            client,
        }
    }

    pub fn owner_index(&self, bucket: &Bucket, name: &str) -> usize {
        let owner = object_owner(&self.members, &bucket.object_uname(name)).unwrap();
        self.members.iter().position(|m| m.id == owner.id).unwrap()
    }

    /// First `<prefix>-<i>` placed on node `index`.
    pub fn name_owned_by(&self, bucket: &Bucket, index: usize, prefix: &str) -> String {
        (0..10_000)
            .map(|i| format!("{}-{}", prefix, i))
            .find(|name| self.owner_index(bucket, name) == index)
            .unwrap()
    }

    /// Writes straight into the owner's store.
    pub async fn seed(&self, bucket: &Bucket, name: &str, data: &[u8]) {
        let owner = self.owner_index(bucket, name);
        self.nodes[owner]
            .store
            .put(bucket, name, Bytes::copy_from_slice(data))
            .await
            .unwrap();
    }

    pub fn url(&self, index: usize, path: &str) -> String {
        format!("{}{}", self.nodes[index].base_url, path)
    }

    /// Client request to node `index` acting as edge; redirects are not followed.
    pub async fn get_batch(&self, index: usize, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .get(self.url(index, path))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    /// Follows the edge's redirect to the coordinator with the same body.
    pub async fn follow(&self, redirect: &reqwest::Response, body: &serde_json::Value) -> reqwest::Response {
        let location = redirect
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        self.client
            .get(location)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }
}
