use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{Node, NodeId, NodeState};

/// Local view of the cluster map.
///
/// Every node holds its own instance; the get-batch protocol only reads it
/// (active-node set, node count, addresses). Propagation of changes between
/// nodes is outside this crate, so mutation goes through `set_state`/`upsert`.
pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    version: AtomicU64,
}

impl MembershipService {
    pub fn new(local_id: &NodeId, nodes: Vec<Node>) -> Result<Arc<Self>> {
        let local_node = nodes
            .iter()
            .find(|node| &node.id == local_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Local node {} is not part of the cluster map", local_id))?;

        let members = Arc::new(DashMap::new());
        for node in nodes {
            if members.insert(node.id.clone(), node).is_some() {
                return Err(anyhow::anyhow!("Duplicate node id in cluster map"));
            }
        }

        tracing::info!(
            "Cluster map loaded: {} nodes, local node {}",
            members.len(),
            local_node.id
        );

        Ok(Arc::new(Self {
            local_node,
            members,
            version: AtomicU64::new(1),
        }))
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_node.id
    }

    /// Active members sorted by id, so that every caller iterates them in the same order.
    pub fn get_active_members(&self) -> Vec<Node> {
        let mut active: Vec<Node> = self
            .members
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    pub fn count_active(&self) -> usize {
        self.members
            .iter()
            .filter(|entry| entry.value().is_active())
            .count()
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn is_active(&self, id: &NodeId) -> bool {
        self.members
            .get(id)
            .map(|entry| entry.value().is_active())
            .unwrap_or(false)
    }

    pub fn is_local_active(&self) -> bool {
        self.is_active(&self.local_node.id)
    }

    pub fn all_members(&self) -> Vec<Node> {
        let mut all: Vec<Node> = self.members.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Returns false when the node is unknown.
    pub fn set_state(&self, id: &NodeId, state: NodeState) -> bool {
        match self.members.get_mut(id) {
            Some(mut member) => {
                if member.state != state {
                    tracing::info!("Node {} state {:?} -> {:?}", id, member.state, state);
                    member.state = state;
                    self.version.fetch_add(1, Ordering::AcqRel);
                }
                true
            }
            None => {
                tracing::debug!("State change for unknown node {}", id);
                false
            }
        }
    }

    pub fn upsert(&self, node: Node) {
        tracing::info!("Node {} at {} joined the cluster map", node.id, node.http_addr);
        self.members.insert(node.id.clone(), node);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
