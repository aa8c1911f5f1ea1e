//! Get-batch Network Protocol
//!
//! Client-facing and node-to-node HTTP surface of the get-batch flow.
//!
//! ## Endpoints
//! - `GET /v1/ml/moss[/<bucket>]`: client request, served by any node acting as edge.
//! - `POST /v1/ml/moss[/<bucket>]/<task>/<wave>/<nat>?tid=<coordinator>`: control message.
//!   Phase 1 (to the coordinator, task id `noxid`) prepares receiving; phase 2 (to every
//!   other node) starts sending.
//! - `GET /v1/ml/moss[/<bucket>]/<task>/<wave>/<nat>?tid=<coordinator>`: the redirected
//!   data request, served by the coordinator.
//! - `GET /v1/cluster`: this node's view of the cluster.

use serde::{Deserialize, Serialize};

pub const ENDPOINT_MOSS: &str = "/v1/ml/moss";
pub const ENDPOINT_CLUSTER: &str = "/v1/cluster";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MossQuery {
    /// Coordinator node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl MossQuery {
    pub fn encode(&self) -> String {
        let mut parts = Vec::new();
        if let Some(tid) = &self.tid {
            parts.push(format!("tid={}", tid));
        }
        if let Some(provider) = &self.provider {
            parts.push(format!("provider={}", provider));
        }
        parts.join("&")
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterNodeInfo {
    pub id: String,
    pub http_addr: String,
    pub data_addr: String,
    pub state: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub local_node: String,
    pub version: u64,
    pub active: usize,
    pub nodes: Vec<ClusterNodeInfo>,
    pub tasks: usize,
    pub active_tasks: usize,
    pub limiter_entries: usize,
    pub edge: EdgeStatsSnapshot,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeStatsSnapshot {
    pub requests: u64,
    pub redirected: u64,
    pub rejected: u64,
    pub failed: u64,
}
