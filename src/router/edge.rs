use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::path::MossPath;
use super::protocol::{EdgeStatsSnapshot, MossQuery};
use crate::batch::types::{BatchRequest, HEADER_TASK_ID, TaskId, WaveId};
use crate::bucket::directory::BucketDirectory;
use crate::bucket::types::Bucket;
use crate::error::BatchError;
use crate::membership::service::MembershipService;
use crate::membership::types::Node;
use crate::placement::{gen_tie, select_coordinator};
use crate::ratelimit::{FrontendLimiter, Verb};
use crate::retry::send_with_retry;

/// Per-request progress of the edge flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    CoordinatorDispatched,
    Broadcasting,
    Redirected,
    Done,
    Failed,
}

struct Flow {
    wave: WaveId,
    state: FlowState,
}

impl Flow {
    fn advance(&mut self, next: FlowState) {
        tracing::debug!("get-batch wave {}: {:?} -> {:?}", self.wave, self.state, next);
        self.state = next;
    }
}

/// Where to send the client, and for which task.
#[derive(Debug, Clone)]
pub struct Redirect {
    pub location: String,
    pub task_id: TaskId,
    pub coordinator: Node,
    pub wave_id: WaveId,
}

#[derive(Default)]
struct EdgeStats {
    requests: AtomicU64,
    redirected: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Client-facing entry of the get-batch flow.
///
/// Elects the coordinator, dispatches phase 1 to it, fans out phase 2 to every other
/// active node without waiting, and redirects the client to the coordinator.
pub struct EdgeRouter {
    membership: Arc<MembershipService>,
    buckets: Arc<BucketDirectory>,
    limiter: Arc<FrontendLimiter>,
    http_client: reqwest::Client,
    control_timeout: Duration,
    fanout_attempts: usize,
    stats: EdgeStats,
}

impl EdgeRouter {
    pub fn new(
        membership: Arc<MembershipService>,
        buckets: Arc<BucketDirectory>,
        limiter: Arc<FrontendLimiter>,
        control_timeout: Duration,
        fanout_attempts: usize,
    ) -> Self {
        Self {
            membership,
            buckets,
            limiter,
            http_client: reqwest::Client::new(),
            control_timeout,
            fanout_attempts: fanout_attempts.max(1),
            stats: EdgeStats::default(),
        }
    }

    pub fn stats(&self) -> EdgeStatsSnapshot {
        EdgeStatsSnapshot {
            requests: self.stats.requests.load(Ordering::Relaxed),
            redirected: self.stats.redirected.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Runs the three phases for one client request.
    pub async fn get_batch(
        &self,
        bucket: Option<&str>,
        query: &MossQuery,
        body: Bytes,
    ) -> Result<Redirect, BatchError> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let mut flow = Flow {
            wave: WaveId::new(),
            state: FlowState::Idle,
        };

        match self.run(&mut flow, bucket, query, body).await {
            Ok(redirect) => {
                self.stats.redirected.fetch_add(1, Ordering::Relaxed);
                flow.advance(FlowState::Done);
                Ok(redirect)
            }
            Err(err) => {
                match err {
                    BatchError::TooManyRequests => {
                        self.stats.rejected.fetch_add(1, Ordering::Relaxed)
                    }
                    _ => self.stats.failed.fetch_add(1, Ordering::Relaxed),
                };
                flow.advance(FlowState::Failed);
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        flow: &mut Flow,
        bucket: Option<&str>,
        query: &MossQuery,
        body: Bytes,
    ) -> Result<Redirect, BatchError> {
        let request = BatchRequest::from_json(&body)?;
        let scope_bucket = self.admit(bucket, query, &request)?;

        let active = self.membership.get_active_members();
        let nat = active.len();
        let key = scope_bucket
            .as_ref()
            .map(|b| b.uname())
            .unwrap_or_default();
        let coordinator = select_coordinator(&active, &key, &gen_tie())?;

        // The request travels between nodes with its format already normalised.
        let body = Bytes::from(
            serde_json::to_vec(&request).map_err(|e| BatchError::Internal(e.to_string()))?,
        );
        let provider = scope_bucket.as_ref().map(|b| b.provider.clone());
        let control_query = MossQuery {
            tid: Some(coordinator.id.to_string()),
            provider,
        };

        // Phase 1: the coordinator prepares to receive and mints the task id.
        let path = MossPath::for_coordinator(bucket, flow.wave.clone(), nat);
        let task_id = self
            .dispatch_coordinator(&coordinator, &path, &control_query, body.clone())
            .await?;
        flow.advance(FlowState::CoordinatorDispatched);
        let path = path.with_task_id(task_id.as_str());

        // Phase 2: every other active node starts sending.
        if nat > 1 {
            flow.advance(FlowState::Broadcasting);
            for node in active.into_iter().filter(|n| n.id != coordinator.id) {
                let url = format!(
                    "{}?{}",
                    node.http_url(&path.build()),
                    control_query.encode()
                );
                let client = self.http_client.clone();
                let body = body.clone();
                let timeout = self.control_timeout;
                let attempts = self.fanout_attempts;
                let task_id = task_id.clone();
                tokio::spawn(async move {
                    let sent = send_with_retry(attempts, || {
                        client
                            .post(url.clone())
                            .header(reqwest::header::CONTENT_TYPE, "application/json")
                            .body(body.clone())
                            .timeout(timeout)
                    })
                    .await;
                    match sent {
                        Ok(resp) if resp.status().is_success() => {}
                        Ok(resp) => {
                            let status = resp.status();
                            let text = resp.text().await.unwrap_or_default();
                            tracing::warn!(
                                "Task {}: {} refused to send: {} {}",
                                task_id,
                                node,
                                status,
                                text
                            );
                        }
                        Err(e) => {
                            tracing::warn!("Task {}: phase 2 to {} failed: {}", task_id, node, e);
                        }
                    }
                });
            }
        }

        // Phase 3: send the client straight to the coordinator.
        let location = format!(
            "{}?{}",
            coordinator.http_url(&path.build()),
            control_query.encode()
        );
        flow.advance(FlowState::Redirected);
        tracing::debug!("Task {}: redirecting to {}", task_id, coordinator);

        Ok(Redirect {
            location,
            task_id,
            coordinator,
            wave_id: flow.wave.clone(),
        })
    }

    /// Resolves the request's buckets and charges each one against the frontend
    /// limiter. Returns the bucket named in the path, if any.
    fn admit(
        &self,
        bucket: Option<&str>,
        query: &MossQuery,
        request: &BatchRequest,
    ) -> Result<Option<Bucket>, BatchError> {
        let scope_bucket = match bucket {
            Some(name) => Some(self.buckets.lookup(name, query.provider.as_deref())?),
            None => None,
        };

        let mut referenced: BTreeSet<(String, Option<String>)> = BTreeSet::new();
        for item in &request.input {
            match (&item.bucket, &scope_bucket) {
                (Some(name), _) => {
                    referenced.insert((name.clone(), item.provider.clone()));
                }
                (None, Some(b)) => {
                    referenced.insert((b.name.clone(), Some(b.provider.clone())));
                }
                (None, None) => {
                    return Err(BatchError::InvalidRequest(format!(
                        "{}: no bucket given",
                        item.obj_name
                    )));
                }
            }
        }

        let active = self.membership.count_active();
        for (name, provider) in referenced {
            let b = self.buckets.lookup(&name, provider.as_deref())?;
            self.limiter.admit(&b, Verb::GetBatch, active)?;
        }
        Ok(scope_bucket)
    }

    /// Phase 1. Not retried: a second coordinator would contend for the same task.
    async fn dispatch_coordinator(
        &self,
        coordinator: &Node,
        path: &MossPath,
        query: &MossQuery,
        body: Bytes,
    ) -> Result<TaskId, BatchError> {
        let url = format!("{}?{}", coordinator.http_url(&path.build()), query.encode());
        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.control_timeout)
            .send()
            .await
            .map_err(|e| BatchError::Coordinator {
                status: None,
                message: format!("{} unreachable: {}", coordinator, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BatchError::Coordinator {
                status: Some(status.as_u16()),
                message: format!("{} answered {}: {}", coordinator, status, text),
            });
        }

        response
            .headers()
            .get(HEADER_TASK_ID)
            .and_then(|v| v.to_str().ok())
            .and_then(TaskId::parse)
            .ok_or_else(|| BatchError::Coordinator {
                status: None,
                message: format!("{} returned no task id", coordinator),
            })
    }
}
