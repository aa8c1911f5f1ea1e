//! Node Assembly
//!
//! Builds every component of a storage node from its configuration, exposes the HTTP
//! surface as one axum `Router`, and runs the periodic housekeeping loops.

use anyhow::Result;
use axum::{
    Router,
    extract::Extension,
    routing::{get, put},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::batch::registry::TaskRegistry;
use crate::batch::task::TaskDeps;
use crate::bucket::directory::BucketDirectory;
use crate::config::NodeConfig;
use crate::membership::service::MembershipService;
use crate::ratelimit::FrontendLimiter;
use crate::router::edge::EdgeRouter;
use crate::router::handlers::{handle_cluster, handle_moss_get, handle_moss_post, handle_moss_root};
use crate::router::protocol::{ENDPOINT_CLUSTER, ENDPOINT_MOSS};
use crate::store::ObjectStore;
use crate::store::handlers::{handle_internal_put_object, handle_put_object};
use crate::store::protocol::{ENDPOINT_INTERNAL_OBJECTS, ENDPOINT_OBJECTS};
use crate::store::service::ObjectService;
use crate::transport::Transport;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

pub struct NodeContext {
    pub config: NodeConfig,
    pub membership: Arc<MembershipService>,
    pub buckets: Arc<BucketDirectory>,
    pub limiter: Arc<FrontendLimiter>,
    pub store: Arc<dyn ObjectStore>,
    pub objects: Arc<ObjectService>,
    pub transport: Arc<dyn Transport>,
    pub registry: Arc<TaskRegistry>,
    pub edge: Arc<EdgeRouter>,
}

impl NodeContext {
    pub fn build(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        config.validate()?;

        let membership = MembershipService::new(&config.local_id(), config.cluster.nodes.clone())?;
        let buckets = Arc::new(BucketDirectory::new(config.buckets.clone()));
        let limiter = Arc::new(FrontendLimiter::new(config.ratelimit.sweep_period()));

        let objects = Arc::new(
            ObjectService::new(store.clone(), membership.clone()).with_forwarding(
                config.timeouts.control_call(),
                config.timeouts.control_attempts,
            ),
        );

        let deps = Arc::new(TaskDeps {
            transport: transport.clone(),
            store: store.clone(),
            membership: membership.clone(),
            buckets: buckets.clone(),
            timeouts: config.timeouts.task_timeouts(),
            chunk_size: config.transport.chunk_size,
        });
        let registry = TaskRegistry::new(
            deps,
            config.timeouts.task_idle(),
            config.timeouts.keep_finished(),
        );

        let edge = Arc::new(EdgeRouter::new(
            membership.clone(),
            buckets.clone(),
            limiter.clone(),
            config.timeouts.control_call(),
            config.timeouts.control_attempts,
        ));

        tracing::info!(
            "Node {} ready: {} buckets, assemble wait {:?}",
            membership.local_id(),
            buckets.len(),
            config.timeouts.task_timeouts().assemble_wait()
        );

        Ok(Self {
            config,
            membership,
            buckets,
            limiter,
            store,
            objects,
            transport,
            registry,
            edge,
        })
    }

    pub fn app(&self) -> Router {
        Router::new()
            .route(ENDPOINT_MOSS, get(handle_moss_root))
            .route(
                &format!("{}/*rest", ENDPOINT_MOSS),
                get(handle_moss_get).post(handle_moss_post),
            )
            .route(
                &format!("{}/:bucket/*name", ENDPOINT_OBJECTS),
                put(handle_put_object),
            )
            .route(
                &format!("{}/:bucket/*name", ENDPOINT_INTERNAL_OBJECTS),
                put(handle_internal_put_object),
            )
            .route(ENDPOINT_CLUSTER, get(handle_cluster))
            .layer(Extension(self.membership.clone()))
            .layer(Extension(self.buckets.clone()))
            .layer(Extension(self.limiter.clone()))
            .layer(Extension(self.objects.clone()))
            .layer(Extension(self.registry.clone()))
            .layer(Extension(self.edge.clone()))
    }

    /// Spawns the limiter sweep, task housekeeping and the stats reporter.
    pub fn spawn_housekeeping(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        // 1. Rate limiter sweep:
        let limiter = self.limiter.clone();
        handles.push(tokio::spawn(async move {
            let mut next = limiter.sweep_period();
            loop {
                tokio::time::sleep(next).await;
                next = limiter.housekeep(Instant::now());
            }
        }));

        // 2. Tasks and stashed aborts:
        let registry = self.registry.clone();
        let transport = self.transport.clone();
        let interval = self.config.timeouts.housekeep_interval();
        let stash_ttl = self.config.transport.stash_ttl();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.housekeep(Instant::now()).await;
                transport.prune(stash_ttl);
            }
        }));

        // 3. Stats reporter:
        let membership = self.membership.clone();
        let registry = self.registry.clone();
        let limiter = self.limiter.clone();
        let edge = self.edge.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            loop {
                ticker.tick().await;
                let stats = edge.stats();
                tracing::info!(
                    "Cluster stats: {} active nodes, {} tasks ({} running), {} limiter entries, {} requests ({} redirected, {} rejected, {} failed)",
                    membership.count_active(),
                    registry.len(),
                    registry.active_count(),
                    limiter.len(),
                    stats.requests,
                    stats.redirected,
                    stats.rejected,
                    stats.failed
                );
            }
        }));

        handles
    }
}

#[cfg(test)]
pub(crate) mod cluster;

#[cfg(test)]
mod tests;
