use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::token_bucket::TokenBucket;
use crate::bucket::types::Bucket;
use crate::error::BatchError;

/// Request verbs subject to frontend rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    GetBatch,
    Put,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::GetBatch => "GET-BATCH",
            Verb::Put => "PUT",
        }
    }
}

/// Per-(bucket, verb) admission control for this node's share of the cluster edge.
pub struct FrontendLimiter {
    buckets: DashMap<u64, Arc<TokenBucket>>,
    sweep_period: Duration,
}

impl FrontendLimiter {
    pub fn new(sweep_period: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            sweep_period,
        }
    }

    /// Admits or rejects one request.
    ///
    /// The bucket's budget is shared by every active node, so each node holds
    /// `max_tokens / active_nodes` (at least one).
    pub fn admit(&self, bucket: &Bucket, verb: Verb, active_nodes: usize) -> Result<(), BatchError> {
        let props = &bucket.props.rate_limit;
        if !props.enabled {
            return Ok(());
        }

        let key = bucket.hash_uname(verb.as_str());
        // Clone the Arc out so that the map shard is not held during the check.
        let token_bucket = match self.buckets.get(&key) {
            Some(entry) => entry.value().clone(),
            None => self
                .buckets
                .entry(key)
                .or_insert_with(|| {
                    let share = (props.max_tokens / active_nodes.max(1) as u32).max(1);
                    tracing::debug!(
                        "New rate limiter for {} {}: {} tokens per {:?}",
                        bucket.uname(),
                        verb.as_str(),
                        share,
                        props.interval()
                    );
                    Arc::new(TokenBucket::new(share, props.interval()))
                })
                .value()
                .clone(),
        };

        if token_bucket.try_acquire() {
            Ok(())
        } else {
            tracing::debug!("Rate limit exceeded: {} {}", bucket.uname(), verb.as_str());
            Err(BatchError::TooManyRequests)
        }
    }

    /// Drops entries unused for at least half the sweep period; returns the period until
    /// the next sweep.
    pub fn housekeep(&self, now: Instant) -> Duration {
        let idle = self.sweep_period / 2;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_used()) < idle);
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!("Rate limiter sweep evicted {} idle entries", evicted);
        }
        self.sweep_period
    }

    pub fn sweep_period(&self) -> Duration {
        self.sweep_period
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
