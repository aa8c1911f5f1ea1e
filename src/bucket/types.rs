use serde::{Deserialize, Serialize};
use std::time::Duration;
use xxhash_rust::xxh3::xxh3_64;

pub const DEFAULT_PROVIDER: &str = "ais";

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_interval_ms() -> u64 {
    1_000
}

/// Frontend (client-facing) rate limit of a bucket.
///
/// `max_tokens` is the cluster-wide budget per `interval_ms`; each node admits its share.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RateLimitProps {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl RateLimitProps {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BucketProps {
    #[serde(default)]
    pub rate_limit: RateLimitProps,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bucket {
    pub name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub props: BucketProps,
}

impl Bucket {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            provider: default_provider(),
            props: BucketProps::default(),
        }
    }

    /// `provider/name`
    pub fn uname(&self) -> String {
        format!("{}/{}", self.provider, self.name)
    }

    /// Unique name of an object in this bucket, the input to object placement.
    pub fn object_uname(&self, obj_name: &str) -> String {
        format!("{}/{}/{}", self.provider, self.name, obj_name)
    }

    /// Key of this bucket's rate-limiter entry for the given verb.
    pub fn hash_uname(&self, verb: &str) -> u64 {
        xxh3_64(format!("{}/{}|{}", self.provider, self.name, verb).as_bytes())
    }
}
