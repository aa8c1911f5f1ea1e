use crate::batch::types::{PLACEHOLDER_TASK_ID, WaveId};
use crate::error::BatchError;

use super::protocol::ENDPOINT_MOSS;

/// Largest node count a control or data URL may carry.
pub const MAX_NODE_COUNT: usize = 10_000;

/// Target-side get-batch URL: `/v1/ml/moss[/<bucket>]/<task-id>/<wave-id>/<node-count>`.
///
/// The bucket is present when the client addressed a bucket, absent when every input
/// names its own bucket. Before the coordinator has minted an id the task id segment
/// holds the placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MossPath {
    pub bucket: Option<String>,
    pub task_id: String,
    pub wave_id: WaveId,
    pub nat: usize,
}

impl MossPath {
    pub fn for_coordinator(bucket: Option<&str>, wave_id: WaveId, nat: usize) -> Self {
        Self {
            bucket: bucket.map(str::to_string),
            task_id: PLACEHOLDER_TASK_ID.to_string(),
            wave_id,
            nat,
        }
    }

    pub fn with_task_id(&self, task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            ..self.clone()
        }
    }

    pub fn build(&self) -> String {
        match &self.bucket {
            Some(bucket) => format!(
                "{}/{}/{}/{}/{}",
                ENDPOINT_MOSS, bucket, self.task_id, self.wave_id, self.nat
            ),
            None => format!("{}/{}/{}/{}", ENDPOINT_MOSS, self.task_id, self.wave_id, self.nat),
        }
    }

    /// Parses the segments that follow `/v1/ml/moss/`.
    pub fn parse(rest: &str) -> Result<Self, BatchError> {
        let items: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let (bucket, items) = match items.len() {
            4 => (Some(items[0].to_string()), &items[1..]),
            3 => (None, &items[..]),
            n => {
                return Err(BatchError::InvalidRequest(format!(
                    "invalid get-batch path {:?}: {} segments",
                    rest, n
                )));
            }
        };

        let nat: usize = items[2].parse().map_err(|_| {
            BatchError::InvalidRequest(format!("invalid node count {:?}", items[2]))
        })?;
        if nat == 0 || nat >= MAX_NODE_COUNT {
            return Err(BatchError::InvalidRequest(format!(
                "node count {} out of range",
                nat
            )));
        }

        Ok(Self {
            bucket,
            task_id: items[0].to_string(),
            wave_id: WaveId::from(items[1]),
            nat,
        })
    }

    pub fn is_placeholder(&self) -> bool {
        self.task_id == PLACEHOLDER_TASK_ID
    }
}
