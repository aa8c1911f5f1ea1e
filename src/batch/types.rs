use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::archive::{self, OutputFormat};
use crate::error::BatchError;
use crate::membership::types::NodeId;

/// Task id placeholder an edge node puts in the coordinator URL before an id exists.
pub const PLACEHOLDER_TASK_ID: &str = "noxid";

/// Response header carrying the task id minted by the coordinator.
pub const HEADER_TASK_ID: &str = "x-batch-task-id";

#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts only well-formed ids; the placeholder is not a task id.
    pub fn parse(s: &str) -> Option<Self> {
        Self::is_valid(s).then(|| Self(s.to_string()))
    }

    pub fn is_valid(s: &str) -> bool {
        Uuid::parse_str(s).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one attempt (one client call) within a task.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct WaveId(pub String);

impl WaveId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WaveId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for WaveId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for WaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One requested object. `bucket` defaults to the bucket in the request path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchIn {
    #[serde(rename = "objname")]
    pub obj_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl BatchIn {
    pub fn new(obj_name: &str) -> Self {
        Self {
            obj_name: obj_name.to_string(),
            bucket: None,
            provider: None,
        }
    }
}

/// Body of a get-batch request, forwarded verbatim between nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BatchRequest {
    #[serde(rename = "in")]
    pub input: Vec<BatchIn>,
    #[serde(rename = "mime", default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    /// Name archive entries `<object>` instead of `<bucket>/<object>`.
    #[serde(rename = "onob", default)]
    pub only_obj_name: bool,
}

impl BatchRequest {
    /// Decodes and validates a request body; the output format is normalised.
    pub fn from_json(body: &[u8]) -> Result<Self, BatchError> {
        let mut req: BatchRequest = serde_json::from_slice(body)
            .map_err(|e| BatchError::InvalidRequest(format!("bad request body: {}", e)))?;
        if req.input.is_empty() {
            return Err(BatchError::InvalidRequest("get-batch: empty input".to_string()));
        }
        for item in &req.input {
            if item.obj_name.is_empty() {
                return Err(BatchError::InvalidRequest("get-batch: empty object name".to_string()));
            }
            archive::check_name(&item.obj_name)
                .map_err(|e| BatchError::InvalidRequest(format!("get-batch: object {}", e)))?;
            if let Some(bucket) = item.bucket.as_deref()
                && (bucket.contains('/') || bucket == "..")
            {
                return Err(BatchError::InvalidRequest(format!(
                    "get-batch: bad bucket name {:?}",
                    bucket
                )));
            }
        }
        let format = OutputFormat::normalize(req.output_format.as_deref())?;
        req.output_format = Some(format.as_str().to_string());
        Ok(req)
    }

    pub fn of(bucket: Option<&str>, names: &[&str]) -> Self {
        Self {
            input: names
                .iter()
                .map(|name| BatchIn {
                    obj_name: name.to_string(),
                    bucket: bucket.map(str::to_string),
                    provider: None,
                })
                .collect(),
            output_format: None,
            only_obj_name: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Assembles the output and streams it to the client.
    Coordinator,
    /// Streams its local objects to the coordinator.
    Contributor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Receiving,
    AllShardsIn,
    Assembling,
    Done,
    Sending,
    Sent,
    Closed,
    Aborted,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Done | TaskState::Closed | TaskState::Aborted | TaskState::TimedOut
        )
    }
}

/// What a task id is bound to. A request reusing the id must match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskScope {
    pub bucket: Option<String>,
    pub coordinator: NodeId,
}
