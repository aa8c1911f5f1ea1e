//! Error taxonomy for the get-batch protocol.
//!
//! Admission, placement and request errors fail a client request before any task
//! exists. Membership, transport, abort and timeout errors are fatal to a task and
//! trigger an abort broadcast. Benign terminations tear a task down without being
//! reported to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;

use crate::batch::types::TaskId;
use crate::membership::types::NodeId;
use crate::transport::TransportError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchError {
    #[error("Too Many Requests")]
    TooManyRequests,

    #[error("no eligible node: active node set is empty")]
    NoEligibleNode,

    #[error("bucket {0:?} does not exist")]
    BucketNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported output format {0:?}")]
    UnsupportedFormat(String),

    #[error("malformed task id {0:?}")]
    MalformedTaskId(String),

    #[error("node {0} not found in the cluster map")]
    NodeNotFound(NodeId),

    #[error("node {0} is not part of the task scope")]
    NotInScope(NodeId),

    #[error("expecting {expected} active nodes, have {actual}")]
    NodeCountMismatch { expected: usize, actual: usize },

    #[error("task {task}: wave mismatch (have {expected}, got {got})")]
    WaveMismatch {
        task: TaskId,
        expected: String,
        got: String,
    },

    #[error("task {task}: scope mismatch ({reason})")]
    ScopeMismatch { task: TaskId, reason: String },

    #[error("task {0} must be active")]
    TaskNotActive(TaskId),

    #[error("task {0} has already finished")]
    TaskFinished(TaskId),

    #[error("coordinator dispatch failed: {message}")]
    Coordinator {
        /// Status returned by the coordinator, if it answered at all.
        status: Option<u16>,
        message: String,
    },

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("task {task} aborted: {reason}")]
    Aborted { task: TaskId, reason: String },

    #[error("task {task} timed out after {waited:?} waiting for shards")]
    Timeout { task: TaskId, waited: Duration },

    #[error("benign termination: {0}")]
    Benign(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BatchError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            BatchError::NoEligibleNode => StatusCode::SERVICE_UNAVAILABLE,
            BatchError::BucketNotFound(_) | BatchError::TaskNotActive(_) => StatusCode::NOT_FOUND,
            BatchError::InvalidRequest(_)
            | BatchError::UnsupportedFormat(_)
            | BatchError::MalformedTaskId(_) => StatusCode::BAD_REQUEST,
            BatchError::NodeNotFound(_)
            | BatchError::NotInScope(_)
            | BatchError::NodeCountMismatch { .. }
            | BatchError::WaveMismatch { .. }
            | BatchError::ScopeMismatch { .. }
            | BatchError::TaskFinished(_) => StatusCode::CONFLICT,
            BatchError::Coordinator { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            BatchError::Transport(_)
            | BatchError::Aborted { .. }
            | BatchError::Timeout { .. }
            | BatchError::Benign(_)
            | BatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client went away or the task was superseded: tear down, but do not report.
    pub fn is_benign(&self) -> bool {
        matches!(self, BatchError::Benign(_))
    }

    /// Errors that must be broadcast to every participant of the task.
    pub fn is_task_fatal(&self) -> bool {
        matches!(
            self,
            BatchError::NodeCountMismatch { .. }
                | BatchError::Transport(_)
                | BatchError::Timeout { .. }
                | BatchError::Internal(_)
        )
    }
}

impl IntoResponse for BatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return status.into_response();
        }
        (status, self.to_string()).into_response()
    }
}
