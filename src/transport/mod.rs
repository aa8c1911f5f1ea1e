//! Transport (Data Mover) Module
//!
//! Node-to-node streaming channel used by get-batch tasks to move shard bytes and
//! control signals without per-object request/response overhead.
//!
//! ## Architecture
//! - **Frames**: every message is a `Frame` with a reserved opcode. Data frames carry
//!   object bytes; control frames (done, abort, progress request/response) share the
//!   same stream so that a sentinel can never overtake the data it terminates.
//! - **Dispatcher**: the receive side routes frames to per-task channels registered by
//!   the task itself. Abort frames for tasks not yet registered are stashed.
//! - **Implementations**: `TcpTransport` keeps one length-delimited TCP connection per
//!   peer; `LoopbackTransport` connects in-process nodes (single-process clusters and
//!   tests) and can inject data-frame failures.

pub mod dispatcher;
pub mod frame;
pub mod loopback;
pub mod tcp;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::batch::types::TaskId;
use crate::membership::types::{Node, NodeId};

pub use dispatcher::Dispatcher;
pub use frame::{EntryError, EntryHeader, Frame, FrameCodec, FrameHeader, Opcode};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use tcp::TcpTransport;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("receive endpoint for task {0} is already open")]
    AlreadyRegistered(TaskId),

    #[error("node {0} is unreachable: {1}")]
    Unreachable(NodeId, String),

    #[error("send to {0} failed: {1}")]
    Send(NodeId, String),

    #[error("codec: {0}")]
    Codec(String),
}

/// Per-node streaming endpoint shared by all tasks on the node.
#[async_trait]
pub trait Transport: Send + Sync {
    fn local_id(&self) -> &NodeId;

    /// Opens the receive endpoint of a task. At most one per task id.
    fn register(&self, task: &TaskId) -> Result<mpsc::Receiver<Frame>, TransportError>;

    /// Closes the receive endpoint; frames still in flight are dropped.
    fn unregister(&self, task: &TaskId);

    /// Sends one frame to `to`; frames to the same peer are delivered in order.
    async fn send(&self, to: &Node, frame: Frame) -> Result<(), TransportError>;

    /// Drops stashed early aborts older than `older_than`.
    fn prune(&self, older_than: Duration);
}
