//! Batch Module
//!
//! The coordinated get-batch task and its per-node registry.
//!
//! ## Core Concepts
//! - **Roles**: the coordinator receives shards and assembles the archive; every other
//!   active node is a contributor that streams the requested objects it owns.
//! - **Identity**: a task id minted by the coordinator, a wave id minted by the edge for
//!   each client call, and the active-node count both sides must agree on.
//! - **Lifecycle**: coordinator `Created -> Receiving -> AllShardsIn -> Assembling -> Done`;
//!   contributor `Created -> Sending -> Sent -> Closed`. Any fatal error moves every
//!   participant to `Aborted` (or `TimedOut`).
//!
//! ## Modules
//! - **`types`**: ids, request descriptor, roles and states.
//! - **`task`**: `BatchTask`, the per-node task instance.
//! - **`registry`**: `TaskRegistry`, create-or-reuse table and housekeeping.
//! - **`handlers`**: control and data requests addressed to this node as a target.

pub mod handlers;
pub mod registry;
pub mod task;
pub mod types;

pub use registry::TaskRegistry;
pub use task::{AssembledStream, BatchTask, TaskDeps, TaskTimeouts};
