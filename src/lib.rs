//! Get-batch Cluster Node Library
//!
//! A storage node of a clustered object store that serves multi-object "get-batch"
//! requests: one client call names many objects, spread over the cluster, and receives
//! a single archive. One node is elected (by hashing, no consensus round) to assemble
//! the archive; every other node streams its share of the objects to it.
//!
//! ## Architecture Modules
//!
//! - **`router`**: the cluster edge. Admission, coordinator election, the three-phase
//!   dispatch (prepare coordinator, fan out to contributors, redirect the client).
//! - **`batch`**: the coordinated task on each node and the create-or-reuse registry.
//! - **`transport`**: node-to-node data mover; shard bytes and control signals share
//!   one framed stream per peer.
//! - **`placement`**: HRW selection of coordinators and object owners.
//! - **`ratelimit`**: per-(bucket, verb) token buckets with idle sweep.
//! - **`membership`**, **`bucket`**, **`store`**, **`archive`**: the cluster map, bucket
//!   properties, local object storage and the output container.
//! - **`config`**, **`node`**, **`error`**: configuration, node wiring, error taxonomy.
//! - **`retry`**: backoff shared by forwarded writes and the control fan-out.

pub mod archive;
pub mod batch;
pub mod bucket;
pub mod config;
pub mod error;
pub mod membership;
pub mod node;
pub mod placement;
pub mod ratelimit;
pub mod retry;
pub mod router;
pub mod store;
pub mod transport;
