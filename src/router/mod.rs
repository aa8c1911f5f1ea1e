//! Router Module
//!
//! The cluster edge of the get-batch flow and its URL space.
//!
//! ## Flow
//! 1. **Coordinator dispatch**: validate and admit the request, elect the coordinator
//!    with HRW over the active nodes and a random tie, and ask it (synchronously) to
//!    prepare receiving. It answers with the task id it minted.
//! 2. **Fan-out**: with more than one active node, tell every other node to start
//!    sending. Fire-and-forget; completion is tracked by the coordinator over the
//!    data transport.
//! 3. **Redirect**: answer the client with a 307 to the coordinator's data URL.
//!
//! A failed phase 1 fails the request; there is no fallback coordinator.

pub mod edge;
pub mod handlers;
pub mod path;
pub mod protocol;

pub use edge::{EdgeRouter, FlowState, Redirect};
pub use path::MossPath;
