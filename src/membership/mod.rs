//! Membership Module
//!
//! The node's view of the cluster map: which storage nodes exist, where they listen,
//! and which of them are currently active.
//!
//! ## Core Mechanisms
//! - **Active set**: only `Active` nodes take part in placement and get-batch fan-out.
//!   Nodes in maintenance or being decommissioned stay addressable but are skipped.
//! - **Stable ordering**: the active set is always returned sorted by node id so that
//!   independent callers build identical inputs for the placement oracle.
//! - **Versioning**: every state change bumps a local version counter.

pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
