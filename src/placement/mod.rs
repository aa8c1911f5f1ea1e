//! Placement Module
//!
//! Deterministic node selection by highest random weight (HRW, a.k.a. rendezvous hashing).
//!
//! Every node computes placement independently from its own active-node set; given the
//! same set and the same key, all nodes arrive at the same answer without a round-trip.
//!
//! - **Coordinator election**: `select_coordinator` hashes a request key together with a
//!   per-request random tie string, so identical requests spread over the cluster while a
//!   single request's coordinator is stable.
//! - **Object ownership**: `object_owner` maps an object's unique name to the node that
//!   stores it.

pub mod hrw;

pub use hrw::{gen_tie, object_owner, select_coordinator};
