//! Object Store Network Protocol
//!
//! Endpoints and DTOs for object writes. Clients write through any node; the node that
//! receives the write forwards it to the owner when it does not own the object itself.

use serde::{Deserialize, Serialize};

/// Public endpoint for object writes: `PUT /v1/objects/<bucket>/<object>`.
pub const ENDPOINT_OBJECTS: &str = "/v1/objects";
/// Internal endpoint for writes forwarded to the owner.
pub const ENDPOINT_INTERNAL_OBJECTS: &str = "/internal/objects";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProviderQuery {
    pub provider: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutObjectResponse {
    pub success: bool,
    pub bucket: String,
    pub name: String,
    /// Node that stored the object.
    pub node: Option<String>,
    pub size: u64,
    pub checksum: u64,
}
