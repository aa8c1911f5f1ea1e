//! Bucket Configuration Module
//!
//! Per-bucket properties consumed by the request path. Buckets are declared in the node
//! configuration; the directory only resolves names and hands out their properties.

pub mod directory;
pub mod types;

#[cfg(test)]
mod tests;
