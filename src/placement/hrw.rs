use crate::error::BatchError;
use crate::membership::types::Node;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

const HRW_SEED: u64 = 0x9e37_79b9_7f4a_7c15;
const TIE_LEN: usize = 8;

/// Stable per-node digest; the same id yields the same digest on every node and build.
fn node_digest(node: &Node) -> u64 {
    xxh3_64(node.id.as_str().as_bytes())
}

fn mix(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn weight(node: &Node, digest: u64) -> u64 {
    mix(node_digest(node) ^ digest)
}

fn max_weight<'a>(nodes: &'a [Node], digest: u64) -> Option<&'a Node> {
    nodes
        .iter()
        .filter(|node| node.is_active())
        .max_by(|a, b| {
            weight(a, digest)
                .cmp(&weight(b, digest))
                // equal weights: the higher id wins on every node
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Elects the coordinator for one request.
pub fn select_coordinator(nodes: &[Node], key: &str, tie: &str) -> Result<Node, BatchError> {
    let mut buf = String::with_capacity(key.len() + tie.len() + 1);
    buf.push_str(key);
    buf.push('\x00');
    buf.push_str(tie);
    let digest = xxh3_64_with_seed(buf.as_bytes(), HRW_SEED);

    max_weight(nodes, digest)
        .cloned()
        .ok_or(BatchError::NoEligibleNode)
}

/// Owner of an object, keyed by its unique name (`provider/bucket/object`).
pub fn object_owner(nodes: &[Node], uname: &str) -> Option<Node> {
    let digest = xxh3_64_with_seed(uname.as_bytes(), HRW_SEED);
    max_weight(nodes, digest).cloned()
}

/// Per-request random tie-breaker.
pub fn gen_tie() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..TIE_LEN)
        .map(|_| ALPHABET[rand::random::<usize>() % ALPHABET.len()] as char)
        .collect()
}
