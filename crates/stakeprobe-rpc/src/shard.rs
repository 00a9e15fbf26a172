//! Shard inference from endpoint URLs.

use once_cell::sync::Lazy;
use regex::Regex;

/// Shard in the host of a public endpoint.
static HOST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.s(\d)\.").expect("static regex"));

/// Shard in the RPC port of a local node.
static PORT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":950(\d)/").expect("static regex"));

/// Infer the shard an endpoint serves.
///
/// Public endpoints carry the shard in the host (`https://api.s1.b.hmny.io/`),
/// local nodes in the RPC port (`http://localhost:9502/`). Assumes at most
/// ten shards.
pub fn shard_from_endpoint(endpoint: &str) -> Option<u32> {
    [&*HOST_PATTERN, &*PORT_PATTERN].into_iter().find_map(|re| {
        re.captures(endpoint)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}
