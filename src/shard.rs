//! Shard identifiers and weighted shard-count assignment for the consistent-hash ring.

use std::collections::HashMap;

use xxhash_rust::xxh3::xxh3_64;

use crate::cluster::Cluster;

/// Synthetic identifier for the `i`th shard owned by `client`, e.g. `"web-0"`, `"web-1"`.
pub fn shard_id(client: &str, i: u64) -> String {
    format!("{client}-{i}")
}

/// Stable 64-bit hash of a ring key (a shard id, or a request path being looked up).
pub fn hash_key(key: &str) -> u64 {
    xxh3_64(key.as_bytes())
}

/// Computes how many of `total_shards` each cluster owns, proportional to its weight:
/// `floor(total_shards * weight(C) / sum(weights))`, with any shards left over from
/// flooring handed to the clusters with the largest fractional remainder (largest-remainder
/// method), broken by cluster name for determinism.
pub fn weighted_shard_counts(total_shards: u64, clusters: &[Cluster]) -> HashMap<String, u64> {
    let total_weight: u64 = clusters.iter().map(|c| c.weight as u64).sum();
    if total_weight == 0 || clusters.is_empty() {
        return HashMap::new();
    }

    let mut counts = HashMap::with_capacity(clusters.len());
    let mut remainders: Vec<(String, u64)> = Vec::with_capacity(clusters.len());
    let mut assigned: u64 = 0;

    for cluster in clusters {
        let share = total_shards as u128 * cluster.weight as u128;
        let base = (share / total_weight as u128) as u64;
        let remainder = (share % total_weight as u128) as u64;
        counts.insert(cluster.name.clone(), base);
        remainders.push((cluster.name.clone(), remainder));
        assigned += base;
    }

    remainders.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut leftover = total_shards.saturating_sub(assigned);
    for (name, _) in remainders {
        if leftover == 0 {
            break;
        }
        *counts.get_mut(&name).unwrap() += 1;
        leftover -= 1;
    }

    counts
}
