// Key routing for the cache host fleet
//
// This module maps routing strings (cache keys, or tag names for
// tag-scoped operations) onto redundancy buckets. The hash is the fleet's
// shared placement function: every client computing it over the same
// configured fleet lands on the same bucket, so it is kept bit-for-bit
// stable rather than swapped for a stronger mix.

pub mod bucket;
pub mod table;

pub use bucket::RedundancyBucket;
pub use table::RoutingTable;

/// Hash a routing string: wrapping i32 character sum seeded at 17
pub fn routing_hash(routing_string: &str) -> i32 {
    let mut hash: i32 = 17;
    for ch in routing_string.chars() {
        hash = hash.wrapping_add(ch as i32);
    }
    hash
}

/// Map a routing string onto one of `bucket_count` buckets
pub fn bucket_index(routing_string: &str, bucket_count: usize) -> usize {
    routing_hash(routing_string).unsigned_abs() as usize % bucket_count
}
