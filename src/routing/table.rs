// Routing table for the cache host fleet
//
// Holds the ordered bucket sequence assembled at startup plus the set of
// bucket indices with no reachable member. Lookups take the read lock;
// membership transitions (disconnect, reconnect, discovery add/remove)
// take the write lock and touch nothing but in-memory state, so a
// transport callback can never deadlock against the hot path.

use crate::error::{CacheError, Result};
use crate::routing::bucket::RedundancyBucket;
use crate::routing::bucket_index;
use crate::transport::{HostConnection, HostEndpoint};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Ordered bucket sequence plus the offline-index set
pub struct RoutingTable {
    inner: RwLock<TableInner>,
    width: usize,
}

struct TableInner {
    buckets: Vec<Arc<RedundancyBucket>>,
    offline: HashSet<usize>,
}

impl RoutingTable {
    /// Assemble the table from the configured fleet.
    ///
    /// Hosts are sorted by (address, port) and poured into buckets of
    /// width `redundancy_layers + 1` in order; a short final bucket is
    /// kept. The result is identical on every client seeing the same
    /// configuration.
    pub fn assemble(mut connections: Vec<HostConnection>, redundancy_layers: usize) -> Self {
        let width = redundancy_layers + 1;
        connections.sort_by(|a, b| a.endpoint().cmp(b.endpoint()));

        let mut buckets = Vec::new();
        for replicas in connections.chunks(width) {
            let bucket = RedundancyBucket::new(width);
            for connection in replicas {
                bucket.add(connection.clone());
            }
            buckets.push(Arc::new(bucket));
        }

        Self {
            inner: RwLock::new(TableInner {
                buckets,
                offline: HashSet::new(),
            }),
            width,
        }
    }

    /// Resolve a routing string to its bucket
    pub fn route(&self, routing_string: &str) -> Result<Arc<RedundancyBucket>> {
        self.route_entry(routing_string).map(|(_, bucket)| bucket)
    }

    /// Resolve a routing string to its bucket index and bucket.
    ///
    /// Offline buckets are skipped by walking forward to the first
    /// serving successor; fails with `NoCacheHostsAvailable` when the
    /// offline set covers the whole sequence.
    pub fn route_entry(&self, routing_string: &str) -> Result<(usize, Arc<RedundancyBucket>)> {
        let inner = self.inner.read();
        if inner.buckets.is_empty() || inner.offline.len() == inner.buckets.len() {
            return Err(CacheError::NoCacheHostsAvailable);
        }

        let mut index = bucket_index(routing_string, inner.buckets.len());
        while inner.offline.contains(&index) {
            index = (index + 1) % inner.buckets.len();
        }

        Ok((index, Arc::clone(&inner.buckets[index])))
    }

    /// Fail with `NoCacheHostsAvailable` unless some bucket is serving
    pub fn ensure_available(&self) -> Result<()> {
        let inner = self.inner.read();
        if inner.buckets.is_empty() || inner.offline.len() == inner.buckets.len() {
            return Err(CacheError::NoCacheHostsAvailable);
        }
        Ok(())
    }

    /// Park a disconnected host in its bucket; shadows the bucket index
    /// when the last member goes dark. Returns false if no bucket held
    /// the endpoint online (stale or repeated disconnect signals).
    pub fn on_disconnected(&self, endpoint: &HostEndpoint) -> bool {
        let mut inner = self.inner.write();
        let TableInner { buckets, offline } = &mut *inner;

        for (index, bucket) in buckets.iter().enumerate() {
            if bucket.take_offline(endpoint) {
                if !bucket.has_online() {
                    offline.insert(index);
                }
                return true;
            }
        }

        false
    }

    /// Return a reconnected host to service and unshadow every bucket
    /// index that regained a reachable member. Returns false if no
    /// bucket was holding the endpoint offline.
    pub fn on_reconnected(&self, endpoint: &HostEndpoint) -> bool {
        let mut inner = self.inner.write();
        let TableInner { buckets, offline } = &mut *inner;

        let mut restored = false;
        for bucket in buckets.iter() {
            if bucket.bring_online(endpoint) {
                restored = true;
                break;
            }
        }

        if restored {
            offline.retain(|&index| !buckets[index].has_online());
        }

        restored
    }

    /// Append a discovered host to the fabric: the last bucket absorbs
    /// it while it has free width, otherwise a new bucket is started.
    /// Returns false when the endpoint is already a member somewhere.
    pub fn add_host(&self, connection: HostConnection) -> bool {
        let mut inner = self.inner.write();
        let TableInner { buckets, offline } = &mut *inner;

        if buckets
            .iter()
            .any(|bucket| bucket.contains(connection.endpoint()))
        {
            return false;
        }

        let last_has_room = buckets.last().is_some_and(|last| last.has_capacity());
        if last_has_room {
            let index = buckets.len() - 1;
            buckets[index].add(connection);
            offline.remove(&index);
        } else {
            let bucket = RedundancyBucket::new(self.width);
            bucket.add(connection);
            buckets.push(Arc::new(bucket));
        }

        true
    }

    /// Evict a departed host (discovery BYE) and hand its connection
    /// back so the caller can disconnect it outside the lock.
    pub fn remove_host(&self, endpoint: &HostEndpoint) -> Option<HostConnection> {
        let mut inner = self.inner.write();
        let TableInner { buckets, offline } = &mut *inner;

        for (index, bucket) in buckets.iter().enumerate() {
            if let Some(connection) = bucket.remove(endpoint) {
                if bucket.has_online() {
                    offline.remove(&index);
                } else {
                    offline.insert(index);
                }
                return Some(connection);
            }
        }

        None
    }

    /// Whether the endpoint belongs to any bucket
    pub fn contains_endpoint(&self, endpoint: &HostEndpoint) -> bool {
        self.inner
            .read()
            .buckets
            .iter()
            .any(|bucket| bucket.contains(endpoint))
    }

    /// Bucket at a fixed position in the sequence
    pub fn bucket_at(&self, index: usize) -> Option<Arc<RedundancyBucket>> {
        self.inner.read().buckets.get(index).cloned()
    }

    /// Snapshot the bucket sequence in order
    pub fn buckets(&self) -> Vec<Arc<RedundancyBucket>> {
        self.inner.read().buckets.clone()
    }

    /// Number of buckets in the sequence
    pub fn bucket_count(&self) -> usize {
        self.inner.read().buckets.len()
    }

    /// Sorted snapshot of the shadowed bucket indices
    pub fn offline_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.inner.read().offline.iter().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Every member endpoint across the fleet, in bucket order
    pub fn endpoints(&self) -> Vec<HostEndpoint> {
        self.inner
            .read()
            .buckets
            .iter()
            .flat_map(|bucket| {
                bucket
                    .members_snapshot()
                    .into_iter()
                    .map(|member| member.endpoint().clone())
            })
            .collect()
    }

    /// Target replication width (`redundancy layers + 1`)
    pub fn width(&self) -> usize {
        self.width
    }
}
