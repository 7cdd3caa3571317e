// Redundancy bucket: an ordered group of host connections holding
// replicas of the same key range. Reads rotate over the online members;
// writes fan out to all of them.

use crate::error::Result;
use crate::transport::{HostConnection, HostEndpoint};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One replica group in the routing table.
///
/// Every connection handed to a bucket sits in exactly one of the two
/// lists: `online` (reachable, serving) or `offline` (parked after a
/// disconnect, waiting for its transport to reconnect). A single lock
/// guards both lists; the round-robin cursor is a relaxed atomic since
/// the contract only asks for approximately even read distribution.
pub struct RedundancyBucket {
    inner: RwLock<BucketInner>,
    cursor: AtomicUsize,
    capacity: usize,
}

#[derive(Default)]
struct BucketInner {
    online: Vec<HostConnection>,
    offline: Vec<HostConnection>,
}

impl RedundancyBucket {
    /// Create an empty bucket with the given target replication width
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(BucketInner::default()),
            cursor: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Append a connection to the online list
    pub fn add(&self, connection: HostConnection) {
        self.inner.write().online.push(connection);
    }

    /// Pick the next online member round-robin, or None if every member
    /// is offline
    pub fn next(&self) -> Option<HostConnection> {
        let inner = self.inner.read();
        if inner.online.is_empty() {
            return None;
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % inner.online.len();
        Some(inner.online[slot].clone())
    }

    /// Snapshot the online members.
    ///
    /// Callers invoke transport operations on the snapshot after this
    /// returns, outside the bucket lock, so a disconnect callback racing
    /// in can never deadlock against the caller.
    pub fn online_snapshot(&self) -> Vec<HostConnection> {
        self.inner.read().online.clone()
    }

    /// Snapshot every member, online and offline
    pub fn members_snapshot(&self) -> Vec<HostConnection> {
        let inner = self.inner.read();
        let mut members = inner.online.clone();
        members.extend(inner.offline.iter().cloned());
        members
    }

    /// Apply `op` to each online member in order, failing fast.
    ///
    /// The member list is snapshotted first; `op` runs outside the lock.
    pub async fn for_each_online<F, Fut>(&self, mut op: F) -> Result<()>
    where
        F: FnMut(HostConnection) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        for member in self.online_snapshot() {
            op(member).await?;
        }
        Ok(())
    }

    /// Park an online member after a disconnect; resets the read cursor.
    /// Returns false if the endpoint was not online (repeated disconnect
    /// events are no-ops).
    pub fn take_offline(&self, endpoint: &HostEndpoint) -> bool {
        let mut inner = self.inner.write();
        let Some(position) = inner
            .online
            .iter()
            .position(|member| member.endpoint() == endpoint)
        else {
            return false;
        };

        let member = inner.online.remove(position);
        inner.offline.push(member);
        self.cursor.store(0, Ordering::Relaxed);
        true
    }

    /// Return a parked member to service. Returns false if the endpoint
    /// was not offline (repeated reconnect events are no-ops).
    pub fn bring_online(&self, endpoint: &HostEndpoint) -> bool {
        let mut inner = self.inner.write();
        let Some(position) = inner
            .offline
            .iter()
            .position(|member| member.endpoint() == endpoint)
        else {
            return false;
        };

        let member = inner.offline.remove(position);
        inner.online.push(member);
        true
    }

    /// Evict a member entirely (discovery BYE), whichever list holds it
    pub fn remove(&self, endpoint: &HostEndpoint) -> Option<HostConnection> {
        let mut inner = self.inner.write();

        if let Some(position) = inner
            .online
            .iter()
            .position(|member| member.endpoint() == endpoint)
        {
            let member = inner.online.remove(position);
            self.cursor.store(0, Ordering::Relaxed);
            return Some(member);
        }

        let position = inner
            .offline
            .iter()
            .position(|member| member.endpoint() == endpoint)?;
        Some(inner.offline.remove(position))
    }

    /// Whether any member is currently reachable
    pub fn has_online(&self) -> bool {
        !self.inner.read().online.is_empty()
    }

    /// Whether the endpoint is a member, online or offline
    pub fn contains(&self, endpoint: &HostEndpoint) -> bool {
        let inner = self.inner.read();
        inner
            .online
            .iter()
            .chain(inner.offline.iter())
            .any(|member| member.endpoint() == endpoint)
    }

    /// Whether the endpoint sits in the offline list
    pub fn contains_offline(&self, endpoint: &HostEndpoint) -> bool {
        self.inner
            .read()
            .offline
            .iter()
            .any(|member| member.endpoint() == endpoint)
    }

    /// Target replication width fixed at construction
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current population, online and offline together
    pub fn member_count(&self) -> usize {
        let inner = self.inner.read();
        inner.online.len() + inner.offline.len()
    }

    /// Whether the bucket can still absorb a discovered host
    pub fn has_capacity(&self) -> bool {
        self.member_count() < self.capacity
    }
}
