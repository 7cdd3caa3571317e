// Client-level events delivered to subscribers

use crate::transport::HostEndpoint;

/// Events raised by the cache client as the fleet changes underneath it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A host became unreachable and was parked in its bucket
    HostDisconnected(HostEndpoint),

    /// A parked host came back and is serving again
    HostReconnected(HostEndpoint),

    /// A host reported that a cached item expired
    CacheItemExpired { cache_key: String },
}
