// Transport contract consumed by the routing core
//
// The wire client that speaks to a single cache host lives outside this
// crate. The routing core consumes it through the narrow `HostTransport`
// interface below and hears back from it through `HostEvent` messages on
// an mpsc channel handed over at construction time.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod framing;

/// Network identity of a cache host (address:port), unique per fleet.
///
/// Ordering is lexicographic on `(address, port)`; routing table assembly
/// relies on it being identical across client instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostEndpoint {
    pub address: String,
    pub port: u16,
}

impl HostEndpoint {
    /// Create a new HostEndpoint
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for HostEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Transport tuning passed through from the client settings
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// How long a host connection waits between reconnect attempts
    pub reconnect_interval: Duration,

    /// Per-RPC timeout enforced inside the transport
    pub communication_timeout: Duration,

    /// Socket receive buffer size in bytes
    pub message_buffer_size: usize,

    /// Largest message the transport will frame, in bytes
    pub maximum_message_size: usize,
}

/// Storage directives attached to a write.
///
/// When both expirations are supplied the absolute one wins; interned
/// items carry no expiration and no removal notification at all.
/// `normalized` applies that precedence once, at the facade edge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WritePolicy {
    /// Tag the items belong to; also becomes the routing string
    pub tag_name: Option<String>,

    /// Wall-clock instant after which the items expire
    pub absolute_expiration: Option<DateTime<Utc>>,

    /// Idle window after which the items expire
    pub sliding_expiration: Option<Duration>,

    /// Ask the host to push a notification when an item is removed
    pub notify_removed: bool,

    /// Pin the items in host memory, exempt from expiry and eviction
    pub is_interned: bool,
}

impl WritePolicy {
    /// Route and replicate under a tag
    pub fn with_tag(mut self, tag_name: impl Into<String>) -> Self {
        self.tag_name = Some(tag_name.into());
        self
    }

    /// Expire at a fixed instant
    pub fn with_absolute_expiration(mut self, at: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(at);
        self
    }

    /// Expire after an idle window
    pub fn with_sliding_expiration(mut self, window: Duration) -> Self {
        self.sliding_expiration = Some(window);
        self
    }

    /// Request removal notifications for the written items
    pub fn notifying_removed(mut self) -> Self {
        self.notify_removed = true;
        self
    }

    /// Intern the written items
    pub fn interned(mut self) -> Self {
        self.is_interned = true;
        self
    }

    /// Apply the resolution precedence: interned clears expirations and
    /// notifications, otherwise an absolute expiration displaces a
    /// sliding one.
    pub fn normalized(mut self) -> Self {
        if self.is_interned {
            self.absolute_expiration = None;
            self.sliding_expiration = None;
            self.notify_removed = false;
        } else if self.absolute_expiration.is_some() {
            self.sliding_expiration = None;
        }
        self
    }
}

/// Asynchronous signals raised by a host transport from its own task
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// The connection to the host was lost
    Disconnected(HostEndpoint),

    /// The transport re-established the connection on its own
    Reconnected(HostEndpoint),

    /// The host pushed an unsolicited framed message
    MessageReceived {
        endpoint: HostEndpoint,
        payload: Vec<u8>,
    },
}

/// Request/response client for one cache host.
///
/// Reconnection is the transport's own responsibility: after a drop it
/// retries on its configured interval until `disconnect` is called, and
/// reports transitions through the event channel it was built with.
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// The host this transport speaks to
    fn endpoint(&self) -> &HostEndpoint;

    /// Establish the connection and start the transport's receive loop
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down and stop reconnecting
    async fn disconnect(&self) -> Result<()>;

    /// Fetch raw values for the given keys; misses are omitted
    async fn get(&self, keys: &[String]) -> Result<Vec<Vec<u8>>>;

    /// Insert or overwrite the given entries under the supplied policy
    async fn add_or_update(&self, entries: &[(String, Vec<u8>)], policy: &WritePolicy)
        -> Result<()>;

    /// Remove the given keys
    async fn remove(&self, keys: &[String]) -> Result<()>;

    /// Fetch raw values for every key carrying one of the tags
    async fn get_tagged(&self, tags: &[String], pattern: &str) -> Result<Vec<Vec<u8>>>;

    /// Remove every key carrying one of the tags
    async fn remove_tagged(&self, tags: &[String], pattern: &str) -> Result<()>;

    /// List keys matching the pattern
    async fn get_cache_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// List keys carrying one of the tags and matching the pattern
    async fn get_cache_keys_tagged(&self, tags: &[String], pattern: &str) -> Result<Vec<String>>;

    /// Drop every item held by the host
    async fn clear(&self) -> Result<()>;
}

/// Builds transports for configured and discovered hosts
pub trait HostTransportFactory: Send + Sync {
    /// Create a transport for `endpoint` that reports its state
    /// transitions and inbound messages on `events`.
    fn create(
        &self,
        endpoint: HostEndpoint,
        options: &TransportOptions,
        events: mpsc::Sender<HostEvent>,
    ) -> Arc<dyn HostTransport>;
}

/// Cheap shared handle to one host's transport.
///
/// Buckets hold these in their online/offline lists; equality is by
/// endpoint, which is unique per fleet.
#[derive(Clone)]
pub struct HostConnection(Arc<dyn HostTransport>);

impl HostConnection {
    /// Wrap a transport in a routable handle
    pub fn new(transport: Arc<dyn HostTransport>) -> Self {
        Self(transport)
    }

    /// The host this connection belongs to
    pub fn endpoint(&self) -> &HostEndpoint {
        self.0.endpoint()
    }
}

impl Deref for HostConnection {
    type Target = dyn HostTransport;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for HostConnection {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint() == other.endpoint()
    }
}

impl Eq for HostConnection {}

impl fmt::Debug for HostConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostConnection").field(self.endpoint()).finish()
    }
}
