// Cache client facade
//
// The public operation surface over the host fleet. Every operation
// shares one retry shape: resolve routing and payload, attempt the RPC,
// and on any transport failure recompute the routing and try again until
// it succeeds or the whole fleet is offline. Routing locks are never held
// across network I/O: a bucket reference is taken under the read lock,
// the lock is released, and only then does the RPC go out.

mod invalidation;

use crate::config::ClientSettings;
use crate::discovery::HostDiscovery;
use crate::error::{CacheError, Result};
use crate::events::CacheEvent;
use crate::routing::bucket::RedundancyBucket;
use crate::routing::table::RoutingTable;
use crate::serialization::{BincodeSerializer, CacheSerializer};
use crate::transport::{HostConnection, HostEvent, HostTransportFactory, WritePolicy};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Host events buffered between the transports and the pump task
const HOST_EVENT_CAPACITY: usize = 1024;

/// Client events buffered per subscriber
const SUBSCRIBER_CAPACITY: usize = 1024;

/// Pause between routing attempts after a transport failure
const TRANSPORT_RETRY_PAUSE: Duration = Duration::from_millis(50);

/// Client for a fleet of cache hosts.
///
/// Safe for unbounded concurrent callers; a deployment normally holds a
/// single instance for its lifetime. Operations retry transport failures
/// indefinitely and surface `NoCacheHostsAvailable` once every bucket has
/// lost all of its members. Wrap any call in `tokio::time::timeout` to
/// impose a deadline.
pub struct CacheClient<S: CacheSerializer = BincodeSerializer> {
    table: Arc<RoutingTable>,
    serializer: S,
    subscribers: broadcast::Sender<CacheEvent>,
    pump_stop: mpsc::Sender<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
    discovery: Mutex<Option<HostDiscovery>>,
    shut_down: AtomicBool,
}

impl CacheClient<BincodeSerializer> {
    /// Connect with the default binary value codec
    pub async fn connect(
        settings: ClientSettings,
        factory: Arc<dyn HostTransportFactory>,
    ) -> Result<Self> {
        Self::connect_with_serializer(settings, factory, BincodeSerializer).await
    }
}

impl<S: CacheSerializer> CacheClient<S> {
    /// Connect to the configured fleet with a custom value codec.
    ///
    /// Builds one transport per configured host, assembles the routing
    /// table, starts the event pump, connects every host, then starts
    /// discovery if enabled. Hosts that refuse the initial connect stay
    /// in the table; their transports keep retrying on their own.
    pub async fn connect_with_serializer(
        settings: ClientSettings,
        factory: Arc<dyn HostTransportFactory>,
        serializer: S,
    ) -> Result<Self> {
        settings.validate()?;
        let options = settings.transport_options();

        let (host_events_tx, host_events_rx) = mpsc::channel(HOST_EVENT_CAPACITY);
        let mut connections = Vec::with_capacity(settings.cache_hosts.len());
        for endpoint in &settings.cache_hosts {
            let transport = factory.create(endpoint.clone(), &options, host_events_tx.clone());
            connections.push(HostConnection::new(transport));
        }

        let table = Arc::new(RoutingTable::assemble(
            connections.clone(),
            settings.host_redundancy_layers,
        ));
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        let (pump_stop, pump_stop_rx) = mpsc::channel(1);
        let pump = tokio::spawn(run_event_pump(
            Arc::clone(&table),
            subscribers.clone(),
            host_events_rx,
            pump_stop_rx,
        ));

        for connection in &connections {
            if let Err(error) = connection.connect().await {
                warn!(
                    endpoint = %connection.endpoint(),
                    %error,
                    "initial connect failed; transport keeps retrying"
                );
            }
        }

        let discovery = if settings.auto_detect_cache_hosts {
            let (group, port) = settings.multicast_group()?;
            Some(HostDiscovery::start(
                group,
                port,
                Arc::clone(&table),
                factory,
                options,
                host_events_tx,
            )?)
        } else {
            None
        };

        info!(
            hosts = settings.cache_hosts.len(),
            buckets = table.bucket_count(),
            "cache client connected"
        );

        Ok(Self {
            table,
            serializer,
            subscribers,
            pump_stop,
            pump: Mutex::new(Some(pump)),
            discovery: Mutex::new(discovery),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Subscribe to host and expiration events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.subscribers.subscribe()
    }

    /// The live routing table, for diagnostics
    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// Fetch one value. Returns `None` on a miss or when the stored
    /// bytes no longer deserialize (logged).
    pub async fn try_get<T: DeserializeOwned>(&self, cache_key: &str) -> Result<Option<T>> {
        ensure_not_blank(cache_key, "cache_key")?;
        let keys = [cache_key.to_string()];

        loop {
            let bucket = self.table.route(cache_key)?;
            let Some(connection) = bucket.next() else {
                self.pause_before_retry().await;
                continue;
            };
            match connection.get(&keys).await {
                Ok(values) => {
                    return Ok(values.first().and_then(|bytes| self.decode_or_default(bytes)))
                }
                Err(error) => {
                    warn!(%error, key = cache_key, "get failed; recomputing routing");
                    self.pause_before_retry().await;
                }
            }
        }
    }

    /// Fetch many values with one RPC per target bucket. Slots that miss
    /// or fail to deserialize come back as `None`; results are in bucket
    /// iteration order, not input order.
    pub async fn get_bulk<T: DeserializeOwned>(
        &self,
        cache_keys: &[String],
    ) -> Result<Vec<Option<T>>> {
        ensure_not_empty(cache_keys, "cache_keys")?;

        'attempt: loop {
            let groups = self.group_by_bucket(cache_keys.iter().map(|key| (key.clone(), key.clone())))?;
            let mut raw = Vec::with_capacity(cache_keys.len());
            for (bucket, keys) in groups {
                let Some(connection) = bucket.next() else {
                    self.pause_before_retry().await;
                    continue 'attempt;
                };
                match connection.get(&keys).await {
                    Ok(mut values) => raw.append(&mut values),
                    Err(error) => {
                        warn!(%error, "bulk get failed; recomputing routing");
                        self.pause_before_retry().await;
                        continue 'attempt;
                    }
                }
            }
            return Ok(raw
                .iter()
                .map(|bytes| self.decode_or_default(bytes))
                .collect());
        }
    }

    /// Fetch every value stored under a tag
    pub async fn get_tagged<T: DeserializeOwned>(
        &self,
        tag_name: &str,
        pattern: &str,
    ) -> Result<Vec<Option<T>>> {
        ensure_not_blank(tag_name, "tag_name")?;
        ensure_not_blank(pattern, "pattern")?;
        let tags = [tag_name.to_string()];

        loop {
            let bucket = self.table.route(tag_name)?;
            let Some(connection) = bucket.next() else {
                self.pause_before_retry().await;
                continue;
            };
            match connection.get_tagged(&tags, pattern).await {
                Ok(values) => {
                    return Ok(values
                        .iter()
                        .map(|bytes| self.decode_or_default(bytes))
                        .collect())
                }
                Err(error) => {
                    warn!(%error, tag = tag_name, "tagged get failed; recomputing routing");
                    self.pause_before_retry().await;
                }
            }
        }
    }

    /// Store one value on every replica of its bucket. A value that does
    /// not serialize fails immediately and is never retried.
    pub async fn add_or_update<T: Serialize>(
        &self,
        cache_key: &str,
        value: &T,
        policy: WritePolicy,
    ) -> Result<()> {
        ensure_not_blank(cache_key, "cache_key")?;
        let policy = policy.normalized();
        let payload = self.serializer.serialize(value)?;
        let routing = policy
            .tag_name
            .clone()
            .unwrap_or_else(|| cache_key.to_string());
        let entries = [(cache_key.to_string(), payload)];

        loop {
            let bucket = self.table.route(&routing)?;
            let outcome = bucket
                .for_each_online(|connection| {
                    let entries = &entries;
                    let policy = &policy;
                    async move { connection.add_or_update(entries, policy).await }
                })
                .await;
            match outcome {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(%error, key = cache_key, "write fan-out failed; recomputing routing");
                    self.pause_before_retry().await;
                }
            }
        }
    }

    /// Store many values, batched per target bucket. Entries that do not
    /// serialize are logged and skipped; the rest of the batch proceeds.
    pub async fn add_or_update_bulk<T: Serialize>(
        &self,
        entries: &[(String, T)],
        policy: WritePolicy,
    ) -> Result<()> {
        ensure_not_empty(entries, "entries")?;
        let policy = policy.normalized();

        let mut encoded = Vec::with_capacity(entries.len());
        for (cache_key, value) in entries {
            match self.serializer.serialize(value) {
                Ok(payload) => {
                    let routing = policy.tag_name.clone().unwrap_or_else(|| cache_key.clone());
                    encoded.push((routing, (cache_key.clone(), payload)));
                }
                Err(error) => {
                    warn!(%error, key = %cache_key, "skipping unserializable cache item")
                }
            }
        }
        if encoded.is_empty() {
            return Ok(());
        }

        loop {
            let groups = self
                .group_by_bucket(encoded.iter().map(|(routing, entry)| (routing.clone(), entry.clone())))?;
            let mut failed = false;
            for (bucket, batch) in groups {
                let outcome = bucket
                    .for_each_online(|connection| {
                        let batch = &batch;
                        let policy = &policy;
                        async move { connection.add_or_update(batch, policy).await }
                    })
                    .await;
                if let Err(error) = outcome {
                    warn!(%error, "bulk write fan-out failed; recomputing routing");
                    failed = true;
                    break;
                }
            }
            if !failed {
                return Ok(());
            }
            self.pause_before_retry().await;
        }
    }

    /// Remove one key from every replica of its bucket
    pub async fn remove(&self, cache_key: &str) -> Result<()> {
        ensure_not_blank(cache_key, "cache_key")?;
        let keys = [cache_key.to_string()];

        loop {
            let bucket = self.table.route(cache_key)?;
            let outcome = bucket
                .for_each_online(|connection| {
                    let keys = &keys;
                    async move { connection.remove(keys).await }
                })
                .await;
            match outcome {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(%error, key = cache_key, "remove fan-out failed; recomputing routing");
                    self.pause_before_retry().await;
                }
            }
        }
    }

    /// Remove many keys, batched per target bucket
    pub async fn remove_bulk(&self, cache_keys: &[String]) -> Result<()> {
        ensure_not_empty(cache_keys, "cache_keys")?;

        loop {
            let groups = self.group_by_bucket(cache_keys.iter().map(|key| (key.clone(), key.clone())))?;
            let mut failed = false;
            for (bucket, keys) in groups {
                let outcome = bucket
                    .for_each_online(|connection| {
                        let keys = &keys;
                        async move { connection.remove(keys).await }
                    })
                    .await;
                if let Err(error) = outcome {
                    warn!(%error, "bulk remove fan-out failed; recomputing routing");
                    failed = true;
                    break;
                }
            }
            if !failed {
                return Ok(());
            }
            self.pause_before_retry().await;
        }
    }

    /// Remove every key stored under a tag
    pub async fn remove_tagged(&self, tag_name: &str, pattern: &str) -> Result<()> {
        ensure_not_blank(tag_name, "tag_name")?;
        ensure_not_blank(pattern, "pattern")?;
        let tags = [tag_name.to_string()];

        loop {
            let bucket = self.table.route(tag_name)?;
            let outcome = bucket
                .for_each_online(|connection| {
                    let tags = &tags;
                    async move { connection.remove_tagged(tags, pattern).await }
                })
                .await;
            match outcome {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(%error, tag = tag_name, "tagged remove failed; recomputing routing");
                    self.pause_before_retry().await;
                }
            }
        }
    }

    /// Remove every key stored under any of the tags, batched per bucket
    pub async fn remove_tagged_bulk(&self, tag_names: &[String], pattern: &str) -> Result<()> {
        ensure_not_empty(tag_names, "tag_names")?;
        ensure_not_blank(pattern, "pattern")?;

        loop {
            let groups = self.group_by_bucket(tag_names.iter().map(|tag| (tag.clone(), tag.clone())))?;
            let mut failed = false;
            for (bucket, tags) in groups {
                let outcome = bucket
                    .for_each_online(|connection| {
                        let tags = &tags;
                        async move { connection.remove_tagged(tags, pattern).await }
                    })
                    .await;
                if let Err(error) = outcome {
                    warn!(%error, "bulk tagged remove failed; recomputing routing");
                    failed = true;
                    break;
                }
            }
            if !failed {
                return Ok(());
            }
            self.pause_before_retry().await;
        }
    }

    /// List keys matching the pattern across the whole fleet, asking one
    /// member of every serving bucket; shadowed buckets are skipped
    pub async fn get_cache_keys(&self, pattern: &str) -> Result<Vec<String>> {
        ensure_not_blank(pattern, "pattern")?;

        'attempt: loop {
            self.table.ensure_available()?;
            let mut keys = Vec::new();
            for bucket in self.table.buckets() {
                let Some(connection) = bucket.next() else {
                    continue;
                };
                match connection.get_cache_keys(pattern).await {
                    Ok(mut found) => keys.append(&mut found),
                    Err(error) => {
                        warn!(%error, "key listing failed; recomputing routing");
                        self.pause_before_retry().await;
                        continue 'attempt;
                    }
                }
            }
            return Ok(keys);
        }
    }

    /// List keys stored under a tag and matching the pattern
    pub async fn get_cache_keys_tagged(&self, tag_name: &str, pattern: &str) -> Result<Vec<String>> {
        ensure_not_blank(tag_name, "tag_name")?;
        let tags = [tag_name.to_string()];
        self.get_cache_keys_tagged_bulk(&tags, pattern).await
    }

    /// List keys stored under any of the tags, batched per bucket
    pub async fn get_cache_keys_tagged_bulk(
        &self,
        tag_names: &[String],
        pattern: &str,
    ) -> Result<Vec<String>> {
        ensure_not_empty(tag_names, "tag_names")?;
        ensure_not_blank(pattern, "pattern")?;

        'attempt: loop {
            let groups = self.group_by_bucket(tag_names.iter().map(|tag| (tag.clone(), tag.clone())))?;
            let mut keys = Vec::new();
            for (bucket, tags) in groups {
                let Some(connection) = bucket.next() else {
                    self.pause_before_retry().await;
                    continue 'attempt;
                };
                match connection.get_cache_keys_tagged(&tags, pattern).await {
                    Ok(mut found) => keys.append(&mut found),
                    Err(error) => {
                        warn!(%error, "tagged key listing failed; recomputing routing");
                        self.pause_before_retry().await;
                        continue 'attempt;
                    }
                }
            }
            return Ok(keys);
        }
    }

    /// Drop every item on every reachable replica in the fleet
    pub async fn clear(&self) -> Result<()> {
        loop {
            self.table.ensure_available()?;
            let mut failed = false;
            for bucket in self.table.buckets() {
                let outcome = bucket
                    .for_each_online(|connection| async move { connection.clear().await })
                    .await;
                if let Err(error) = outcome {
                    warn!(%error, "clear fan-out failed; recomputing routing");
                    failed = true;
                    break;
                }
            }
            if !failed {
                return Ok(());
            }
            self.pause_before_retry().await;
        }
    }

    /// Disconnect every host, stop discovery and the event pump.
    ///
    /// Repeated calls are no-ops. Disconnect failures are logged and
    /// skipped so shutdown always terminates; in-flight operations may
    /// observe transport failures as the connections close.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down cache client");

        let discovery = self.discovery.lock().take();
        if let Some(discovery) = discovery {
            discovery.stop().await;
        }

        for bucket in self.table.buckets() {
            for connection in bucket.members_snapshot() {
                if let Err(error) = connection.disconnect().await {
                    debug!(
                        endpoint = %connection.endpoint(),
                        %error,
                        "disconnect during shutdown failed"
                    );
                }
            }
        }

        let _ = self.pump_stop.send(()).await;
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
    }

    /// Group `(routing string, payload)` pairs by target bucket,
    /// preserving first-seen bucket order
    fn group_by_bucket<P>(
        &self,
        items: impl Iterator<Item = (String, P)>,
    ) -> Result<Vec<(Arc<RedundancyBucket>, Vec<P>)>> {
        let mut groups: Vec<(usize, Arc<RedundancyBucket>, Vec<P>)> = Vec::new();

        for (routing, payload) in items {
            let (index, bucket) = self.table.route_entry(&routing)?;
            match groups.iter_mut().find(|(existing, _, _)| *existing == index) {
                Some((_, _, payloads)) => payloads.push(payload),
                None => groups.push((index, bucket, vec![payload])),
            }
        }

        Ok(groups
            .into_iter()
            .map(|(_, bucket, payloads)| (bucket, payloads))
            .collect())
    }

    fn decode_or_default<T: DeserializeOwned>(&self, bytes: &[u8]) -> Option<T> {
        match self.serializer.deserialize(bytes) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%error, "discarding cache value that no longer deserializes");
                None
            }
        }
    }

    async fn pause_before_retry(&self) {
        tokio::time::sleep(TRANSPORT_RETRY_PAUSE).await;
    }
}

fn ensure_not_blank(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CacheError::InvalidArgument(format!(
            "{} must not be blank",
            name
        )));
    }
    Ok(())
}

fn ensure_not_empty<T>(items: &[T], name: &str) -> Result<()> {
    if items.is_empty() {
        return Err(CacheError::InvalidArgument(format!(
            "{} must not be empty",
            name
        )));
    }
    Ok(())
}

/// Pump host events into routing-table transitions and subscriber
/// notifications. Runs on its own task; the transports never touch the
/// table directly, so no transport callback can hold the write lock.
async fn run_event_pump(
    table: Arc<RoutingTable>,
    subscribers: broadcast::Sender<CacheEvent>,
    mut host_events: mpsc::Receiver<HostEvent>,
    mut stop: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = stop.recv() => break,

            event = host_events.recv() => {
                let Some(event) = event else { break };
                match event {
                    HostEvent::Disconnected(endpoint) => {
                        if table.on_disconnected(&endpoint) {
                            warn!(%endpoint, "cache host went offline");
                            let _ = subscribers.send(CacheEvent::HostDisconnected(endpoint));
                        }
                    }
                    HostEvent::Reconnected(endpoint) => {
                        if table.on_reconnected(&endpoint) {
                            info!(%endpoint, "cache host back online");
                            let _ = subscribers.send(CacheEvent::HostReconnected(endpoint));
                        }
                    }
                    HostEvent::MessageReceived { endpoint, payload } => {
                        invalidation::dispatch(&endpoint, &payload, &subscribers);
                    }
                }
            }
        }
    }
}
