// Shared in-memory host fleet for the integration suites
//
// Each mock host keeps its own store and tag index, can be told to fail
// its next N calls, and can emit the same events a real transport would.

#![allow(dead_code)]

use async_trait::async_trait;
use dache_client::{
    CacheError, CacheEvent, ClientSettings, HostEndpoint, HostEvent, HostTransport,
    HostTransportFactory, Result, TransportOptions, WritePolicy,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub struct MockHost {
    endpoint: HostEndpoint,
    store: Mutex<HashMap<String, Vec<u8>>>,
    tags: Mutex<HashMap<String, BTreeSet<String>>>,
    last_policy: Mutex<Option<WritePolicy>>,
    connected: AtomicBool,
    fail_remaining: AtomicUsize,
    events: mpsc::Sender<HostEvent>,
}

impl MockHost {
    fn new(endpoint: HostEndpoint, events: mpsc::Sender<HostEvent>) -> Self {
        Self {
            endpoint,
            store: Mutex::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            last_policy: Mutex::new(None),
            connected: AtomicBool::new(false),
            fail_remaining: AtomicUsize::new(0),
            events,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.store.lock().contains_key(key)
    }

    pub fn stored_key_count(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn last_policy(&self) -> Option<WritePolicy> {
        self.last_policy.lock().clone()
    }

    /// Make the next `calls` RPCs fail with a transport error
    pub fn fail_next(&self, calls: usize) {
        self.fail_remaining.store(calls, Ordering::SeqCst);
    }

    pub async fn emit_disconnected(&self) {
        let _ = self
            .events
            .send(HostEvent::Disconnected(self.endpoint.clone()))
            .await;
    }

    pub async fn emit_reconnected(&self) {
        let _ = self
            .events
            .send(HostEvent::Reconnected(self.endpoint.clone()))
            .await;
    }

    pub async fn push_message(&self, payload: Vec<u8>) {
        let _ = self
            .events
            .send(HostEvent::MessageReceived {
                endpoint: self.endpoint.clone(),
                payload,
            })
            .await;
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(CacheError::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    fn keys_under_tags(&self, tags: &[String]) -> Vec<String> {
        let index = self.tags.lock();
        let mut keys = BTreeSet::new();
        for tag in tags {
            if let Some(tagged) = index.get(tag) {
                keys.extend(tagged.iter().cloned());
            }
        }
        keys.into_iter().collect()
    }
}

#[async_trait]
impl HostTransport for MockHost {
    fn endpoint(&self) -> &HostEndpoint {
        &self.endpoint
    }

    async fn connect(&self) -> Result<()> {
        self.check_failure()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, keys: &[String]) -> Result<Vec<Vec<u8>>> {
        self.check_failure()?;
        let store = self.store.lock();
        Ok(keys.iter().filter_map(|key| store.get(key).cloned()).collect())
    }

    async fn add_or_update(
        &self,
        entries: &[(String, Vec<u8>)],
        policy: &WritePolicy,
    ) -> Result<()> {
        self.check_failure()?;
        let mut store = self.store.lock();
        for (key, value) in entries {
            store.insert(key.clone(), value.clone());
            if let Some(tag) = &policy.tag_name {
                self.tags
                    .lock()
                    .entry(tag.clone())
                    .or_default()
                    .insert(key.clone());
            }
        }
        *self.last_policy.lock() = Some(policy.clone());
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        self.check_failure()?;
        let mut store = self.store.lock();
        for key in keys {
            store.remove(key);
        }
        Ok(())
    }

    async fn get_tagged(&self, tags: &[String], _pattern: &str) -> Result<Vec<Vec<u8>>> {
        self.check_failure()?;
        let keys = self.keys_under_tags(tags);
        let store = self.store.lock();
        Ok(keys.iter().filter_map(|key| store.get(key).cloned()).collect())
    }

    async fn remove_tagged(&self, tags: &[String], _pattern: &str) -> Result<()> {
        self.check_failure()?;
        let keys = self.keys_under_tags(tags);
        let mut store = self.store.lock();
        for key in &keys {
            store.remove(key);
        }
        let mut index = self.tags.lock();
        for tag in tags {
            index.remove(tag);
        }
        Ok(())
    }

    async fn get_cache_keys(&self, _pattern: &str) -> Result<Vec<String>> {
        self.check_failure()?;
        let mut keys: Vec<String> = self.store.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_cache_keys_tagged(&self, tags: &[String], _pattern: &str) -> Result<Vec<String>> {
        self.check_failure()?;
        let store = self.store.lock();
        Ok(self
            .keys_under_tags(tags)
            .into_iter()
            .filter(|key| store.contains_key(key))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.check_failure()?;
        self.store.lock().clear();
        self.tags.lock().clear();
        Ok(())
    }
}

/// Factory that records every host it builds so tests can reach in
#[derive(Default)]
pub struct MockFleet {
    hosts: Mutex<HashMap<HostEndpoint, Arc<MockHost>>>,
}

impl MockFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn host(&self, address: &str, port: u16) -> Arc<MockHost> {
        self.hosts
            .lock()
            .get(&HostEndpoint::new(address, port))
            .cloned()
            .expect("host was never created by the factory")
    }
}

impl HostTransportFactory for MockFleet {
    fn create(
        &self,
        endpoint: HostEndpoint,
        _options: &TransportOptions,
        events: mpsc::Sender<HostEvent>,
    ) -> Arc<dyn HostTransport> {
        let host = Arc::new(MockHost::new(endpoint.clone(), events));
        self.hosts.lock().insert(endpoint, host.clone());
        host
    }
}

pub fn settings(hosts: &[(&str, u16)], redundancy_layers: usize) -> ClientSettings {
    ClientSettings {
        cache_hosts: hosts
            .iter()
            .map(|(address, port)| HostEndpoint::new(*address, *port))
            .collect(),
        host_redundancy_layers: redundancy_layers,
        ..ClientSettings::default()
    }
}

/// Wait for the next client event, failing the test after two seconds
pub async fn next_event(events: &mut broadcast::Receiver<CacheEvent>) -> CacheEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a cache event")
        .expect("event channel closed")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
