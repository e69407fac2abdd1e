//! Name resolution.
//!
//! Resolution order:
//! 1. the local registry (same-process calls never touch the network)
//! 2. the record cache, fed by a background listener on discovery events
//! 3. an active query, waiting a bounded time for an answer
//!
//! Cached records expire `ttl` after they were last announced. A withdrawal
//! removes a record early, but only expiry is relied upon.

use super::{Discovery, DiscoveryEvent, ServiceRecord};
use crate::endpoint::Endpoint;
use crate::error::{IntegraError, Result};
use crate::registry::{Registry, ServiceName};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

struct CachedRecord {
    record: ServiceRecord,
    expires_at: Instant,
}

/// Records heard from the discovery layer, one per name.
///
/// When several nodes advertise the same name the latest announcement wins.
#[derive(Default)]
struct RecordCache {
    records: RwLock<HashMap<ServiceName, CachedRecord>>,
}

impl RecordCache {
    fn insert(&self, record: ServiceRecord) {
        let expires_at = Instant::now() + record.ttl();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.name.clone(), CachedRecord { record, expires_at });
    }

    fn fresh(&self, name: &ServiceName) -> Option<ServiceRecord> {
        let now = Instant::now();
        {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            match records.get(name) {
                Some(cached) if now < cached.expires_at => return Some(cached.record.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        debug!("Cached record for '{}' expired", name);
        self.remove(name);
        None
    }

    fn remove(&self, name: &ServiceName) -> Option<ServiceRecord> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .map(|cached| cached.record)
    }

    /// Remove `name` only if it is still the record advertised by `node`.
    fn withdraw(&self, name: &ServiceName, node: &str) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.get(name).is_some_and(|c| c.record.node == node) {
            records.remove(name);
            debug!("'{}' withdrawn by {}", name, node);
        }
    }

    fn live(&self) -> Vec<ServiceRecord> {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.retain(|_, cached| now < cached.expires_at);
        let mut live: Vec<ServiceRecord> = records.values().map(|c| c.record.clone()).collect();
        live.sort_by(|a, b| a.name.cmp(&b.name));
        live
    }
}

/// Turns service names into endpoints.
pub struct Resolver {
    backend: Arc<dyn Discovery>,
    registry: Registry,
    node: String,
    resolve_timeout: Duration,
    cache: Arc<RecordCache>,
    listener: JoinHandle<()>,
}

impl Resolver {
    /// Create a resolver and start listening for discovery events.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        backend: Arc<dyn Discovery>,
        registry: Registry,
        node: impl Into<String>,
        resolve_timeout: Duration,
    ) -> Self {
        let node = node.into();
        let cache = Arc::new(RecordCache::default());
        let listener = tokio::spawn(Self::listen(backend.subscribe(), cache.clone(), node.clone()));

        Self {
            backend,
            registry,
            node,
            resolve_timeout,
            cache,
            listener,
        }
    }

    async fn listen(
        mut events: tokio::sync::broadcast::Receiver<DiscoveryEvent>,
        cache: Arc<RecordCache>,
        node: String,
    ) {
        loop {
            match events.recv().await {
                Ok(DiscoveryEvent::Announced(record)) => {
                    if accepts(&node, &record) {
                        cache.insert(record);
                    }
                }
                Ok(DiscoveryEvent::Withdrawn { name, node: from }) => {
                    if from != node {
                        cache.withdraw(&name, &from);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Discovery listener lagged, missed {} events", missed);
                }
                Err(RecvError::Closed) => {
                    debug!("Discovery event channel closed");
                    break;
                }
            }
        }
    }

    /// Resolve `name`, waiting up to the configured resolve timeout.
    pub async fn resolve(&self, name: &ServiceName) -> Result<Endpoint> {
        self.resolve_within(name, self.resolve_timeout).await
    }

    /// Resolve `name`, waiting up to `wait` for a discovery answer.
    pub async fn resolve_within(&self, name: &ServiceName, wait: Duration) -> Result<Endpoint> {
        if let Some(endpoint) = self.resolve_cached(name) {
            return Ok(endpoint);
        }

        // Subscribe before querying so the answer cannot slip past.
        let mut events = self.backend.subscribe();
        self.backend.query(name).await?;

        let deadline = Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Err(_) => break,
                Ok(Ok(DiscoveryEvent::Announced(record))) => {
                    if &record.name == name && accepts(&self.node, &record) {
                        debug!("Resolved '{}' to {}", name, record.socket_addr());
                        self.cache.insert(record.clone());
                        return Ok(Endpoint::Remote(record));
                    }
                }
                Ok(Ok(DiscoveryEvent::Withdrawn { .. })) => {}
                Ok(Err(RecvError::Lagged(_))) => {
                    // The listener saw what we missed.
                    if let Some(record) = self.cache.fresh(name) {
                        return Ok(Endpoint::Remote(record));
                    }
                }
                Ok(Err(RecvError::Closed)) => break,
            }
        }

        // Registered locally or announced while we were waiting.
        self.resolve_cached(name)
            .ok_or_else(|| IntegraError::ServiceUnavailable {
                name: name.to_string(),
            })
    }

    /// Resolve without touching the network.
    pub fn resolve_cached(&self, name: &ServiceName) -> Option<Endpoint> {
        if let Some(handler) = self.registry.get(name) {
            return Some(Endpoint::Local {
                name: name.clone(),
                handler,
            });
        }
        self.cache.fresh(name).map(Endpoint::Remote)
    }

    /// Forget the cached record for `name`; the next resolve queries again.
    pub fn evict(&self, name: &ServiceName) -> Option<ServiceRecord> {
        self.backend.forget(name);
        self.cache.remove(name)
    }

    /// Unexpired records of remote names, sorted by name.
    pub fn known_records(&self) -> Vec<ServiceRecord> {
        self.cache.live()
    }

    pub fn resolve_timeout(&self) -> Duration {
        self.resolve_timeout
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Whether a record from the discovery layer is usable by `node`.
fn accepts(node: &str, record: &ServiceRecord) -> bool {
    if record.node == node {
        return false;
    }
    if !record.is_compatible() {
        debug!(
            "Ignoring '{}' from {}: protocol {} unsupported",
            record.name, record.node, record.proto
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::discovery::MemoryDiscovery;
    use crate::handler::MethodTable;

    fn record(name: &str, node: &str, ttl_secs: u32) -> ServiceRecord {
        ServiceRecord {
            name: ServiceName::new(name).unwrap(),
            node: node.into(),
            host: "192.168.1.9".parse().unwrap(),
            port: 6000,
            ttl_secs,
            proto: DiscoveryConfig::PROTOCOL_VERSION,
        }
    }

    fn resolver(bus: &MemoryDiscovery, registry: Registry) -> Resolver {
        Resolver::new(
            Arc::new(bus.clone()),
            registry,
            "self",
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_local_registry_wins() {
        let bus = MemoryDiscovery::new();
        let registry = Registry::new();
        let name = ServiceName::new("calc").unwrap();
        registry
            .insert(name.clone(), Arc::new(MethodTable::new("calc")))
            .unwrap();
        bus.announce(&record("calc", "other", 60)).await.unwrap();

        let endpoint = resolver(&bus, registry).resolve(&name).await.unwrap();
        assert!(endpoint.is_local());
    }

    #[tokio::test]
    async fn test_resolves_announced_record() {
        let bus = MemoryDiscovery::new();
        bus.announce(&record("calc", "other", 60)).await.unwrap();
        let resolver = resolver(&bus, Registry::new());

        let endpoint = resolver
            .resolve(&ServiceName::new("calc").unwrap())
            .await
            .unwrap();
        match endpoint {
            Endpoint::Remote(r) => assert_eq!(r.port, 6000),
            other => panic!("Expected Remote, got: {:?}", other),
        }
        assert_eq!(resolver.known_records().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_name_is_unavailable() {
        let bus = MemoryDiscovery::new();
        let err = resolver(&bus, Registry::new())
            .resolve(&ServiceName::new("ghost").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, IntegraError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_ignores_own_and_incompatible_records() {
        let bus = MemoryDiscovery::new();
        bus.announce(&record("mine", "self", 60)).await.unwrap();
        let mut future = record("newer", "other", 60);
        future.proto = DiscoveryConfig::PROTOCOL_VERSION + 1;
        bus.announce(&future).await.unwrap();
        let resolver = resolver(&bus, Registry::new());

        for name in ["mine", "newer"] {
            let err = resolver
                .resolve(&ServiceName::new(name).unwrap())
                .await
                .unwrap_err();
            assert!(matches!(err, IntegraError::ServiceUnavailable { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_record_expires() {
        let bus = MemoryDiscovery::new();
        let resolver = resolver(&bus, Registry::new());
        let name = ServiceName::new("calc").unwrap();

        bus.announce(&record("calc", "other", 2)).await.unwrap();
        assert!(resolver.resolve(&name).await.is_ok());
        assert!(resolver.resolve_cached(&name).is_some());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(resolver.resolve_cached(&name).is_none());
        assert!(resolver.resolve(&name).await.is_err());
    }

    #[tokio::test]
    async fn test_withdrawal_only_affects_its_node() {
        let bus = MemoryDiscovery::new();
        let resolver = resolver(&bus, Registry::new());
        let name = ServiceName::new("calc").unwrap();

        bus.announce(&record("calc", "b", 60)).await.unwrap();
        assert!(resolver.resolve(&name).await.is_ok());

        // A stale withdrawal from a previous owner leaves the record alone.
        let cache_len = resolver.known_records().len();
        bus.withdraw(&record("calc", "a", 60)).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(resolver.known_records().len(), cache_len);

        bus.withdraw(&record("calc", "b", 60)).await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(resolver.resolve_cached(&name).is_none());
    }

    #[tokio::test]
    async fn test_evict_forgets_record() {
        let bus = MemoryDiscovery::new();
        let resolver = resolver(&bus, Registry::new());
        let name = ServiceName::new("calc").unwrap();
        bus.announce(&record("calc", "other", 60)).await.unwrap();
        resolver.resolve(&name).await.unwrap();

        assert!(resolver.evict(&name).is_some());
        assert!(resolver.resolve_cached(&name).is_none());
    }

    /// Memory bus that remembers which names it was told to forget.
    #[derive(Default)]
    struct RecordingBus {
        bus: MemoryDiscovery,
        forgotten: std::sync::Mutex<Vec<ServiceName>>,
    }

    #[async_trait::async_trait]
    impl Discovery for RecordingBus {
        async fn announce(&self, record: &ServiceRecord) -> Result<()> {
            self.bus.announce(record).await
        }

        async fn withdraw(&self, record: &ServiceRecord) -> Result<()> {
            self.bus.withdraw(record).await
        }

        async fn query(&self, name: &ServiceName) -> Result<()> {
            self.bus.query(name).await
        }

        fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DiscoveryEvent> {
            self.bus.subscribe()
        }

        fn forget(&self, name: &ServiceName) {
            self.forgotten.lock().unwrap().push(name.clone());
        }
    }

    #[tokio::test]
    async fn test_evict_tells_backend_to_forget() {
        let backend = Arc::new(RecordingBus::default());
        let resolver = Resolver::new(
            backend.clone(),
            Registry::new(),
            "self",
            Duration::from_millis(200),
        );
        let name = ServiceName::new("calc").unwrap();
        backend.announce(&record("calc", "other", 60)).await.unwrap();
        resolver.resolve(&name).await.unwrap();

        resolver.evict(&name);
        assert_eq!(*backend.forgotten.lock().unwrap(), vec![name]);
    }
}
