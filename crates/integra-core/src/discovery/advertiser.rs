//! Periodic announcement of locally registered names.
//!
//! Each advertised name gets its own refresh task that re-announces the
//! record well before its TTL runs out. Refresh delays are shortened by a
//! small random amount so a room full of processes started together does not
//! announce in lockstep.

use super::{Discovery, ServiceRecord};
use crate::config::{DiscoveryConfig, IntegraConfig};
use crate::registry::ServiceName;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keeps service records of local names alive on the discovery layer.
pub struct Advertiser {
    backend: Arc<dyn Discovery>,
    node: String,
    advertised: SocketAddr,
    record_ttl: Duration,
    refresh_interval: Duration,
    tasks: Mutex<HashMap<ServiceName, JoinHandle<()>>>,
}

impl Advertiser {
    pub fn new(
        backend: Arc<dyn Discovery>,
        node: impl Into<String>,
        advertised: SocketAddr,
        config: &IntegraConfig,
    ) -> Self {
        Self {
            backend,
            node: node.into(),
            advertised,
            record_ttl: config.record_ttl,
            refresh_interval: config.refresh_interval,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<ServiceName, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The record this process advertises for `name`.
    pub fn record_for(&self, name: &ServiceName) -> ServiceRecord {
        ServiceRecord {
            name: name.clone(),
            node: self.node.clone(),
            host: self.advertised.ip(),
            port: self.advertised.port(),
            ttl_secs: self.record_ttl.as_secs().min(u32::MAX as u64) as u32,
            proto: DiscoveryConfig::PROTOCOL_VERSION,
        }
    }

    /// Start advertising `name`. The first announcement goes out immediately.
    ///
    /// Restarting an already advertised name replaces its refresh task.
    pub fn start(&self, name: &ServiceName) {
        let record = self.record_for(name);
        let backend = self.backend.clone();
        let interval = self.refresh_interval;

        let task = tokio::spawn(async move {
            loop {
                if let Err(e) = backend.announce(&record).await {
                    warn!("Failed to announce '{}': {}", record.name, e);
                }
                tokio::time::sleep(jittered(interval)).await;
            }
        });

        if let Some(previous) = self.tasks().insert(name.clone(), task) {
            previous.abort();
        }
        info!("Advertising '{}' at {}", name, self.advertised);
    }

    /// Stop advertising `name` and publish a best-effort withdrawal.
    ///
    /// Returns false if `name` was not being advertised.
    pub async fn stop(&self, name: &ServiceName) -> bool {
        let task = self.tasks().remove(name);
        let Some(task) = task else {
            return false;
        };
        task.abort();

        let record = self.record_for(name);
        if let Err(e) = self.backend.withdraw(&record).await {
            // Peers fall back to TTL expiry.
            warn!("Failed to withdraw '{}': {}", name, e);
        }
        debug!("Stopped advertising '{}'", name);
        true
    }

    pub fn is_advertising(&self, name: &ServiceName) -> bool {
        self.tasks().contains_key(name)
    }

    /// Names with a running refresh task, sorted.
    pub fn advertised_names(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> = self.tasks().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop advertising every name.
    pub async fn stop_all(&self) {
        for name in self.advertised_names() {
            self.stop(&name).await;
        }
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        for (_, task) in self.tasks().drain() {
            task.abort();
        }
    }
}

/// Refresh delay shortened by up to [`DiscoveryConfig::REFRESH_JITTER`].
fn jittered(interval: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor = 1.0 - rng.random_range(0.0..=DiscoveryConfig::REFRESH_JITTER);
    interval.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryEvent, MemoryDiscovery};

    fn config() -> IntegraConfig {
        IntegraConfig::new()
            .with_record_ttl(Duration::from_secs(6))
            .with_refresh_interval(Duration::from_secs(2))
    }

    fn advertiser(bus: &MemoryDiscovery) -> Advertiser {
        Advertiser::new(
            Arc::new(bus.clone()),
            "node-a",
            "192.168.1.5:7000".parse().unwrap(),
            &config(),
        )
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let interval = Duration::from_secs(10);
        for _ in 0..100 {
            let delay = jittered(interval);
            assert!(delay <= interval);
            assert!(delay >= interval.mul_f64(1.0 - DiscoveryConfig::REFRESH_JITTER));
        }
    }

    #[test]
    fn test_record_for_uses_advertised_address() {
        let bus = MemoryDiscovery::new();
        let record = advertiser(&bus).record_for(&ServiceName::new("calc").unwrap());
        assert_eq!(record.socket_addr().to_string(), "192.168.1.5:7000");
        assert_eq!(record.node, "node-a");
        assert_eq!(record.ttl_secs, 6);
        assert!(record.is_compatible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_announces_and_refreshes() {
        let bus = MemoryDiscovery::new();
        let mut events = bus.subscribe();
        let advertiser = advertiser(&bus);
        let name = ServiceName::new("calc").unwrap();

        advertiser.start(&name);
        assert!(advertiser.is_advertising(&name));
        assert!(matches!(events.recv().await.unwrap(), DiscoveryEvent::Announced(_)));

        // Long past the TTL, the record is still live thanks to refreshes.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(bus.live_records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_withdraws() {
        let bus = MemoryDiscovery::new();
        let advertiser = advertiser(&bus);
        let name = ServiceName::new("calc").unwrap();

        advertiser.start(&name);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bus.live_records().len(), 1);

        assert!(advertiser.stop(&name).await);
        assert!(!advertiser.is_advertising(&name));
        assert!(bus.live_records().is_empty());
        assert!(!advertiser.stop(&name).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_withdrawal_expires_after_ttl() {
        let bus = MemoryDiscovery::new();
        bus.set_drop_withdrawals(true);
        let advertiser = advertiser(&bus);
        let name = ServiceName::new("calc").unwrap();

        advertiser.start(&name);
        tokio::time::sleep(Duration::from_millis(10)).await;
        advertiser.stop(&name).await;
        assert_eq!(bus.live_records().len(), 1);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(bus.live_records().is_empty());
    }

    #[tokio::test]
    async fn test_stop_all() {
        let bus = MemoryDiscovery::new();
        let advertiser = advertiser(&bus);
        advertiser.start(&ServiceName::new("a").unwrap());
        advertiser.start(&ServiceName::new("b").unwrap());
        assert_eq!(advertiser.advertised_names().len(), 2);

        advertiser.stop_all().await;
        assert!(advertiser.advertised_names().is_empty());
    }
}
