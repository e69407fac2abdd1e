//! In-process discovery bus.
//!
//! Every `Integra` instance built with a clone of the same `MemoryDiscovery`
//! sees the others' announcements, as if they shared a network segment. The
//! bus remembers when each record was last announced and only answers queries
//! with records whose TTL has not elapsed, using tokio's clock so tests can
//! drive expiry with paused time.

use super::{Discovery, DiscoveryEvent, ServiceRecord};
use crate::config::DiscoveryConfig;
use crate::registry::ServiceName;
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

type RecordKey = (ServiceName, String);

struct Bus {
    records: Mutex<HashMap<RecordKey, (ServiceRecord, Instant)>>,
    events: broadcast::Sender<DiscoveryEvent>,
    drop_withdrawals: AtomicBool,
}

/// Shared in-memory discovery backend. Clones share one bus.
#[derive(Clone)]
pub struct MemoryDiscovery {
    bus: Arc<Bus>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(DiscoveryConfig::EVENT_CHANNEL_CAPACITY);
        Self {
            bus: Arc::new(Bus {
                records: Mutex::new(HashMap::new()),
                events,
                drop_withdrawals: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate lost withdrawal packets: withdrawals are silently dropped and
    /// records linger until their TTL runs out.
    pub fn set_drop_withdrawals(&self, drop: bool) {
        self.bus.drop_withdrawals.store(drop, Ordering::SeqCst);
    }

    fn records(&self) -> MutexGuard<'_, HashMap<RecordKey, (ServiceRecord, Instant)>> {
        self.bus
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: DiscoveryEvent) {
        // No subscribers is fine: nobody is listening yet.
        let _ = self.bus.events.send(event);
    }

    /// Records that are still within their TTL.
    pub fn live_records(&self) -> Vec<ServiceRecord> {
        let now = Instant::now();
        let mut records = self.records();
        records.retain(|_, (record, seen)| now < *seen + record.ttl());
        records.values().map(|(record, _)| record.clone()).collect()
    }
}

impl Default for MemoryDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Discovery for MemoryDiscovery {
    async fn announce(&self, record: &ServiceRecord) -> Result<()> {
        self.records().insert(
            (record.name.clone(), record.node.clone()),
            (record.clone(), Instant::now()),
        );
        self.publish(DiscoveryEvent::Announced(record.clone()));
        Ok(())
    }

    async fn withdraw(&self, record: &ServiceRecord) -> Result<()> {
        if self.bus.drop_withdrawals.load(Ordering::SeqCst) {
            debug!("Dropping withdrawal of '{}'", record.name);
            return Ok(());
        }
        self.records()
            .remove(&(record.name.clone(), record.node.clone()));
        self.publish(DiscoveryEvent::Withdrawn {
            name: record.name.clone(),
            node: record.node.clone(),
        });
        Ok(())
    }

    async fn query(&self, name: &ServiceName) -> Result<()> {
        for record in self.live_records() {
            if &record.name == name {
                self.publish(DiscoveryEvent::Announced(record));
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.bus.events.subscribe()
    }
}
