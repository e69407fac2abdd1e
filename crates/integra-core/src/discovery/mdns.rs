//! DNS-SD discovery over multicast DNS.
//!
//! Each advertised name is one DNS-SD instance of
//! [`DiscoveryConfig::SERVICE_TYPE`], named `<service>-<node prefix>`, with
//! the record fields in TXT properties:
//!
//! | key     | value                         |
//! |---------|-------------------------------|
//! | `name`  | service name                  |
//! | `node`  | advertising process id        |
//! | `proto` | call protocol version         |
//! | `ttl`   | record lifetime in seconds    |
//! | `seq`   | announcement counter          |
//!
//! `seq` changes on every announce, so peers see each refresh as an updated
//! instance and resolve it again.
//!
//! The daemon browses the service type for as long as the backend lives.
//! Resolved records are remembered with the time they were last heard.
//! Queries replay the ones heard within their `ttl`; older ones are dropped,
//! as are records the daemon reports removed.

use super::address::host_name;
use super::{Discovery, DiscoveryEvent, ServiceRecord};
use crate::config::DiscoveryConfig;
use crate::registry::ServiceName;
use crate::Result;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct HeardRecord {
    record: ServiceRecord,
    last_seen: Instant,
}

type KnownRecords = Arc<Mutex<HashMap<String, HeardRecord>>>;

/// Discovery backend built on the `mdns-sd` daemon.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    events: broadcast::Sender<DiscoveryEvent>,
    /// Live records keyed by DNS-SD full name.
    known: KnownRecords,
    host_name: String,
    /// Bumped on every announce and published as the `seq` TXT property.
    seq: AtomicU64,
    browse_task: JoinHandle<()>,
}

impl MdnsDiscovery {
    /// Start the mDNS daemon and begin browsing for Integra services.
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()?;
        let receiver = daemon.browse(DiscoveryConfig::SERVICE_TYPE)?;
        let (events, _) = broadcast::channel(DiscoveryConfig::EVENT_CHANNEL_CAPACITY);
        let known: KnownRecords = Arc::new(Mutex::new(HashMap::new()));

        let browse_task = {
            let events = events.clone();
            let known = known.clone();
            tokio::spawn(async move {
                while let Ok(event) = receiver.recv_async().await {
                    Self::handle_event(event, &events, &known);
                }
                debug!("mDNS browse channel closed");
            })
        };

        let host_name = format!("{}.local.", host_name());
        info!(
            "mDNS discovery started for {} as {}",
            DiscoveryConfig::SERVICE_TYPE,
            host_name
        );

        Ok(Self {
            daemon,
            events,
            known,
            host_name,
            seq: AtomicU64::new(0),
            browse_task,
        })
    }

    fn handle_event(
        event: ServiceEvent,
        events: &broadcast::Sender<DiscoveryEvent>,
        known: &KnownRecords,
    ) {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let host = preferred_address(info.get_addresses().iter().copied());
                let record = parse_record(
                    |key| info.get_property_val_str(key).map(str::to_string),
                    host,
                    info.get_port(),
                );
                match record {
                    Some(record) => {
                        debug!("mDNS resolved '{}' at {}", record.name, record.socket_addr());
                        lock(known).insert(
                            info.get_fullname().to_string(),
                            HeardRecord {
                                record: record.clone(),
                                last_seen: Instant::now(),
                            },
                        );
                        let _ = events.send(DiscoveryEvent::Announced(record));
                    }
                    None => debug!("Ignoring malformed mDNS record {}", info.get_fullname()),
                }
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                let removed = lock(known).remove(&fullname);
                if let Some(HeardRecord { record, .. }) = removed {
                    debug!("mDNS removed '{}'", record.name);
                    let _ = events.send(DiscoveryEvent::Withdrawn {
                        name: record.name,
                        node: record.node,
                    });
                }
            }
            other => debug!("mDNS event: {:?}", other),
        }
    }

    fn fullname(record: &ServiceRecord) -> String {
        format!("{}.{}", instance_name(record), DiscoveryConfig::SERVICE_TYPE)
    }
}

fn lock(known: &KnownRecords) -> MutexGuard<'_, HashMap<String, HeardRecord>> {
    known.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records of `name` heard within their ttl as of `now`.
///
/// Expired entries of any name are dropped from `known`.
fn live_records(
    known: &mut HashMap<String, HeardRecord>,
    name: &ServiceName,
    now: Instant,
) -> Vec<ServiceRecord> {
    known.retain(|fullname, heard| {
        let live = now < heard.last_seen + heard.record.ttl();
        if !live {
            debug!("mDNS record {} not refreshed within its ttl", fullname);
        }
        live
    });
    known
        .values()
        .filter(|heard| &heard.record.name == name)
        .map(|heard| heard.record.clone())
        .collect()
}

/// DNS-SD instance label for a record.
pub fn instance_name(record: &ServiceRecord) -> String {
    let prefix: String = record.node.chars().take(8).collect();
    format!("{}-{}", record.name, prefix)
}

/// TXT properties describing a record, announced for the `seq`th time.
pub fn txt_properties(record: &ServiceRecord, seq: u64) -> HashMap<String, String> {
    HashMap::from([
        ("name".to_string(), record.name.to_string()),
        ("node".to_string(), record.node.clone()),
        ("proto".to_string(), record.proto.to_string()),
        ("ttl".to_string(), record.ttl_secs.to_string()),
        ("seq".to_string(), seq.to_string()),
    ])
}

/// Rebuild a record from TXT properties and the resolved address.
///
/// Returns `None` if any field is missing or malformed.
pub fn parse_record(
    property: impl Fn(&str) -> Option<String>,
    host: Option<IpAddr>,
    port: u16,
) -> Option<ServiceRecord> {
    Some(ServiceRecord {
        name: ServiceName::new(property("name")?).ok()?,
        node: property("node")?,
        host: host?,
        port,
        ttl_secs: property("ttl")?.parse().ok()?,
        proto: property("proto")?.parse().ok()?,
    })
}

/// Prefer IPv4 addresses, which every peer can reach on a LAN segment.
fn preferred_address(addrs: impl Iterator<Item = IpAddr>) -> Option<IpAddr> {
    let addrs: Vec<IpAddr> = addrs.collect();
    addrs
        .iter()
        .copied()
        .find(IpAddr::is_ipv4)
        .or_else(|| addrs.first().copied())
}

#[async_trait::async_trait]
impl Discovery for MdnsDiscovery {
    async fn announce(&self, record: &ServiceRecord) -> Result<()> {
        let host = record.host.to_string();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let info = ServiceInfo::new(
            DiscoveryConfig::SERVICE_TYPE,
            &instance_name(record),
            &self.host_name,
            host.as_str(),
            record.port,
            txt_properties(record, seq),
        )?;
        self.daemon.register(info)?;
        debug!("mDNS announced '{}' at {}", record.name, record.socket_addr());
        Ok(())
    }

    async fn withdraw(&self, record: &ServiceRecord) -> Result<()> {
        let fullname = Self::fullname(record);
        // The status receiver only reports whether the goodbye went out.
        let _status = self.daemon.unregister(&fullname)?;
        debug!("mDNS withdrew {}", fullname);
        Ok(())
    }

    async fn query(&self, name: &ServiceName) -> Result<()> {
        let matches = live_records(&mut lock(&self.known), name, Instant::now());
        for record in matches {
            let _ = self.events.send(DiscoveryEvent::Announced(record));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    fn forget(&self, name: &ServiceName) {
        lock(&self.known).retain(|_, heard| &heard.record.name != name);
    }

    async fn shutdown(&self) -> Result<()> {
        self.browse_task.abort();
        if let Err(e) = self.daemon.shutdown() {
            warn!("mDNS daemon shutdown failed: {}", e);
        }
        Ok(())
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        self.browse_task.abort();
        let _ = self.daemon.shutdown();
    }
}
