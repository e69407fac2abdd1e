//! Service discovery: advertising local names and finding remote ones.
//!
//! A [`Discovery`] backend moves [`ServiceRecord`]s between processes. The
//! [`Advertiser`] keeps announcing the records of locally registered names,
//! and the [`Resolver`] caches the records it hears about until their TTL
//! runs out.
//!
//! Delivery is unreliable by nature (multicast): a withdrawal may never
//! arrive, so TTL expiry is the authoritative removal signal.

pub mod address;
pub mod advertiser;
pub mod memory;
#[cfg(feature = "mdns")]
pub mod mdns;
pub mod resolver;

pub use advertiser::Advertiser;
pub use memory::MemoryDiscovery;
#[cfg(feature = "mdns")]
pub use mdns::MdnsDiscovery;
pub use resolver::Resolver;

use crate::config::DiscoveryConfig;
use crate::registry::ServiceName;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::sync::broadcast;

/// An advertised `name -> address:port` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: ServiceName,
    /// Id of the advertising process.
    pub node: String,
    pub host: IpAddr,
    pub port: u16,
    pub ttl_secs: u32,
    /// Call protocol version spoken by the advertiser.
    pub proto: u16,
}

impl ServiceRecord {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs as u64)
    }

    /// Whether this process can talk to the advertiser.
    pub fn is_compatible(&self) -> bool {
        self.proto == DiscoveryConfig::PROTOCOL_VERSION
    }
}

/// Something heard from the discovery layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A record was announced or refreshed.
    Announced(ServiceRecord),
    /// Best-effort removal notice from the advertiser.
    Withdrawn { name: ServiceName, node: String },
}

/// A service discovery mechanism.
#[async_trait::async_trait]
pub trait Discovery: Send + Sync + 'static {
    /// Publish (or refresh) a record.
    async fn announce(&self, record: &ServiceRecord) -> Result<()>;

    /// Publish a best-effort withdrawal of a record.
    async fn withdraw(&self, record: &ServiceRecord) -> Result<()>;

    /// Ask the network for records of `name`.
    ///
    /// Answers arrive as [`DiscoveryEvent::Announced`] on subscribed
    /// receivers; subscribe before querying to avoid missing them.
    async fn query(&self, name: &ServiceName) -> Result<()>;

    /// Receive every event heard from now on.
    fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent>;

    /// Drop anything the backend remembers about `name`, so a later query
    /// only reports records heard again.
    fn forget(&self, _name: &ServiceName) {}

    /// Release network resources.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accessors() {
        let record = ServiceRecord {
            name: ServiceName::new("calc").unwrap(),
            node: "n1".into(),
            host: "192.168.1.20".parse().unwrap(),
            port: 4242,
            ttl_secs: 60,
            proto: DiscoveryConfig::PROTOCOL_VERSION,
        };
        assert_eq!(record.socket_addr().to_string(), "192.168.1.20:4242");
        assert_eq!(record.ttl(), Duration::from_secs(60));
        assert!(record.is_compatible());

        let future = ServiceRecord { proto: 2, ..record };
        assert!(!future.is_compatible());
    }
}
