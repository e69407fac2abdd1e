//! Builder for configuring Integra initialization.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::state::IntegraState;
use crate::config::IntegraConfig;
use crate::discovery::address::detect_local_ip;
use crate::discovery::{Advertiser, Discovery, Resolver};
use crate::error::Result;
use crate::ipc::{CallServer, ConnectionPool};
use crate::registry::Registry;
use crate::Integra;
use tracing::info;

/// Builder for configuring Integra initialization.
///
/// # Example
///
/// ```rust,ignore
/// use integra::{Integra, MemoryDiscovery};
///
/// let bus = MemoryDiscovery::new();
/// let integra = Integra::builder()
///     .local_only(true)
///     .discovery(Arc::new(bus.clone()))
///     .build()
///     .await?;
/// ```
pub struct IntegraBuilder {
    config: IntegraConfig,
    discovery: Option<Arc<dyn Discovery>>,
}

impl IntegraBuilder {
    pub fn new() -> Self {
        Self {
            config: IntegraConfig::default(),
            discovery: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: IntegraConfig) -> Self {
        self.config = config;
        self
    }

    /// Serve on the loopback address and advertise it.
    ///
    /// Only processes on this host can reach the services.
    ///
    /// Default: `false`
    pub fn local_only(mut self, enable: bool) -> Self {
        self.config.local_only = enable;
        self
    }

    /// Call server port.
    ///
    /// Default: `0` (chosen by the OS)
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Advertise `addr` instead of the detected interface address.
    /// Ignored in local-only mode.
    pub fn advertise_addr(mut self, addr: IpAddr) -> Self {
        self.config.advertise_addr = Some(addr);
        self
    }

    pub fn record_ttl(mut self, ttl: Duration) -> Self {
        self.config.record_ttl = ttl;
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.config.refresh_interval = interval;
        self
    }

    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.config.resolve_timeout = timeout;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Use a specific discovery backend.
    ///
    /// Default: a new [`crate::MdnsDiscovery`] (requires the `mdns` feature)
    pub fn discovery(mut self, backend: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(backend);
        self
    }

    #[cfg(feature = "mdns")]
    fn default_backend() -> Result<Arc<dyn Discovery>> {
        Ok(Arc::new(crate::discovery::MdnsDiscovery::new()?))
    }

    #[cfg(not(feature = "mdns"))]
    fn default_backend() -> Result<Arc<dyn Discovery>> {
        Err(crate::IntegraError::Config {
            message: "no discovery backend given and the `mdns` feature is disabled".to_string(),
        })
    }

    /// Start the call server and discovery, and return the instance.
    pub async fn build(self) -> Result<Integra> {
        let config = self.config;
        config.validate()?;

        let backend = match self.discovery {
            Some(backend) => backend,
            None => Self::default_backend()?,
        };

        let node = uuid::Uuid::new_v4().to_string();
        let registry = Registry::new();

        let bind_ip = if config.local_only {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        let server = CallServer::start(SocketAddr::new(bind_ip, config.port), registry.clone()).await?;

        let advertised_ip = if config.local_only {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            config.advertise_addr.unwrap_or_else(detect_local_ip)
        };
        let advertised = SocketAddr::new(advertised_ip, server.port);

        let advertiser = Advertiser::new(backend.clone(), node.clone(), advertised, &config);
        let resolver = Resolver::new(
            backend.clone(),
            registry.clone(),
            node.clone(),
            config.resolve_timeout,
        );

        info!(
            "Integra node {} serving on {} (advertised as {})",
            node, server.addr, advertised
        );

        Ok(Integra::from_state(IntegraState {
            node,
            config,
            registry,
            advertiser,
            resolver,
            pool: ConnectionPool::new(),
            backend,
            server: Mutex::new(Some(server)),
            advertised,
            closed: AtomicBool::new(false),
        }))
    }
}

impl Default for IntegraBuilder {
    fn default() -> Self {
        Self::new()
    }
}
