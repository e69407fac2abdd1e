//! Centralized configuration for Integra.
//!
//! Protocol constants and hard limits live on the holder structs below.
//! Tunable timings live on [`IntegraConfig`], which the builder consumes.

use std::net::IpAddr;
use std::time::Duration;

/// Discovery protocol constants.
pub struct DiscoveryConfig;

impl DiscoveryConfig {
    /// DNS-SD service type used for every advertised name.
    pub const SERVICE_TYPE: &'static str = "_integra._tcp.local.";
    /// Version carried in every service record. Records with another
    /// version are ignored.
    pub const PROTOCOL_VERSION: u16 = 1;
    pub const MAX_NAME_LEN: usize = 40;
    pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(60);
    pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
    pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);
    /// Upper bound on refresh jitter, as a fraction of the interval.
    pub const REFRESH_JITTER: f64 = 0.1;
    /// How often `wait_for_service` re-checks the local registry and re-queries.
    pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);
    /// Capacity of the discovery event channel.
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
    /// Routable address used to learn the outbound interface (no packet is sent).
    pub const PROBE_ADDR: &'static str = "10.254.254.254:1";
}

/// Call transport constants.
pub struct TransportConfig;

impl TransportConfig {
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    pub const MAX_CONNECTIONS: usize = 256;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);
    /// Pooled connections unused for this long are dropped.
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
    pub const POOL_MAX_CONNECTIONS: u64 = 64;
    /// Depth of the per-connection outbound frame queue.
    pub const WRITE_QUEUE_DEPTH: usize = 64;
}

/// Runtime configuration for one [`crate::Integra`] instance.
#[derive(Debug, Clone)]
pub struct IntegraConfig {
    /// Serve and advertise on the loopback address only.
    pub local_only: bool,
    /// Call server port; 0 lets the OS choose.
    pub port: u16,
    /// Address advertised in service records. Detected when `None`.
    pub advertise_addr: Option<IpAddr>,
    pub record_ttl: Duration,
    pub refresh_interval: Duration,
    pub resolve_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for IntegraConfig {
    fn default() -> Self {
        Self {
            local_only: false,
            port: 0,
            advertise_addr: None,
            record_ttl: DiscoveryConfig::DEFAULT_RECORD_TTL,
            refresh_interval: DiscoveryConfig::DEFAULT_REFRESH_INTERVAL,
            resolve_timeout: DiscoveryConfig::DEFAULT_RESOLVE_TIMEOUT,
            call_timeout: TransportConfig::DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl IntegraConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_advertise_addr(mut self, addr: IpAddr) -> Self {
        self.advertise_addr = Some(addr);
        self
    }

    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Check timing relationships that the advertiser relies on.
    pub fn validate(&self) -> crate::Result<()> {
        if self.record_ttl.as_secs() == 0 {
            return Err(crate::IntegraError::Config {
                message: "record_ttl must be at least one second".to_string(),
            });
        }
        // Records carry whole seconds.
        let advertised_ttl = Duration::from_secs(self.record_ttl.as_secs());
        if self.refresh_interval.is_zero() || self.refresh_interval >= advertised_ttl {
            return Err(crate::IntegraError::Config {
                message: format!(
                    "refresh_interval ({:?}) must be non-zero and shorter than the advertised record_ttl ({:?})",
                    self.refresh_interval, advertised_ttl
                ),
            });
        }
        if self.call_timeout.is_zero() || self.resolve_timeout.is_zero() {
            return Err(crate::IntegraError::Config {
                message: "timeouts must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
