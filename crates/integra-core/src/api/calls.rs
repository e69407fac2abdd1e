//! Resolving names and calling endpoints.

use super::proxy::ServiceProxy;
use crate::config::DiscoveryConfig;
use crate::discovery::ServiceRecord;
use crate::endpoint::Endpoint;
use crate::error::{IntegraError, Result};
use crate::ipc::dispatch;
use crate::registry::ServiceName;
use crate::value::Value;
use crate::Integra;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

impl Integra {
    /// Find the endpoint serving `name`.
    ///
    /// Checks the local registry, then cached discovery records, then queries
    /// the network for up to the configured resolve timeout. Fails with
    /// `ServiceUnavailable` if nothing answers.
    pub async fn resolve(&self, name: &str) -> Result<Endpoint> {
        let name = ServiceName::new(name)?;
        self.inner.resolver.resolve(&name).await
    }

    /// Call `method` on an endpoint.
    ///
    /// `timeout` defaults to the configured call timeout. Local and remote
    /// endpoints behave the same: handler faults come back as `Remote`, and a
    /// call that does not finish in time fails with `Timeout`.
    pub async fn call(
        &self,
        endpoint: &Endpoint,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let timeout = timeout.unwrap_or(self.inner.config.call_timeout);
        match endpoint {
            Endpoint::Local { name, handler } => {
                let invocation =
                    dispatch::invoke(handler.clone(), name.as_str(), method.to_string(), args);
                match tokio::time::timeout(timeout, invocation).await {
                    Ok(result) => result.map_err(IntegraError::from),
                    Err(_) => Err(IntegraError::Timeout(timeout)),
                }
            }
            Endpoint::Remote(record) => self.call_remote(record, method, args, timeout).await,
        }
    }

    async fn call_remote(
        &self,
        record: &ServiceRecord,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let addr = self.connect_addr(record);
        let result = match self.inner.pool.get(addr).await {
            Ok(client) => client.call(record.name.as_str(), method, args, timeout).await,
            Err(e) => Err(e),
        };

        if let Err(IntegraError::ConnectionLost { .. }) = &result {
            self.service_lost(record, addr);
        }
        result
    }

    /// Forget everything cached about an endpoint that stopped answering, so
    /// the next call resolves afresh. The failed call is not retried.
    fn service_lost(&self, record: &ServiceRecord, addr: SocketAddr) {
        warn!("Service {} lost at {}", record.name, addr);
        self.inner.pool.evict(&addr);
        self.inner.resolver.evict(&record.name);
    }

    /// Address to dial for `record`.
    ///
    /// Records advertising this machine's own address are reached over
    /// loopback, which works even when the LAN interface filters hairpin
    /// traffic.
    fn connect_addr(&self, record: &ServiceRecord) -> SocketAddr {
        if record.host == self.inner.advertised.ip() && !record.host.is_loopback() {
            debug!("'{}' is on this host, connecting over loopback", record.name);
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), record.port)
        } else {
            record.socket_addr()
        }
    }

    /// Resolve `name` and call `method` on it.
    pub async fn resolve_and_call(
        &self,
        name: &str,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let endpoint = self.resolve(name).await?;
        self.call(&endpoint, method, args, timeout).await
    }

    /// Wait until `name` can be resolved, for at most `timeout`.
    ///
    /// Fails with `ServiceUnavailable` if the name has not appeared in time.
    pub async fn wait_for_service(&self, name: &str, timeout: Duration) -> Result<ServiceProxy> {
        let service = ServiceName::new(name)?;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let slice = remaining.min(DiscoveryConfig::WAIT_POLL_INTERVAL);
            match self.inner.resolver.resolve_within(&service, slice).await {
                Ok(endpoint) => {
                    debug!("'{}' available: {}", service, endpoint);
                    return Ok(ServiceProxy::new(self.clone(), service));
                }
                Err(IntegraError::ServiceUnavailable { .. }) if Instant::now() < deadline => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// A stub for calling `name`. Resolution happens on each call.
    pub fn service(&self, name: &str) -> Result<ServiceProxy> {
        Ok(ServiceProxy::new(self.clone(), ServiceName::new(name)?))
    }

    /// Every name currently known: local registrations and unexpired remote
    /// records. Sorted and deduplicated.
    pub fn services(&self) -> Vec<ServiceName> {
        let local = self.inner.registry.names();
        let remote = self
            .inner
            .resolver
            .known_records()
            .into_iter()
            .map(|record| record.name);
        local
            .into_iter()
            .chain(remote)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Unexpired records of names advertised by other processes.
    pub fn remote_services(&self) -> Vec<ServiceRecord> {
        self.inner.resolver.known_records()
    }
}
