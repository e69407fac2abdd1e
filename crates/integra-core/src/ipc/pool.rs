//! Pool of call-server connections, one per remote address.
//!
//! Connections are kept in a `mini-moka` cache with a time-to-idle, so an
//! endpoint that is no longer called eventually has its connection dropped.
//! A pooled connection that has been closed by its peer is replaced on the
//! next lookup.

use super::client::CallClient;
use crate::config::TransportConfig;
use crate::Result;
use mini_moka::sync::Cache;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared connections keyed by server address.
pub struct ConnectionPool {
    connections: Cache<SocketAddr, Arc<CallClient>>,
    /// Serializes connection setup so concurrent callers share one connection.
    connect_lock: Mutex<()>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::with_idle_timeout(TransportConfig::POOL_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(idle: Duration) -> Self {
        Self {
            connections: Cache::builder()
                .time_to_idle(idle)
                .max_capacity(TransportConfig::POOL_MAX_CONNECTIONS)
                .build(),
            connect_lock: Mutex::new(()),
        }
    }

    fn live(&self, addr: &SocketAddr) -> Option<Arc<CallClient>> {
        self.connections
            .get(addr)
            .filter(|client| !client.is_closed())
    }

    /// Get an open connection to `addr`, connecting if needed.
    pub async fn get(&self, addr: SocketAddr) -> Result<Arc<CallClient>> {
        if let Some(client) = self.live(&addr) {
            return Ok(client);
        }

        let _guard = self.connect_lock.lock().await;
        // Another caller may have connected while we waited.
        if let Some(client) = self.live(&addr) {
            return Ok(client);
        }

        let client = Arc::new(CallClient::connect(addr).await?);
        self.connections.insert(addr, client.clone());
        debug!("Pooled new connection to {}", addr);
        Ok(client)
    }

    /// Drop the pooled connection to `addr`, if any.
    pub fn evict(&self, addr: &SocketAddr) {
        self.connections.invalidate(addr);
    }

    pub fn clear(&self) {
        self.connections.invalidate_all();
    }

    /// Whether a live connection to `addr` is pooled.
    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.live(addr).is_some()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MethodTable;
    use crate::ipc::server::CallServer;
    use crate::registry::{Registry, ServiceName};
    use crate::value::Value;

    async fn server() -> crate::ipc::ServerHandle {
        let registry = Registry::new();
        registry
            .insert(
                ServiceName::new("demo").unwrap(),
                Arc::new(MethodTable::new("demo").method("ping", |_| Ok(Value::from("pong")))),
            )
            .unwrap();
        CallServer::start("127.0.0.1:0".parse().unwrap(), registry)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pool_reuses_connection() {
        let mut handle = server().await;
        let pool = ConnectionPool::new();

        let a = pool.get(handle.addr()).await.unwrap();
        let b = pool.get(handle.addr()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(pool.contains(&handle.addr()));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_pool_evict_forces_reconnect() {
        let mut handle = server().await;
        let pool = ConnectionPool::new();

        let a = pool.get(handle.addr()).await.unwrap();
        pool.evict(&handle.addr());
        assert!(!pool.contains(&handle.addr()));

        let b = pool.get(handle.addr()).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_pool_reports_unreachable_server() {
        let pool = ConnectionPool::new();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert!(pool.get(addr).await.is_err());
        assert!(!pool.contains(&addr));
    }
}
