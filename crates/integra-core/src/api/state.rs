//! Shared state behind an `Integra` handle.

use crate::config::IntegraConfig;
use crate::discovery::{Advertiser, Discovery, Resolver};
use crate::ipc::{ConnectionPool, ServerHandle};
use crate::registry::Registry;
use crate::Integra;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

pub(crate) struct IntegraState {
    pub(crate) node: String,
    pub(crate) config: IntegraConfig,
    pub(crate) registry: Registry,
    pub(crate) advertiser: Advertiser,
    pub(crate) resolver: Resolver,
    pub(crate) pool: ConnectionPool,
    pub(crate) backend: Arc<dyn Discovery>,
    pub(crate) server: Mutex<Option<ServerHandle>>,
    /// Address written into this process's service records.
    pub(crate) advertised: SocketAddr,
    pub(crate) closed: AtomicBool,
}

impl Integra {
    pub(crate) fn from_state(state: IntegraState) -> Self {
        Self {
            inner: Arc::new(state),
        }
    }

    /// Random id of this instance, carried in its service records.
    pub fn node_id(&self) -> &str {
        &self.inner.node
    }

    pub fn config(&self) -> &IntegraConfig {
        &self.inner.config
    }

    /// Address the call server is bound to.
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.inner
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ServerHandle::addr)
    }

    /// Address peers are told to connect to.
    pub fn advertised_addr(&self) -> SocketAddr {
        self.inner.advertised
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Withdraw every local name, stop the call server and release the
    /// discovery backend.
    ///
    /// Affects every clone of this handle. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.advertiser.stop_all().await;
        let names = self.inner.registry.clear();

        let server = self
            .inner
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut server) = server {
            server.shutdown();
        }

        self.inner.pool.clear();
        if let Err(e) = self.inner.backend.shutdown().await {
            tracing::warn!("Discovery shutdown failed: {}", e);
        }

        info!(
            "Integra node {} shut down ({} services withdrawn)",
            self.inner.node,
            names.len()
        );
    }
}
