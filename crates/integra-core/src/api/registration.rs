//! Registering and unregistering local services.

use crate::error::{IntegraError, Result};
use crate::handler::Handler;
use crate::registry::ServiceName;
use crate::Integra;
use std::sync::Arc;
use tracing::info;

impl Integra {
    /// Expose `handler` under `name` and start advertising it.
    ///
    /// Fails with `DuplicateName` if `name` is already registered in this
    /// process. Must be called inside a tokio runtime.
    pub fn register(&self, name: &str, handler: impl Handler) -> Result<()> {
        self.register_shared(name, Arc::new(handler))
    }

    /// Like [`Integra::register`], for a handler that is already shared.
    pub fn register_shared(&self, name: &str, handler: Arc<dyn Handler>) -> Result<()> {
        if self.is_shut_down() {
            return Err(IntegraError::Other(format!(
                "Cannot register '{}': instance is shut down",
                name
            )));
        }

        let name = ServiceName::new(name)?;
        self.inner.registry.insert(name.clone(), handler)?;
        self.inner.advertiser.start(&name);
        info!("Registered service '{}'", name);
        Ok(())
    }

    /// Remove `name` and withdraw its advertisement.
    ///
    /// Fails with `NotFound` if `name` is not registered in this process.
    /// Peers holding a cached record may keep trying it until the record's
    /// TTL runs out; those calls fail with `service_not_found`.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let name = ServiceName::new(name)?;
        self.inner.registry.remove(&name)?;
        self.inner.advertiser.stop(&name).await;
        info!("Unregistered service '{}'", name);
        Ok(())
    }

    /// The handler registered under `name` in this process, if any.
    pub fn lookup_local(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.inner.registry.get_str(name)
    }

    /// Names registered in this process, sorted.
    pub fn local_services(&self) -> Vec<ServiceName> {
        self.inner.registry.names()
    }
}
