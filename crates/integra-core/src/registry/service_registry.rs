//! In-memory service registry.

use super::name::ServiceName;
use crate::handler::Handler;
use crate::{IntegraError, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Mapping from service name to the local handler that services it.
///
/// Mutations take the write lock and are mutually exclusive; lookups share the
/// read lock and run concurrently with each other. Cloning yields another
/// handle to the same table.
#[derive(Clone, Default)]
pub struct Registry {
    services: Arc<RwLock<HashMap<ServiceName, Arc<dyn Handler>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // No code panics while holding the lock, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ServiceName, Arc<dyn Handler>>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ServiceName, Arc<dyn Handler>>> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `name` to `handler`.
    ///
    /// Fails with `DuplicateName` if the name is already bound; the existing
    /// binding is left untouched.
    pub fn insert(&self, name: ServiceName, handler: Arc<dyn Handler>) -> Result<()> {
        let mut services = self.write();
        if services.contains_key(&name) {
            return Err(IntegraError::DuplicateName {
                name: name.to_string(),
            });
        }
        debug!("Registry: bound '{}'", name);
        services.insert(name, handler);
        Ok(())
    }

    /// Remove the binding for `name` and return its handler.
    pub fn remove(&self, name: &ServiceName) -> Result<Arc<dyn Handler>> {
        let removed = self.write().remove(name);
        match removed {
            Some(handler) => {
                debug!("Registry: unbound '{}'", name);
                Ok(handler)
            }
            None => Err(IntegraError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Look up the handler bound to `name`.
    pub fn get(&self, name: &ServiceName) -> Option<Arc<dyn Handler>> {
        self.read().get(name).cloned()
    }

    /// Look up by raw string, as received from the wire.
    pub fn get_str(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let name = ServiceName::new(name).ok()?;
        self.get(&name)
    }

    pub fn contains(&self, name: &ServiceName) -> bool {
        self.read().contains_key(name)
    }

    /// All bound names, sorted.
    pub fn names(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every binding. Used on shutdown.
    pub fn clear(&self) -> Vec<ServiceName> {
        self.write().drain().map(|(name, _)| name).collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.names())
            .finish()
    }
}
