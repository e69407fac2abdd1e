//! Client stubs for named services.

use crate::error::Result;
use crate::registry::ServiceName;
use crate::value::Value;
use crate::Integra;
use std::time::Duration;

/// A named service seen from the caller's side.
///
/// Each call resolves the name again (usually a cache hit), so a proxy keeps
/// working when the service moves to another process.
#[derive(Debug, Clone)]
pub struct ServiceProxy {
    integra: Integra,
    name: ServiceName,
    timeout: Option<Duration>,
}

impl ServiceProxy {
    pub(crate) fn new(integra: Integra, name: ServiceName) -> Self {
        Self {
            integra,
            name,
            timeout: None,
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Use `timeout` for calls instead of the configured call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.integra
            .resolve_and_call(self.name.as_str(), method, args, self.timeout)
            .await
    }
}
