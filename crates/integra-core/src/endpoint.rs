//! Resolved call targets.

use crate::discovery::ServiceRecord;
use crate::handler::Handler;
use crate::registry::ServiceName;
use std::fmt;
use std::sync::Arc;

/// Where a resolved name lives.
#[derive(Clone)]
pub enum Endpoint {
    /// Registered in this process; calls skip the network.
    Local {
        name: ServiceName,
        handler: Arc<dyn Handler>,
    },
    /// Advertised by another process.
    Remote(ServiceRecord),
}

impl Endpoint {
    pub fn name(&self) -> &ServiceName {
        match self {
            Endpoint::Local { name, .. } => name,
            Endpoint::Remote(record) => &record.name,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Endpoint::Local { .. })
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local { name, .. } => f.debug_struct("Local").field("name", name).finish(),
            Endpoint::Remote(record) => f.debug_tuple("Remote").field(record).finish(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Local { name, .. } => write!(f, "{} (local)", name),
            Endpoint::Remote(record) => write!(f, "{} at {}", record.name, record.socket_addr()),
        }
    }
}
