//! Integra - share objects between processes on a local network.
//!
//! A process registers a handler under a service name; the name is advertised
//! on the LAN with DNS-SD. Any process on the same network segment can then
//! resolve the name and call methods on the handler as if it were local.
//! Calls to a name registered in the same process skip the network entirely.
//!
//! # Example
//!
//! ```rust,ignore
//! use integra::{handler::arg_i64, Integra, MethodTable, Value};
//!
//! #[tokio::main]
//! async fn main() -> integra::Result<()> {
//!     let integra = Integra::new().await?;
//!
//!     integra.register(
//!         "calc",
//!         MethodTable::new("calc").method("add", |args| {
//!             Ok(Value::Int(arg_i64(&args, 0)? + arg_i64(&args, 1)?))
//!         }),
//!     )?;
//!
//!     // From this or any other process on the LAN:
//!     let sum = integra
//!         .resolve_and_call("calc", "add", vec![2.into(), 3.into()], None)
//!         .await?;
//!     assert_eq!(sum, Value::Int(5));
//!
//!     integra.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod ipc;
pub mod registry;
pub mod value;

mod api;

pub use config::{DiscoveryConfig, IntegraConfig, TransportConfig};
pub use discovery::{Discovery, DiscoveryEvent, MemoryDiscovery, ServiceRecord};
#[cfg(feature = "mdns")]
pub use discovery::MdnsDiscovery;
pub use endpoint::Endpoint;
pub use error::{IntegraError, Result};
pub use handler::{CallResult, Fault, FaultKind, Handler, MethodTable};
pub use registry::ServiceName;
pub use value::Value;

pub use api::{IntegraBuilder, ServiceProxy};

use api::IntegraState;
use std::sync::Arc;

/// One participant in the object-sharing network.
///
/// Owns the local registry, the call server answering for it, the advertiser
/// keeping its names visible and the resolver used to find other processes'
/// names. Cloning is cheap and clones share all of it.
#[derive(Clone)]
pub struct Integra {
    inner: Arc<IntegraState>,
}

impl Integra {
    /// Create a builder for Integra.
    ///
    /// ```rust,ignore
    /// let integra = Integra::builder()
    ///     .local_only(true)
    ///     .call_timeout(Duration::from_secs(2))
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder() -> IntegraBuilder {
        IntegraBuilder::new()
    }

    /// Create an instance with the default configuration and mDNS discovery.
    pub async fn new() -> Result<Self> {
        Self::builder().build().await
    }
}

impl std::fmt::Debug for Integra {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integra")
            .field("node", &self.inner.node)
            .field("advertised", &self.inner.advertised)
            .field("services", &self.inner.registry.names())
            .finish()
    }
}
