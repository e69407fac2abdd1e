//! Process-local table of exposed services.
//!
//! The registry maps validated [`ServiceName`]s to handlers. It is owned by
//! one [`crate::Integra`] instance and shared with the call server, which
//! looks handlers up for every inbound request.

pub mod name;
pub mod service_registry;

pub use name::ServiceName;
pub use service_registry::Registry;
