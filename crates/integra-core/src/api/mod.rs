//! API implementation submodules.
//!
//! Each submodule contains `impl Integra` blocks that extend the public API.
//! The struct definition remains in `lib.rs`.

mod builder;
mod calls;
mod proxy;
mod registration;
mod state;

pub use builder::IntegraBuilder;
pub use proxy::ServiceProxy;
pub(crate) use state::IntegraState;
