//! Call transport.
//!
//! Length-prefixed JSON frames over TCP. Requests carry a correlation id so
//! concurrent calls can share one connection.
//!
//! # Architecture
//!
//! - **Server**: accepts connections and dispatches calls to the registry
//! - **Client**: one multiplexed connection to a remote server
//! - **Pool**: reuses client connections per remote address
//! - **Protocol**: shared framing and message types used by both ends

pub mod client;
pub mod dispatch;
pub mod pool;
pub mod protocol;
pub mod server;

pub use client::CallClient;
pub use pool::ConnectionPool;
pub use protocol::{CallRequest, CallResponse};
pub use server::{CallServer, ServerHandle};
