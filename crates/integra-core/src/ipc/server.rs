//! TCP call server.
//!
//! Listens on the configured address (port 0 lets the OS choose), accepts
//! connections from clients, and dispatches every inbound [`CallRequest`] to
//! the handler registered under its service name.
//!
//! # Concurrency
//!
//! Each connection has a reader task and a writer task. Every request is
//! dispatched in its own task, so a slow handler never delays other calls on
//! the same connection and responses may go out in a different order than the
//! requests came in. The writer sends whole frames from a queue, so responses
//! never interleave on the wire.

use super::dispatch::dispatch_request;
use super::protocol::{read_frame, write_frame, CallRequest, CallResponse};
use crate::config::{DiscoveryConfig, TransportConfig};
use crate::handler::{Fault, FaultKind};
use crate::registry::Registry;
use crate::Result;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Correlation id used for responses to requests that could not be parsed.
pub const UNCORRELATED_ID: u64 = 0;

/// Handle to a running call server. Dropping shuts down the server.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut down the server.
    ///
    /// Stops accepting new connections and signals all active connection
    /// handlers to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Server that answers calls for the services in a [`Registry`].
pub struct CallServer;

impl CallServer {
    /// Start the server on `bind_addr`.
    ///
    /// Returns a handle that exposes the bound port and shuts the server down.
    /// The server runs in background tokio tasks.
    pub async fn start(bind_addr: SocketAddr, registry: Registry) -> Result<ServerHandle> {
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("Call server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            registry,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(ServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        registry: Registry,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Call server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= TransportConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    TransportConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let registry = registry.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, registry, &mut conn_shutdown).await {
                                    debug!("Connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        registry: Registry,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();
        let (response_tx, response_rx) =
            mpsc::channel::<CallResponse>(TransportConfig::WRITE_QUEUE_DEPTH);
        tokio::spawn(Self::write_loop(writer, response_rx));

        // Correlation ids currently being serviced on this connection.
        let in_flight: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()),
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            let request = match Self::decode_request(&frame) {
                Ok(request) => request,
                Err(response) => {
                    if response_tx.send(response).await.is_err() {
                        return Ok(());
                    }
                    continue;
                }
            };

            let id = request.id;
            let is_new = in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id);
            if !is_new {
                warn!("Duplicate in-flight correlation id {}", id);
                let response = CallResponse::failure(
                    id,
                    Fault::new(
                        FaultKind::InvalidRequest,
                        format!("correlation id {} is already in flight", id),
                    ),
                );
                if response_tx.send(response).await.is_err() {
                    return Ok(());
                }
                continue;
            }

            let registry = registry.clone();
            let response_tx = response_tx.clone();
            let in_flight = in_flight.clone();
            tokio::spawn(async move {
                let response = dispatch_request(&registry, request).await;
                in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                if response_tx.send(response).await.is_err() {
                    debug!("Dropping response {}: connection closed", id);
                }
            });
        }
    }

    /// Parse and validate one request frame.
    ///
    /// On failure returns the error response to send back; it carries the
    /// request's id when one can be recovered.
    fn decode_request(frame: &[u8]) -> std::result::Result<CallRequest, CallResponse> {
        let request: CallRequest = match serde_json::from_slice(frame) {
            Ok(req) => req,
            Err(e) => {
                let id = serde_json::from_slice::<serde_json::Value>(frame)
                    .ok()
                    .and_then(|v| v.get("id").and_then(|id| id.as_u64()))
                    .unwrap_or(UNCORRELATED_ID);
                warn!("Unparseable request (id {}): {}", id, e);
                return Err(CallResponse::failure(
                    id,
                    Fault::new(FaultKind::InvalidRequest, format!("Parse error: {}", e)),
                ));
            }
        };

        if request.v != DiscoveryConfig::PROTOCOL_VERSION {
            return Err(CallResponse::failure(
                request.id,
                Fault::new(
                    FaultKind::InvalidRequest,
                    format!(
                        "unsupported protocol version {} (expected {})",
                        request.v,
                        DiscoveryConfig::PROTOCOL_VERSION
                    ),
                ),
            ));
        }

        Ok(request)
    }

    /// Serialize a response, replacing it with a `handler_failed` fault when
    /// it cannot be encoded or would not fit in one frame.
    fn encode_response(response: &CallResponse) -> Option<Vec<u8>> {
        let problem = match serde_json::to_vec(response) {
            Ok(bytes) if bytes.len() <= TransportConfig::MAX_MESSAGE_SIZE => return Some(bytes),
            Ok(bytes) => {
                warn!(
                    "Response {} is {} bytes, over the {} byte limit",
                    response.id,
                    bytes.len(),
                    TransportConfig::MAX_MESSAGE_SIZE
                );
                "response exceeds maximum message size".to_string()
            }
            Err(e) => {
                error!("Failed to encode response {}: {}", response.id, e);
                format!("response could not be encoded: {}", e)
            }
        };

        let fallback =
            CallResponse::failure(response.id, Fault::new(FaultKind::HandlerFailed, problem));
        match serde_json::to_vec(&fallback) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!("Failed to encode fault for response {}: {}", response.id, e);
                None
            }
        }
    }

    async fn write_loop(mut writer: OwnedWriteHalf, mut responses: mpsc::Receiver<CallResponse>) {
        while let Some(response) = responses.recv().await {
            let bytes = match Self::encode_response(&response) {
                Some(bytes) => bytes,
                None => continue,
            };
            if let Err(e) = write_frame(&mut writer, &bytes).await {
                debug!("Write failed, closing connection: {}", e);
                break;
            }
        }
    }
}
