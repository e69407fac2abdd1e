//! Multiplexed TCP call client.
//!
//! One `CallClient` owns one connection to a remote call server. Any number of
//! tasks may call through it concurrently: each call gets a fresh correlation
//! id, frames are written whole under a lock, and a background reader task
//! routes every response to the caller waiting on its id.
//!
//! A call that times out gives up its pending slot; if the response arrives
//! later it is discarded. When the connection breaks, every waiting call fails
//! with `ConnectionLost` and the client reports itself closed so the pool can
//! replace it.

use super::protocol::{read_frame, write_frame, CallRequest, CallResponse};
use crate::config::TransportConfig;
use crate::value::Value;
use crate::{IntegraError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<CallResponse>>>>;

/// Client side of one call-server connection.
#[derive(Debug)]
pub struct CallClient {
    addr: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl CallClient {
    /// Connect to a call server.
    ///
    /// Fails with `ConnectionLost` if the server cannot be reached within
    /// [`TransportConfig::CONNECT_TIMEOUT`].
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(TransportConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| IntegraError::ConnectionLost { addr })?
            .map_err(|e| {
                debug!("Connect to {} failed: {}", addr, e);
                IntegraError::ConnectionLost { addr }
            })?;
        stream.set_nodelay(true)?;

        debug!("Call client connected to {}", addr);

        let (reader, writer) = stream.into_split();
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader_task = tokio::spawn(Self::read_loop(
            addr,
            reader,
            pending.clone(),
            closed.clone(),
        ));

        Ok(Self {
            addr,
            writer: Mutex::new(writer),
            pending,
            // Id 0 is reserved for uncorrelated server errors.
            next_id: AtomicU64::new(1),
            closed,
            reader_task,
        })
    }

    /// Call `method` on `service` and wait up to `timeout` for the response.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(IntegraError::ConnectionLost { addr: self.addr });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = CallRequest::new(id, service, method, args);
        let request_bytes = serde_json::to_vec(&request)?;

        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);
        let deadline = Instant::now() + timeout;

        // The frame is always written whole; only the wait for the response
        // is bounded by the timeout.
        if let Err(e) = self.send_frame(&request_bytes).await {
            self.lock_pending().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(response)) => response.into_result(),
            // The reader drops every sender when the connection ends.
            Ok(Err(_)) => Err(IntegraError::ConnectionLost { addr: self.addr }),
            Err(_) => {
                self.lock_pending().remove(&id);
                debug!("Call {}.{} (id {}) timed out after {:?}", service, method, id, timeout);
                Err(IntegraError::Timeout(timeout))
            }
        }
    }

    async fn send_frame(&self, request_bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let mut guard = PartialWriteGuard {
            closed: &self.closed,
            finished: false,
        };
        let result = write_frame(&mut *writer, request_bytes).await;
        guard.finished = true;

        match result {
            Ok(()) => Ok(()),
            // Oversized request; nothing was written.
            Err(e @ IntegraError::Validation { .. }) => Err(e),
            Err(e) => {
                debug!("Write to {} failed: {}", self.addr, e);
                self.closed.store(true, Ordering::SeqCst);
                Err(IntegraError::ConnectionLost { addr: self.addr })
            }
        }
    }

    async fn read_loop(
        addr: SocketAddr,
        mut reader: OwnedReadHalf,
        pending: PendingMap,
        closed: Arc<AtomicBool>,
    ) {
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Server {} closed the connection", addr);
                    break;
                }
                Err(e) => {
                    debug!("Read from {} failed: {}", addr, e);
                    break;
                }
            };

            let response: CallResponse = match serde_json::from_slice(&frame) {
                Ok(response) => response,
                Err(e) => {
                    warn!("Discarding malformed response from {}: {}", addr, e);
                    continue;
                }
            };

            let waiter = pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&response.id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!(
                    "Discarding response {} from {}: no caller waiting",
                    response.id, addr
                ),
            }
        }

        closed.store(true, Ordering::SeqCst);
        pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<CallResponse>>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// True once the connection has failed or been closed by the server.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.reader_task.is_finished()
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.lock_pending().len()
    }

    /// Get the address of the connected server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Marks the connection closed if a frame write is dropped before it finishes.
struct PartialWriteGuard<'a> {
    closed: &'a AtomicBool,
    finished: bool,
}

impl Drop for PartialWriteGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for CallClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
