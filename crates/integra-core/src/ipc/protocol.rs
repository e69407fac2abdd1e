//! Call protocol types and framing.
//!
//! Every message is a length-prefixed UTF-8 JSON document:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Requests carry a correlation id which the matching response echoes, so
//! any number of calls can share one connection.

use crate::config::{DiscoveryConfig, TransportConfig};
use crate::handler::{CallResult, Fault, FaultKind};
use crate::value::Value;
use crate::{IntegraError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A single remote invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub v: u16,
    pub id: u64,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CallRequest {
    pub fn new(
        id: u64,
        service: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            v: DiscoveryConfig::PROTOCOL_VERSION,
            id,
            service: service.into(),
            method: method.into(),
            args,
        }
    }
}

/// The outcome of one [`CallRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    pub v: u16,
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Fault>,
}

impl CallResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            v: DiscoveryConfig::PROTOCOL_VERSION,
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, fault: Fault) -> Self {
        Self {
            v: DiscoveryConfig::PROTOCOL_VERSION,
            id,
            ok: false,
            result: None,
            error: Some(fault),
        }
    }

    pub fn from_result(id: u64, result: CallResult) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(fault) => Self::failure(id, fault),
        }
    }

    /// Convert into the caller-facing result.
    ///
    /// A success with no result decodes as null; a failure with no fault
    /// object is reported as a malformed response.
    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        let fault = self.error.unwrap_or_else(|| {
            Fault::new(
                FaultKind::InvalidRequest,
                "error response without fault description",
            )
        });
        Err(fault.into())
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > TransportConfig::MAX_MESSAGE_SIZE {
        return Err(IntegraError::Validation {
            field: "frame".to_string(),
            message: format!(
                "message size {} exceeds maximum {}",
                len,
                TransportConfig::MAX_MESSAGE_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
///
/// The length prefix and payload go out in one buffer so concurrent writers
/// behind a lock never split a frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > TransportConfig::MAX_MESSAGE_SIZE {
        return Err(IntegraError::Validation {
            field: "frame".to_string(),
            message: format!(
                "message size {} exceeds maximum {}",
                payload.len(),
                TransportConfig::MAX_MESSAGE_SIZE
            ),
        });
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
