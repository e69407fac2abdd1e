//! Handler invocation shared by the call server and same-process calls.

use super::protocol::{CallRequest, CallResponse};
use crate::handler::{CallResult, Fault, FaultKind, Handler};
use crate::registry::Registry;
use crate::value::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Run one handler invocation in its own task.
///
/// A panicking handler is reported as a `handler_panicked` fault instead of
/// taking the caller down with it.
pub async fn invoke(
    handler: Arc<dyn Handler>,
    service: &str,
    method: String,
    args: Vec<Value>,
) -> CallResult {
    let task_method = method.clone();
    let task = tokio::spawn(async move { handler.call(&task_method, args).await });

    match task.await {
        Ok(result) => {
            if let Err(fault) = &result {
                debug!("{}.{} failed: {}", service, method, fault);
            }
            result
        }
        Err(e) if e.is_panic() => {
            error!("Handler {}.{} panicked", service, method);
            Err(Fault::new(
                FaultKind::HandlerPanicked,
                format!("handler {}.{} panicked", service, method),
            ))
        }
        Err(e) => Err(Fault::new(
            FaultKind::HandlerFailed,
            format!("handler {}.{} was cancelled: {}", service, method, e),
        )),
    }
}

/// Look up the request's service and invoke the requested method.
pub async fn dispatch_request(registry: &Registry, request: CallRequest) -> CallResponse {
    let CallRequest {
        id,
        service,
        method,
        args,
        ..
    } = request;

    let Some(handler) = registry.get_str(&service) else {
        error!("Service object {} missing", service);
        return CallResponse::failure(
            id,
            Fault::new(
                FaultKind::ServiceNotFound,
                format!("Service object {} missing", service),
            ),
        );
    };

    CallResponse::from_result(id, invoke(handler, &service, method, args).await)
}
