//! Handlers: the process-local objects bound to service names.
//!
//! A handler is anything that can answer `call(method, args)`. Most services
//! are built from a [`MethodTable`], which maps method names to closures and
//! answers unknown names with a `method_not_found` fault.

use crate::error::IntegraError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Category of a handler-side failure, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FaultKind {
    MethodNotFound,
    ServiceNotFound,
    InvalidArguments,
    InvalidRequest,
    HandlerFailed,
    HandlerPanicked,
    Unavailable,
    Custom(String),
}

impl FaultKind {
    pub fn as_str(&self) -> &str {
        match self {
            FaultKind::MethodNotFound => "method_not_found",
            FaultKind::ServiceNotFound => "service_not_found",
            FaultKind::InvalidArguments => "invalid_arguments",
            FaultKind::InvalidRequest => "invalid_request",
            FaultKind::HandlerFailed => "handler_failed",
            FaultKind::HandlerPanicked => "handler_panicked",
            FaultKind::Unavailable => "unavailable",
            FaultKind::Custom(kind) => kind,
        }
    }
}

impl From<String> for FaultKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "method_not_found" => FaultKind::MethodNotFound,
            "service_not_found" => FaultKind::ServiceNotFound,
            "invalid_arguments" => FaultKind::InvalidArguments,
            "invalid_request" => FaultKind::InvalidRequest,
            "handler_failed" => FaultKind::HandlerFailed,
            "handler_panicked" => FaultKind::HandlerPanicked,
            "unavailable" => FaultKind::Unavailable,
            _ => FaultKind::Custom(s),
        }
    }
}

impl From<FaultKind> for String {
    fn from(kind: FaultKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised by a handler while servicing a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn method_not_found(service: &str, method: &str) -> Self {
        Self::new(
            FaultKind::MethodNotFound,
            format!("No method {} in {}", method, service),
        )
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidArguments, message)
    }

    /// A failure with an application-defined kind.
    pub fn custom(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FaultKind::from(kind.into()), message)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<IntegraError> for Fault {
    fn from(err: IntegraError) -> Self {
        match err {
            IntegraError::Remote { kind, message } => Fault { kind, message },
            other => Fault::new(other.to_fault_kind(), other.to_string()),
        }
    }
}

impl From<Fault> for IntegraError {
    fn from(fault: Fault) -> Self {
        IntegraError::Remote {
            kind: fault.kind,
            message: fault.message,
        }
    }
}

/// Result of a handler invocation.
pub type CallResult = std::result::Result<Value, Fault>;

/// An object that services calls for one registered name.
///
/// Implementations must be safe to call concurrently: calls from different
/// clients may run in parallel, and the handler owns its own synchronization.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Invoke `method` with positional `args`.
    ///
    /// Unknown methods should fail with [`FaultKind::MethodNotFound`].
    async fn call(&self, method: &str, args: Vec<Value>) -> CallResult;
}

type MethodFn = Arc<dyn Fn(Vec<Value>) -> CallResult + Send + Sync>;

/// A handler assembled from named synchronous methods.
///
/// # Example
///
/// ```
/// use integra::{MethodTable, Value};
///
/// let calc = MethodTable::new("calc")
///     .method("add", |args| {
///         let a = integra::handler::arg_i64(&args, 0)?;
///         let b = integra::handler::arg_i64(&args, 1)?;
///         Ok(Value::Int(a + b))
///     });
/// assert!(calc.has_method("add"));
/// ```
#[derive(Clone)]
pub struct MethodTable {
    service: String,
    methods: BTreeMap<String, MethodFn>,
}

impl MethodTable {
    /// Create an empty table; `service` is only used in fault messages.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            methods: BTreeMap::new(),
        }
    }

    /// Add (or replace) a method.
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> CallResult + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Names of all exposed methods, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("service", &self.service)
            .field("methods", &self.method_names())
            .finish()
    }
}

#[async_trait::async_trait]
impl Handler for MethodTable {
    async fn call(&self, method: &str, args: Vec<Value>) -> CallResult {
        match self.methods.get(method) {
            Some(f) => f(args),
            None => Err(Fault::method_not_found(&self.service, method)),
        }
    }
}

/// Fetch positional argument `index` as an integer.
pub fn arg_i64(args: &[Value], index: usize) -> std::result::Result<i64, Fault> {
    args.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| arg_error(args, index, "int"))
}

/// Fetch positional argument `index` as a float (integers are widened).
pub fn arg_f64(args: &[Value], index: usize) -> std::result::Result<f64, Fault> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| arg_error(args, index, "float"))
}

/// Fetch positional argument `index` as a string slice.
pub fn arg_str(args: &[Value], index: usize) -> std::result::Result<&str, Fault> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| arg_error(args, index, "string"))
}

fn arg_error(args: &[Value], index: usize, expected: &str) -> Fault {
    match args.get(index) {
        Some(v) => Fault::invalid_arguments(format!(
            "argument {} must be {}, got {}",
            index,
            expected,
            v.type_name()
        )),
        None => Fault::invalid_arguments(format!(
            "missing argument {} (got {} arguments)",
            index,
            args.len()
        )),
    }
}
