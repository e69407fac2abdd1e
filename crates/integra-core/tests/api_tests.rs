//! Integration tests for the Integra public interface.
//!
//! Instances share a `MemoryDiscovery` bus and run in local-only mode, so
//! calls between them go over real loopback TCP without touching multicast.

use integra::handler::{arg_i64, arg_str};
use integra::{
    CallResult, Discovery, Endpoint, Fault, FaultKind, Handler, Integra, IntegraError,
    MemoryDiscovery, MethodTable, ServiceName, ServiceRecord, Value,
};
use std::sync::Arc;
use std::time::Duration;

async fn node(bus: &MemoryDiscovery) -> Integra {
    Integra::builder()
        .local_only(true)
        .discovery(Arc::new(bus.clone()))
        .resolve_timeout(Duration::from_millis(500))
        .build()
        .await
        .unwrap()
}

async fn short_lived_node(bus: &MemoryDiscovery) -> Integra {
    Integra::builder()
        .local_only(true)
        .discovery(Arc::new(bus.clone()))
        .record_ttl(Duration::from_secs(3))
        .refresh_interval(Duration::from_secs(1))
        .resolve_timeout(Duration::from_millis(500))
        .build()
        .await
        .unwrap()
}

fn calc() -> MethodTable {
    MethodTable::new("calc")
        .method("add", |args| Ok(Value::Int(arg_i64(&args, 0)? + arg_i64(&args, 1)?)))
        .method("shout", |args| Ok(Value::from(arg_str(&args, 0)?.to_uppercase())))
        .method("explode", |_| panic!("boom"))
        .method("refuse", |_| Err(Fault::custom("refused", "not today")))
}

/// Answers `echo_after(delay_ms, value)` after sleeping.
struct SlowEcho;

#[async_trait::async_trait]
impl Handler for SlowEcho {
    async fn call(&self, method: &str, args: Vec<Value>) -> CallResult {
        match method {
            "echo_after" => {
                let delay = arg_i64(&args, 0)?;
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
                Ok(args.get(1).cloned().unwrap_or_default())
            }
            other => Err(Fault::method_not_found("slow", other)),
        }
    }
}

fn assert_unavailable(result: integra::Result<impl std::fmt::Debug>) {
    match result {
        Err(IntegraError::ServiceUnavailable { .. }) => {}
        other => panic!("Expected ServiceUnavailable, got: {:?}", other),
    }
}

fn assert_remote_kind(result: integra::Result<Value>, expected: FaultKind) {
    match result {
        Err(IntegraError::Remote { kind, .. }) => assert_eq!(kind, expected),
        other => panic!("Expected Remote({}), got: {:?}", expected, other),
    }
}

// ---------------------------------------------------------------------------
// Same-process behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_local_call_matches_direct_call() {
    let bus = MemoryDiscovery::new();
    let integra = node(&bus).await;
    integra.register("calc", calc()).unwrap();

    let endpoint = integra.resolve("calc").await.unwrap();
    assert!(endpoint.is_local());

    let args = vec![Value::Int(20), Value::Int(22)];
    let through_integra = integra.call(&endpoint, "add", args.clone(), None).await.unwrap();
    let direct = calc().call("add", args).await.unwrap();
    assert_eq!(through_integra, direct);

    assert_remote_kind(
        integra.call(&endpoint, "subtract", vec![], None).await,
        FaultKind::MethodNotFound,
    );
    integra.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_name_then_reregister() {
    let bus = MemoryDiscovery::new();
    let integra = node(&bus).await;

    integra.register("calc", calc()).unwrap();
    let err = integra.register("calc", calc()).unwrap_err();
    assert!(matches!(err, IntegraError::DuplicateName { .. }));

    integra.unregister("calc").await.unwrap();
    assert!(integra.lookup_local("calc").is_none());
    integra.register("calc", calc()).unwrap();
    assert!(integra.lookup_local("calc").is_some());

    integra.shutdown().await;
}

#[tokio::test]
async fn test_unregister_unknown_name() {
    let bus = MemoryDiscovery::new();
    let integra = node(&bus).await;

    let err = integra.unregister("nothing").await.unwrap_err();
    assert!(matches!(err, IntegraError::NotFound { .. }));
    integra.shutdown().await;
}

#[tokio::test]
async fn test_invalid_names_rejected() {
    let bus = MemoryDiscovery::new();
    let integra = node(&bus).await;

    let too_long = "x".repeat(41);
    for bad in ["", "has space", "dots.are.labels", too_long.as_str()] {
        let err = integra.register(bad, calc()).unwrap_err();
        assert!(matches!(err, IntegraError::InvalidName { .. }), "{:?}", bad);
    }
    integra.shutdown().await;
}

#[tokio::test]
async fn test_register_after_shutdown_fails() {
    let bus = MemoryDiscovery::new();
    let integra = node(&bus).await;
    integra.shutdown().await;

    assert!(integra.register("calc", calc()).is_err());
    assert!(integra.server_addr().is_none());
}

// ---------------------------------------------------------------------------
// Cross-instance calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_calc() {
    let bus = MemoryDiscovery::new();
    let server = node(&bus).await;
    let client = node(&bus).await;
    server.register("calc", calc()).unwrap();

    let endpoint = client.resolve("calc").await.unwrap();
    match &endpoint {
        Endpoint::Remote(record) => {
            assert_eq!(record.node, server.node_id());
            assert_eq!(record.socket_addr(), server.advertised_addr());
        }
        other => panic!("Expected Remote, got: {:?}", other),
    }

    let sum = client
        .resolve_and_call("calc", "add", vec![2.into(), 3.into()], None)
        .await
        .unwrap();
    assert_eq!(sum, Value::Int(5));

    assert_remote_kind(
        client
            .resolve_and_call("calc", "subtract", vec![2.into(), 3.into()], None)
            .await,
        FaultKind::MethodNotFound,
    );

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_handler_faults_do_not_stop_server() {
    let bus = MemoryDiscovery::new();
    let server = node(&bus).await;
    let client = node(&bus).await;
    server.register("calc", calc()).unwrap();
    let proxy = client.service("calc").unwrap();

    assert_remote_kind(proxy.call("explode", vec![]).await, FaultKind::HandlerPanicked);
    assert_remote_kind(
        proxy.call("refuse", vec![]).await,
        FaultKind::Custom("refused".into()),
    );
    assert_remote_kind(
        proxy.call("add", vec![Value::from("two"), 3.into()]).await,
        FaultKind::InvalidArguments,
    );

    let shouted = proxy.call("shout", vec!["still here".into()]).await.unwrap();
    assert_eq!(shouted, Value::from("STILL HERE"));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_calls_matched_out_of_order() {
    let bus = MemoryDiscovery::new();
    let server = node(&bus).await;
    let client = node(&bus).await;
    server.register("slow", SlowEcho).unwrap();
    let endpoint = client.resolve("slow").await.unwrap();

    let slow = client.call(
        &endpoint,
        "echo_after",
        vec![Value::Int(300), Value::from("first")],
        None,
    );
    let fast = client.call(
        &endpoint,
        "echo_after",
        vec![Value::Int(10), Value::from("second")],
        None,
    );
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(slow.unwrap(), Value::from("first"));
    assert_eq!(fast.unwrap(), Value::from("second"));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_many_concurrent_callers() {
    let bus = MemoryDiscovery::new();
    let server = node(&bus).await;
    let client = node(&bus).await;
    server.register("slow", SlowEcho).unwrap();
    let proxy = client.service("slow").unwrap();

    let calls = (0..20i64).map(|i| {
        let proxy = proxy.clone();
        async move {
            let delay = Value::Int((20 - i) * 5);
            proxy.call("echo_after", vec![delay, Value::Int(i)]).await
        }
    });
    let results = futures::future::join_all(calls).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), Value::Int(i as i64));
    }

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_remote_call_timeout() {
    let bus = MemoryDiscovery::new();
    let server = node(&bus).await;
    let client = node(&bus).await;
    server.register("slow", SlowEcho).unwrap();
    let proxy = client
        .service("slow")
        .unwrap()
        .with_timeout(Duration::from_millis(50));

    let err = proxy
        .call("echo_after", vec![Value::Int(500), Value::Null])
        .await
        .unwrap_err();
    assert!(matches!(err, IntegraError::Timeout(_)));

    // The connection survives a timed-out call.
    let value = proxy
        .clone()
        .with_timeout(Duration::from_secs(2))
        .call("echo_after", vec![Value::Int(0), Value::Bool(true)])
        .await
        .unwrap();
    assert_eq!(value, Value::Bool(true));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_lost_service_is_forgotten() {
    let bus = MemoryDiscovery::new();
    let server = node(&bus).await;
    let client = node(&bus).await;
    server.register("calc", calc()).unwrap();

    let sum = client
        .resolve_and_call("calc", "add", vec![1.into(), 1.into()], None)
        .await
        .unwrap();
    assert_eq!(sum, Value::Int(2));

    // The withdrawal never arrives, so only the broken connection tells the
    // client that the service is gone.
    bus.set_drop_withdrawals(true);
    server.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = client
        .resolve_and_call("calc", "add", vec![1.into(), 1.into()], None)
        .await
        .unwrap_err();
    assert!(matches!(err, IntegraError::ConnectionLost { .. }), "{:?}", err);
    assert!(err.is_retryable());
    assert!(client.remote_services().is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn test_wait_for_service_sees_late_registration() {
    let bus = MemoryDiscovery::new();
    let server = node(&bus).await;
    let client = node(&bus).await;

    let late = server.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        late.register("calc", calc()).unwrap();
    });

    let proxy = client
        .wait_for_service("calc", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(proxy.name().as_str(), "calc");
    let sum = proxy.call("add", vec![4.into(), 5.into()]).await.unwrap();
    assert_eq!(sum, Value::Int(9));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_services_lists_local_and_remote() {
    let bus = MemoryDiscovery::new();
    let server = node(&bus).await;
    let client = node(&bus).await;
    client.register("mine", calc()).unwrap();
    server.register("theirs", calc()).unwrap();

    client.resolve("theirs").await.unwrap();
    let names: Vec<String> = client.services().iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["mine", "theirs"]);

    // Own records never show up as remote.
    assert!(client
        .remote_services()
        .iter()
        .all(|record| record.node != client.node_id()));

    client.shutdown().await;
    server.shutdown().await;
}

// ---------------------------------------------------------------------------
// Record lifetime (paused clock, no TCP traffic)
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_expired_record_is_unavailable() {
    let bus = MemoryDiscovery::new();
    let client = node(&bus).await;

    // A process that announced once and then vanished without a goodbye.
    bus.announce(&ServiceRecord {
        name: ServiceName::new("calc").unwrap(),
        node: "vanished".into(),
        host: "127.0.0.1".parse().unwrap(),
        port: 9,
        ttl_secs: 2,
        proto: integra::DiscoveryConfig::PROTOCOL_VERSION,
    })
    .await
    .unwrap();

    assert!(client.resolve("calc").await.is_ok());

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_unavailable(client.resolve("calc").await);
    assert_unavailable(
        client
            .resolve_and_call("calc", "add", vec![1.into(), 2.into()], None)
            .await,
    );
}

#[tokio::test(start_paused = true)]
async fn test_refresh_keeps_record_alive() {
    let bus = MemoryDiscovery::new();
    let server = short_lived_node(&bus).await;
    let client = node(&bus).await;
    server.register("calc", calc()).unwrap();

    assert!(client.resolve("calc").await.is_ok());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!client.resolve("calc").await.unwrap().is_local());
}

#[tokio::test(start_paused = true)]
async fn test_lost_withdrawal_expires_with_ttl() {
    let bus = MemoryDiscovery::new();
    let server = short_lived_node(&bus).await;
    let client = node(&bus).await;
    server.register("calc", calc()).unwrap();
    assert!(client.resolve("calc").await.is_ok());

    bus.set_drop_withdrawals(true);
    server.unregister("calc").await.unwrap();

    // Still cached: nobody told the client.
    assert!(client.resolve("calc").await.is_ok());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_unavailable(client.resolve("calc").await);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_service_times_out() {
    let bus = MemoryDiscovery::new();
    let client = node(&bus).await;

    let started = tokio::time::Instant::now();
    let result = client
        .wait_for_service("ghost", Duration::from_secs(1))
        .await;
    assert_unavailable(result);
    assert!(started.elapsed() >= Duration::from_secs(1));
}
