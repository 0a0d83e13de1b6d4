use std::time::Duration;

use meshrpc::{
    core::{
        error::TransportError,
        types::{
            Dictionary,
            List,
            Value,
        },
    },
    peer::proxy::{
        Proxy,
        ProxyConfig,
    },
    registry::{
        descriptor::{
            ProcedureDescriptor,
            ResultKind,
        },
        procedure::sync_procedure,
    },
    server::server::{
        RpcServer,
        ServerConfig,
    },
    session::session::CallOutcome,
};

const SECRET: &str = "abcd1234";

async fn new_server(port: u16) -> RpcServer {
    let server = RpcServer::new(ServerConfig {
        port,
        secret: SECRET.to_owned(),
        path: "/ws/core".to_owned(),
        ..Default::default()
    });
    server
        .register(
            "basic_math",
            sync_procedure(
                ProcedureDescriptor::new("add", ResultKind::Value)
                    .positional("a")
                    .positional("b"),
                |args, _| {
                    let a = args.first().and_then(Value::integer).unwrap_or(0);
                    let b = args.get(1).and_then(Value::integer).unwrap_or(0);
                    Ok(Value::Integer(a + b))
                },
            ),
        )
        .await;
    server
}

async fn reserve_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn proxy_config(port: u16) -> ProxyConfig {
    ProxyConfig {
        host: "127.0.0.1".to_owned(),
        port,
        path: "/ws/core".to_owned(),
        secret: SECRET.to_owned(),
        namespace: "basic_math".to_owned(),
        ..Default::default()
    }
}

async fn assert_add(proxy: &Proxy) {
    assert_matches::assert_matches!(
        proxy
            .call(
                "add",
                List::from_iter([Value::Integer(1), Value::Integer(2)]),
                Dictionary::default(),
            )
            .await,
        Ok(CallOutcome::Value(Value::Integer(3)))
    );
}

#[tokio::test]
async fn connect_retries_until_server_is_reachable() {
    test_utils::setup::setup_test_environment();

    let port = reserve_port().await;
    let server = new_server(port).await;

    // Start the server only after the proxy's first connection attempt has
    // already failed; the retry policy bridges the gap.
    let delayed = server.clone();
    let start_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        delayed.start().await.unwrap();
    });

    let proxy = Proxy::connect(proxy_config(port)).await.unwrap();
    assert_add(&proxy).await;

    start_task.await.unwrap();
    proxy.close().await;
    server.shut_down().await;
}

#[tokio::test]
async fn call_reestablishes_session_with_same_id_after_close() {
    test_utils::setup::setup_test_environment();

    let server = new_server(0).await;
    server.start().await.unwrap();
    let port = server.local_addr().unwrap().port();

    let proxy = Proxy::connect(proxy_config(port)).await.unwrap();
    let session_id = proxy.session_id();
    assert_add(&proxy).await;

    // Drop the session; the next call must transparently come back with the
    // same session id, and the catalog must rebuild.
    proxy.close().await;
    assert_add(&proxy).await;
    assert_eq!(proxy.session_id(), session_id);

    assert_matches::assert_matches!(proxy.refresh().await, Ok(_));
    assert!(proxy.procedure("add").await.is_some());

    proxy.close().await;
    server.shut_down().await;
}

#[tokio::test]
async fn exhausted_retries_surface_transport_fault() {
    test_utils::setup::setup_test_environment();

    let server = new_server(0).await;
    server.start().await.unwrap();
    let port = server.local_addr().unwrap().port();

    let proxy = Proxy::connect(proxy_config(port)).await.unwrap();
    assert_add(&proxy).await;

    server.shut_down().await;
    // Give the accept loop time to drop the listener.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Every reconnection attempt fails; after the retry budget the fault is
    // surfaced as-is. This test spans the full 5 x 2s backoff window.
    assert_matches::assert_matches!(
        proxy
            .call(
                "add",
                List::from_iter([Value::Integer(1), Value::Integer(2)]),
                Dictionary::default(),
            )
            .await,
        Err(err) => {
            assert!(TransportError::retryable(&err), "expected a transport fault, got: {err:#}");
        }
    );
}
