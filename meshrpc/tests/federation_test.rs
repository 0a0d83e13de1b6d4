use std::time::Duration;

use meshrpc::{
    core::types::{
        Dictionary,
        List,
        Value,
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
const NAMESPACE: &str = "shared";

/// Fast refresh so federation converges quickly under test.
const DISCOVERY_INTERVAL: Duration = Duration::from_millis(100);

async fn start_cluster_server(name: &str, function: &str) -> RpcServer {
    let server = RpcServer::new(ServerConfig {
        name: name.to_owned(),
        secret: SECRET.to_owned(),
        path: "/ws/cluster".to_owned(),
        discovery_interval: DISCOVERY_INTERVAL,
        ..Default::default()
    });
    server
        .register(
            NAMESPACE,
            sync_procedure(
                ProcedureDescriptor::new(function, ResultKind::Value).positional("data"),
                |mut args, _| Ok(args.pop().unwrap_or(Value::Null)),
            ),
        )
        .await;
    server.start().await.unwrap();
    server
}

fn upstream_config(parent: &RpcServer) -> ProxyConfig {
    let addr = parent.local_addr().unwrap();
    ProxyConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        path: "/ws/cluster".to_owned(),
        secret: SECRET.to_owned(),
        namespace: NAMESPACE.to_owned(),
        discovery_interval: DISCOVERY_INTERVAL,
        ..Default::default()
    }
}

async fn connect_proxy(server: &RpcServer) -> Proxy {
    let addr = server.local_addr().unwrap();
    Proxy::connect(ProxyConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        path: "/ws/cluster".to_owned(),
        secret: SECRET.to_owned(),
        namespace: NAMESPACE.to_owned(),
        discovery_interval: DISCOVERY_INTERVAL,
        ..Default::default()
    })
    .await
    .unwrap()
}

/// Polls discovery until the proxy mirrors the function, or gives up.
async fn wait_for_function(proxy: &Proxy, name: &str) -> bool {
    for _ in 0..100 {
        if proxy.procedure(name).await.is_some() {
            return true;
        }
        proxy.refresh().await.ok();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

async fn assert_identity_call(proxy: &Proxy, function: &str) {
    assert_matches::assert_matches!(
        proxy
            .call(
                function,
                List::from_iter([Value::String("payload".to_owned())]),
                Dictionary::default(),
            )
            .await,
        Ok(CallOutcome::Value(Value::String(data))) => {
            assert_eq!(data, "payload", "{function} should return its input unchanged");
        }
    );
}

#[tokio::test]
async fn chained_servers_republish_procedures() {
    test_utils::setup::setup_test_environment();

    let server_a = start_cluster_server("cluster-a", "cluster_a_func").await;
    let server_b = start_cluster_server("cluster-b", "cluster_b_func").await;
    let server_c = start_cluster_server("cluster-c", "cluster_c_func").await;

    server_b
        .attach_upstream(upstream_config(&server_a))
        .await
        .unwrap();
    server_c
        .attach_upstream(upstream_config(&server_b))
        .await
        .unwrap();

    // A proxy at the end of the chain reaches every node's procedure.
    let proxy = connect_proxy(&server_c).await;
    for function in ["cluster_a_func", "cluster_b_func", "cluster_c_func"] {
        assert!(
            wait_for_function(&proxy, function).await,
            "proxy never learned {function}"
        );
        assert_identity_call(&proxy, function).await;
    }

    proxy.close().await;
    server_c.shut_down().await;
    server_b.shut_down().await;
    server_a.shut_down().await;
}

#[tokio::test]
async fn root_server_learns_descendant_procedures() {
    test_utils::setup::setup_test_environment();

    let server_a = start_cluster_server("cluster-a", "cluster_a_func").await;
    let server_b = start_cluster_server("cluster-b", "cluster_b_func").await;
    let server_c = start_cluster_server("cluster-c", "cluster_c_func").await;

    server_b
        .attach_upstream(upstream_config(&server_a))
        .await
        .unwrap();
    server_c
        .attach_upstream(upstream_config(&server_b))
        .await
        .unwrap();

    // Procedures republish upward too: a proxy at the root sees the leaves.
    let proxy = connect_proxy(&server_a).await;
    for function in ["cluster_a_func", "cluster_b_func", "cluster_c_func"] {
        assert!(
            wait_for_function(&proxy, function).await,
            "proxy never learned {function}"
        );
        assert_identity_call(&proxy, function).await;
    }

    proxy.close().await;
    server_c.shut_down().await;
    server_b.shut_down().await;
    server_a.shut_down().await;
}

#[tokio::test]
async fn discovery_converges_without_duplicates() {
    test_utils::setup::setup_test_environment();

    let server_a = start_cluster_server("cluster-a", "cluster_a_func").await;
    let server_b = start_cluster_server("cluster-b", "cluster_b_func").await;

    server_b
        .attach_upstream(upstream_config(&server_a))
        .await
        .unwrap();

    let proxy = connect_proxy(&server_b).await;
    assert!(wait_for_function(&proxy, "cluster_a_func").await);
    assert!(wait_for_function(&proxy, "cluster_b_func").await);

    // Let several refresh rounds pass; the catalogs must not grow.
    tokio::time::sleep(DISCOVERY_INTERVAL * 10).await;
    let mut functions = proxy.functions().await;
    functions.sort();
    pretty_assertions::assert_eq!(
        functions,
        Vec::from_iter(["cluster_a_func".to_owned(), "cluster_b_func".to_owned()])
    );

    let descriptors = server_b
        .registry()
        .list(
            NAMESPACE,
            &meshrpc::registry::registry::ListFilter {
                upstream: true,
                all_functions: true,
                trigger: None,
            },
        )
        .await;
    assert_eq!(
        descriptors.len(),
        2,
        "each node must hold exactly one entry per distinct procedure"
    );

    proxy.close().await;
    server_b.shut_down().await;
    server_a.shut_down().await;
}

#[tokio::test]
async fn second_parent_for_namespace_is_rejected() {
    test_utils::setup::setup_test_environment();

    let server_a = start_cluster_server("cluster-a", "cluster_a_func").await;
    let server_b = start_cluster_server("cluster-b", "cluster_b_func").await;
    let server_c = start_cluster_server("cluster-c", "cluster_c_func").await;

    server_c
        .attach_upstream(upstream_config(&server_a))
        .await
        .unwrap();
    assert_matches::assert_matches!(
        server_c.attach_upstream(upstream_config(&server_b)).await,
        Err(err) => {
            assert!(err.to_string().contains("only one parent connection"));
        }
    );

    server_c.shut_down().await;
    server_b.shut_down().await;
    server_a.shut_down().await;
}
