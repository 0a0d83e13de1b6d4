use anyhow::Error;
use futures_util::StreamExt;
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
        procedure::sequence_procedure,
    },
    server::server::{
        RpcServer,
        ServerConfig,
    },
    session::session::CallOutcome,
};

const SECRET: &str = "abcd1234";

async fn start_server() -> RpcServer {
    let server = RpcServer::new(ServerConfig {
        secret: SECRET.to_owned(),
        path: "/ws/core".to_owned(),
        ..Default::default()
    });

    server
        .register(
            "core",
            sequence_procedure(
                ProcedureDescriptor::new("generator", ResultKind::Sequence),
                |_, _| {
                    Ok(futures_util::stream::iter([
                        Ok(Value::Integer(1)),
                        Ok(Value::Float(2.0)),
                        Ok(Value::Bool(false)),
                        Ok(Value::List(List::from_iter([
                            Value::Integer(1),
                            Value::Integer(2),
                            Value::Integer(3),
                        ]))),
                    ])
                    .boxed())
                },
            ),
        )
        .await;
    server
        .register(
            "core",
            sequence_procedure(
                ProcedureDescriptor::new("repeat", ResultKind::Sequence)
                    .positional("data")
                    .positional("count"),
                |args, _| {
                    let data = args.first().cloned().unwrap_or(Value::Null);
                    let count = args.get(1).and_then(Value::integer).unwrap_or(0);
                    Ok(futures_util::stream::iter(
                        (0..count).map(move |_| Ok(data.clone())).collect::<Vec<_>>(),
                    )
                    .boxed())
                },
            ),
        )
        .await;
    server
        .register(
            "core",
            sequence_procedure(
                ProcedureDescriptor::new("broken_generator", ResultKind::Sequence),
                |_, _| {
                    Ok(futures_util::stream::iter([
                        Ok(Value::Integer(1)),
                        Err(Error::msg("source blew up")),
                    ])
                    .boxed())
                },
            ),
        )
        .await;

    server.start().await.unwrap();
    server
}

async fn connect_proxy(server: &RpcServer) -> Proxy {
    let addr = server.local_addr().unwrap();
    Proxy::connect(ProxyConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        path: "/ws/core".to_owned(),
        secret: SECRET.to_owned(),
        namespace: "core".to_owned(),
        ..Default::default()
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn cursor_yields_source_sequence_in_order() {
    test_utils::setup::setup_test_environment();

    let server = start_server().await;
    let proxy = connect_proxy(&server).await;

    let mut sequence = match proxy
        .call("generator", List::default(), Dictionary::default())
        .await
    {
        Ok(CallOutcome::Sequence(sequence)) => sequence,
        other => panic!("expected a lazy sequence, got {other:?}"),
    };

    let mut items = Vec::new();
    while let Some(item) = sequence.next().await.unwrap() {
        items.push(item);
    }
    pretty_assertions::assert_eq!(
        items,
        Vec::from_iter([
            Value::Integer(1),
            Value::Float(2.0),
            Value::Bool(false),
            Value::List(List::from_iter([
                Value::Integer(1),
                Value::Integer(2),
                Value::Integer(3),
            ])),
        ])
    );

    // The sequence stays terminated after the end sentinel.
    assert_matches::assert_matches!(sequence.next().await, Ok(None));

    proxy.close().await;
    server.shut_down().await;
}

#[tokio::test]
async fn cursor_consumes_as_stream() {
    test_utils::setup::setup_test_environment();

    let server = start_server().await;
    let proxy = connect_proxy(&server).await;

    let sequence = match proxy
        .call(
            "repeat",
            List::from_iter([Value::String("x".to_owned()), Value::Integer(3)]),
            Dictionary::default(),
        )
        .await
    {
        Ok(CallOutcome::Sequence(sequence)) => sequence,
        other => panic!("expected a lazy sequence, got {other:?}"),
    };

    let items = sequence
        .into_stream()
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    pretty_assertions::assert_eq!(
        items,
        Vec::from_iter([
            Value::String("x".to_owned()),
            Value::String("x".to_owned()),
            Value::String("x".to_owned()),
        ])
    );

    proxy.close().await;
    server.shut_down().await;
}

#[tokio::test]
async fn cursor_surfaces_source_error() {
    test_utils::setup::setup_test_environment();

    let server = start_server().await;
    let proxy = connect_proxy(&server).await;

    let mut sequence = match proxy
        .call("broken_generator", List::default(), Dictionary::default())
        .await
    {
        Ok(CallOutcome::Sequence(sequence)) => sequence,
        other => panic!("expected a lazy sequence, got {other:?}"),
    };

    assert_matches::assert_matches!(sequence.next().await, Ok(Some(Value::Integer(1))));
    assert_matches::assert_matches!(sequence.next().await, Err(err) => {
        assert!(err.to_string().contains("source blew up"));
    });
    // A failed cursor terminates; later pulls yield nothing.
    assert_matches::assert_matches!(sequence.next().await, Ok(None));

    proxy.close().await;
    server.shut_down().await;
}

#[tokio::test]
async fn concurrent_cursors_do_not_interfere() {
    test_utils::setup::setup_test_environment();

    let server = start_server().await;
    let proxy = connect_proxy(&server).await;

    let mut first = match proxy
        .call(
            "repeat",
            List::from_iter([Value::Integer(7), Value::Integer(2)]),
            Dictionary::default(),
        )
        .await
    {
        Ok(CallOutcome::Sequence(sequence)) => sequence,
        other => panic!("expected a lazy sequence, got {other:?}"),
    };
    let mut second = match proxy
        .call(
            "repeat",
            List::from_iter([Value::Integer(8), Value::Integer(2)]),
            Dictionary::default(),
        )
        .await
    {
        Ok(CallOutcome::Sequence(sequence)) => sequence,
        other => panic!("expected a lazy sequence, got {other:?}"),
    };

    // Interleave pulls across the two cursors.
    assert_matches::assert_matches!(first.next().await, Ok(Some(Value::Integer(7))));
    assert_matches::assert_matches!(second.next().await, Ok(Some(Value::Integer(8))));
    assert_matches::assert_matches!(first.next().await, Ok(Some(Value::Integer(7))));
    assert_matches::assert_matches!(second.next().await, Ok(Some(Value::Integer(8))));
    assert_matches::assert_matches!(first.next().await, Ok(None));
    assert_matches::assert_matches!(second.next().await, Ok(None));

    proxy.close().await;
    server.shut_down().await;
}
