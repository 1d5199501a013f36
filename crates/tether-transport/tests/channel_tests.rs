//! End-to-end tests of channels and servers over loopback TCP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether_core::{Metadata, Status, StatusCode};
use tether_transport::{
    CallRequest, ChannelBuilder, Endpoint, Router, Server, ServerCall, ServerConfig,
    TransportError,
};

async fn echo(call: ServerCall) -> Result<(), Status> {
    let (sender, mut receiver) = call.split();
    while let Some(msg) = receiver
        .message()
        .await
        .map_err(|e| Status::internal(e.to_string()))?
    {
        sender
            .send(msg)
            .map_err(|e| Status::internal(e.to_string()))?;
    }
    Ok(())
}

async fn reject(_call: ServerCall) -> Result<(), Status> {
    Err(Status::invalid_argument("rejected"))
}

async fn start_server(router: Router) -> (Server, Endpoint) {
    let server = Server::new(
        ServerConfig::new("test-server", "127.0.0.1:0".parse().unwrap()),
        router,
    );
    server.start().await.unwrap();
    let endpoint = Endpoint::from(server.local_addr().unwrap());
    (server, endpoint)
}

#[tokio::test]
async fn echo_over_channel() {
    let (server, endpoint) = start_server(Router::new().route("test/Echo", echo)).await;
    let channel = ChannelBuilder::for_endpoint(endpoint).build().unwrap();

    let (sender, mut receiver) = channel.open_call("test/Echo").await.unwrap().split();
    for i in 0..10u8 {
        sender.send(vec![i; 3]).unwrap();
    }
    for i in 0..10u8 {
        assert_eq!(receiver.message().await.unwrap(), Some(vec![i; 3]));
    }
    sender.half_close().unwrap();
    assert_eq!(receiver.message().await.unwrap(), None);
    assert_eq!(channel.connects(), 1);

    channel.shutdown();
    server.stop().await;
}

#[tokio::test]
async fn concurrent_calls_share_one_connection() {
    let (server, endpoint) = start_server(Router::new().route("test/Echo", echo)).await;
    let channel = ChannelBuilder::for_endpoint(endpoint).build().unwrap();

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move {
            let (sender, mut receiver) = channel.open_call("test/Echo").await.unwrap().split();
            sender.send(vec![i]).unwrap();
            receiver.message().await.unwrap()
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), Some(vec![i as u8]));
    }
    assert_eq!(channel.connects(), 1);

    server.stop().await;
}

#[tokio::test]
async fn handler_status_reaches_caller() {
    let (server, endpoint) = start_server(Router::new().route("test/Reject", reject)).await;
    let channel = ChannelBuilder::for_endpoint(endpoint).build().unwrap();

    let (_sender, mut receiver) = channel.open_call("test/Reject").await.unwrap().split();
    let err = receiver.message().await.unwrap_err();
    let status = err.status().unwrap();
    assert_eq!(status.code, StatusCode::InvalidArgument);
    assert_eq!(status.message, "rejected");

    server.stop().await;
}

#[tokio::test]
async fn interceptors_attach_headers_in_order() {
    let seen: Arc<Mutex<Vec<Metadata>>> = Arc::default();
    let router = {
        let seen = Arc::clone(&seen);
        Router::new().route("test/Headers", move |call: ServerCall| {
            seen.lock().unwrap().push(call.headers().clone());
            async { Ok::<(), Status>(()) }
        })
    };
    let (server, endpoint) = start_server(router).await;

    let channel = ChannelBuilder::for_endpoint(endpoint)
        .intercept(|req: &mut CallRequest| {
            req.headers.insert("self-uin", "10001").unwrap();
            req.headers.insert("x-order", "first").unwrap();
        })
        .intercept(|req: &mut CallRequest| {
            req.headers.insert("x-order", "second").unwrap();
        })
        .build()
        .unwrap();

    let (_sender, mut receiver) = channel.open_call("test/Headers").await.unwrap().split();
    assert_eq!(receiver.message().await.unwrap(), None);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("self-uin"), Some("10001"));
    assert_eq!(seen[0].get("x-order"), Some("second"));

    drop(seen);
    server.stop().await;
}

#[tokio::test]
async fn channel_redials_after_connection_loss() {
    let (server, endpoint) = start_server(Router::new().route("test/Echo", echo)).await;
    let channel = ChannelBuilder::for_endpoint(endpoint.clone())
        .enable_retry(20, Duration::from_millis(25))
        .build()
        .unwrap();

    let (_sender, mut receiver) = channel.open_call("test/Echo").await.unwrap().split();
    server.stop().await;
    assert!(matches!(
        receiver.message().await,
        Err(TransportError::ConnectionLost)
    ));

    // A new server on the same port; the channel must dial it on the next call.
    let addr = format!("{}", endpoint).parse().unwrap();
    let server = Server::new(
        ServerConfig::new("test-server-2", addr),
        Router::new().route("test/Echo", echo),
    );
    server.start().await.unwrap();

    let (sender, mut receiver) = channel.open_call("test/Echo").await.unwrap().split();
    sender.send(vec![7]).unwrap();
    assert_eq!(receiver.message().await.unwrap(), Some(vec![7]));
    assert_eq!(channel.connects(), 2);

    server.stop().await;
}

#[tokio::test]
async fn dropping_receiver_cancels_server_side() {
    let (cancelled_tx, mut cancelled_rx) = tokio::sync::mpsc::unbounded_channel();
    let router = Router::new().route("test/Watch", move |call: ServerCall| {
        let cancelled_tx = cancelled_tx.clone();
        async move {
            let (_sender, mut receiver) = call.split();
            let outcome = receiver.message().await;
            let _ = cancelled_tx.send(
                outcome
                    .err()
                    .and_then(|e| e.status().map(|s| s.code)),
            );
            Ok::<(), Status>(())
        }
    });
    let (server, endpoint) = start_server(router).await;
    let channel = ChannelBuilder::for_endpoint(endpoint).build().unwrap();

    let call = channel.open_call("test/Watch").await.unwrap();
    drop(call);

    let code = tokio::time::timeout(Duration::from_secs(2), cancelled_rx.recv())
        .await
        .expect("server should observe the cancellation")
        .unwrap();
    assert_eq!(code, Some(StatusCode::Cancelled));

    server.stop().await;
}

#[tokio::test]
async fn shutdown_fails_open_calls() {
    let (server, endpoint) = start_server(Router::new().route("test/Echo", echo)).await;
    let channel = ChannelBuilder::for_endpoint(endpoint).build().unwrap();

    let (_sender, mut receiver) = channel.open_call("test/Echo").await.unwrap().split();
    channel.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(2), receiver.message())
        .await
        .expect("open call should end after shutdown");
    assert!(matches!(result, Err(TransportError::ConnectionLost)));
    assert!(matches!(
        channel.open_call("test/Echo").await,
        Err(TransportError::Shutdown)
    ));

    server.stop().await;
}
