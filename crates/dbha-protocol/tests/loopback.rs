//! Wire protocol over a real loopback socket.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dbha_protocol::{FrameError, ReportClient, serve};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

fn known() -> Arc<HashSet<String>> {
    Arc::new(["tcp".to_string(), "redis".to_string()].into_iter().collect())
}

#[tokio::test]
async fn client_reports_are_received_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, mut rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(serve(listener, known(), tx, shutdown_rx));

    let mut client = ReportClient::new(addr, Duration::from_secs(2));
    for i in 0..3 {
        client
            .send("redis", format!("report-{i}").as_bytes())
            .await
            .unwrap();
    }
    assert!(client.is_connected());

    for i in 0..3 {
        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.frame.engine_type, "redis");
        assert_eq!(&inbound.frame.body[..], format!("report-{i}").as_bytes());
    }

    let _ = shutdown_tx.send(true);
    server.await.unwrap();
}

#[tokio::test]
async fn client_fails_without_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut client = ReportClient::new(addr, Duration::from_millis(500));
    let err = client.send("tcp", b"x").await.unwrap_err();
    assert!(matches!(err, FrameError::Io(_) | FrameError::Timeout(_)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn unregistered_engine_is_never_acknowledged() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, mut rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve(listener, known(), tx, shutdown_rx));

    let mut client = ReportClient::new(addr, Duration::from_millis(300));
    let err = client.send("mongodb", b"{}").await.unwrap_err();
    assert!(matches!(err, FrameError::Timeout(_)));
    assert!(rx.try_recv().is_err());
}
