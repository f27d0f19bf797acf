//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::RawQuery, extract::State, http::StatusCode, routing::get, Router};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracking_relay::tracking::{BeaconTransport, DeliveryError};

pub const TOKEN: &str = "56ced3748e5df1b6be1e5c56aca45e7a";
pub const USER_AGENT: &str = "thisisauseragent";

/// Parse the query string of a beacon URL.
pub fn query_params(url: &str) -> HashMap<String, String> {
    let query = url.split_once('?').map(|(_, q)| q).unwrap_or(url);
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// In-process transport that records every beacon URL.
pub struct RecordingTransport {
    tx: mpsc::UnboundedSender<String>,
    status: StatusCode,
}

impl RecordingTransport {
    pub fn new(status: StatusCode) -> (Arc<Self>, Beacons) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, status }), Beacons(rx))
    }
}

impl BeaconTransport for RecordingTransport {
    fn get(&self, url: String) -> BoxFuture<'static, Result<StatusCode, DeliveryError>> {
        let _ = self.tx.send(url);
        let status = self.status;
        async move { Ok(status) }.boxed()
    }
}

/// Receiving end of recorded beacons.
pub struct Beacons(mpsc::UnboundedReceiver<String>);

impl Beacons {
    /// Wait for the next beacon URL.
    pub async fn next_url(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.0.recv())
            .await
            .expect("no beacon delivered in time")
            .expect("transport dropped")
    }

    /// Wait for the next beacon and decode its parameters.
    pub async fn next(&mut self) -> HashMap<String, String> {
        query_params(&self.next_url().await)
    }

    /// Assert that no beacon arrives within a short window.
    pub async fn assert_none(&mut self) {
        let received = tokio::time::timeout(Duration::from_millis(200), self.0.recv()).await;
        assert!(!matches!(received, Ok(Some(_))), "unexpected beacon: {:?}", received);
    }
}

/// Start a collector on an ephemeral port that answers `status` and reports
/// every received query.
pub async fn start_mock_collector(status: StatusCode) -> (SocketAddr, mpsc::UnboundedReceiver<HashMap<String, String>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route(
            "/piwik.php",
            get(
                |State((tx, status)): State<(mpsc::UnboundedSender<HashMap<String, String>>, StatusCode)>,
                 RawQuery(query): RawQuery| async move {
                    let _ = tx.send(query_params(&query.unwrap_or_default()));
                    status
                },
            ),
        )
        .with_state((tx, status));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, rx)
}

/// Start a simple mock backend on an ephemeral port that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
