//! Shared test helpers for KCP poller integration tests
#![allow(dead_code)]

use bytes::Bytes;
use kcp_poll::{Datagram, KcpConfig, KcpPoller, UdpTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Install a test-friendly subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Two UDP sockets on loopback, connected to each other.
pub async fn udp_pair() -> (UdpTransport, UdpTransport) {
    let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    a.connect(b.local_addr().unwrap()).await.unwrap();
    b.connect(a.local_addr().unwrap()).await.unwrap();
    (UdpTransport::new(a), UdpTransport::new(b))
}

/// A client/server pair of sessions on loopback sharing `conv`.
pub async fn poller_pair(
    conv: u32,
    config: KcpConfig,
) -> (KcpPoller<UdpTransport>, KcpPoller<UdpTransport>) {
    init_tracing();
    let (a, b) = udp_pair().await;
    (
        KcpPoller::new(conv, a, config.clone()).unwrap(),
        KcpPoller::new(conv, b, config).unwrap(),
    )
}

pub fn payload(i: usize, len: usize) -> Bytes {
    Bytes::from((0..len).map(|j| (i * 7 + j) as u8).collect::<Vec<u8>>())
}

/// Send `messages` from `client` to `server` with both sides polling, until
/// every message is acknowledged. Returns what `server` read, in order.
pub async fn transfer<T: Datagram, U: Datagram>(
    client: &mut KcpPoller<T>,
    server: &mut KcpPoller<U>,
    messages: Vec<Bytes>,
    limit: Duration,
) -> Vec<Bytes> {
    let done = AtomicBool::new(false);
    let tick = Some(Duration::from_millis(5));

    let sender = async {
        for msg in messages {
            while client.unacked_count() > 256 {
                client.poll_read(tick).await.unwrap();
            }
            client.send(msg).unwrap();
        }
        while client.unacked_count() > 0 {
            client.poll_read(tick).await.unwrap();
        }
        done.store(true, Ordering::Release);
    };

    let receiver = async {
        let mut received = Vec::new();
        while !done.load(Ordering::Acquire) {
            if let Some(msg) = server.poll_read(tick).await.unwrap() {
                received.push(msg);
            }
        }
        received
    };

    let ((), mut received) = tokio::time::timeout(limit, async { tokio::join!(sender, receiver) })
        .await
        .expect("transfer did not complete in time");

    while let Some(msg) = server.recv() {
        received.push(msg);
    }
    received
}
