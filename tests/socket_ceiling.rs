//! Open-socket ceiling under load.
//!
//! Kept in its own test binary: descriptor numbers are process-wide, so any
//! test running alongside would shift the floor this one measures.

#![cfg(unix)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use massprobe::socket::descriptor_floor;
use massprobe::{Engine, EngineConfig, ProbeSpec, ScanMode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Room above the floor the engine may use for its own sockets.
const ROOM: usize = 3;

#[tokio::test]
async fn open_sockets_stay_under_ceiling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let live = Arc::new(AtomicUsize::new(0));
    let most = Arc::new(AtomicUsize::new(0));

    let (l, m) = (live.clone(), most.clone());
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let now = l.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            let l = l.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 256];
                let _ = stream.read(&mut buf).await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nok\r\n")
                    .await;
                let _ = stream.shutdown().await;
                l.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    let floor = descriptor_floor().unwrap();
    let cfg = EngineConfig {
        workers: 8,
        max_sockets: floor + ROOM,
        port,
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
        write_timeout: Duration::from_secs(2),
        pause: Duration::from_millis(1),
        ..EngineConfig::default()
    };
    let engine = Engine::new(vec![ProbeSpec::new("/")], cfg, ScanMode::SingleHost).unwrap();
    for _ in 0..16 {
        engine.submit("127.0.0.1").await;
    }
    let snap = tokio::time::timeout(Duration::from_secs(20), engine.drain())
        .await
        .expect("drain timed out");

    assert_eq!(snap.probes, 16);
    assert_eq!(snap.resources, 16);
    let most = most.load(Ordering::SeqCst);
    assert!(most >= 1 && most <= ROOM, "server saw {most} concurrent connections");
    // eight workers competing for three descriptors must have waited
    assert!(snap.socket_retries > 0);
}
