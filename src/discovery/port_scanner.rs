//! Port scanner (§4.8): up to 20 parallel workers TCP-connecting to a
//! (host, port) grid with a 1 s timeout, gated by an Eastsea-specific
//! handshake so an open port alone doesn't count as a live peer.
//!
//! The source had two diverging behaviors here — one treats any open TCP
//! port as "active", the other additionally requires the handshake exchange.
//! This keeps the stricter one: a bare open port is not evidence of an
//! Eastsea node.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const MAX_WORKERS: usize = 20;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const HANDSHAKE_PROBE: &[u8] = b"EASTSEA_HANDSHAKE";
pub const HANDSHAKE_ACK: &[u8] = b"EASTSEA_ACK";

/// Expand a `/24`-style base address with a port list into the full
/// (host, port) grid to scan.
pub fn build_targets(base: Ipv4Addr, ports: &[u16]) -> Vec<SocketAddr> {
    let octets = base.octets();
    (1u8..=254)
        .flat_map(|host| {
            let addr = Ipv4Addr::new(octets[0], octets[1], octets[2], host);
            ports.iter().map(move |&port| SocketAddr::new(IpAddr::V4(addr), port))
        })
        .collect()
}

async fn probe(addr: SocketAddr) -> bool {
    let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await;
    let Ok(Ok(mut stream)) = connect else {
        return false;
    };

    if stream.write_all(HANDSHAKE_PROBE).await.is_err() {
        return false;
    }

    let mut buf = [0u8; HANDSHAKE_ACK.len()];
    match tokio::time::timeout(CONNECT_TIMEOUT, stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => buf == *HANDSHAKE_ACK,
        _ => false,
    }
}

/// Scan `targets` with up to [`MAX_WORKERS`] concurrent workers pulling from
/// a shared atomic work-queue index. Returns the subset that answered the
/// Eastsea handshake.
pub async fn scan(targets: Vec<SocketAddr>) -> Vec<SocketAddr> {
    let targets = Arc::new(targets);
    let cursor = Arc::new(AtomicUsize::new(0));
    let worker_count = MAX_WORKERS.min(targets.len().max(1));

    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let targets = targets.clone();
        let cursor = cursor.clone();
        workers.push(tokio::spawn(async move {
            let mut found = Vec::new();
            loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                if index >= targets.len() {
                    break;
                }
                let addr = targets[index];
                if probe(addr).await {
                    found.push(addr);
                }
            }
            found
        }));
    }

    let mut active = Vec::new();
    for worker in workers {
        if let Ok(found) = worker.await {
            active.extend(found);
        }
    }
    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn build_targets_covers_the_24_and_every_port() {
        let targets = build_targets(Ipv4Addr::new(192, 168, 1, 0), &[8000, 8001]);
        assert_eq!(targets.len(), 254 * 2);
        assert!(targets.contains(&"192.168.1.1:8000".parse().unwrap()));
        assert!(targets.contains(&"192.168.1.254:8001".parse().unwrap()));
    }

    #[tokio::test]
    async fn scan_requires_the_handshake_not_just_an_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // Accept and drop without performing the handshake.
            let _ = listener.accept().await;
        });

        let active = scan(vec![addr]).await;
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn scan_accepts_a_peer_that_completes_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; HANDSHAKE_PROBE.len()];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, HANDSHAKE_PROBE);
            stream.write_all(HANDSHAKE_ACK).await.unwrap();
        });

        let active = scan(vec![addr]).await;
        assert_eq!(active, vec![addr]);
    }
}
