//! Bootstrap client role (§4.7): joins the network via a configured seed
//! list, and announces this node's presence to already-connected peers.

use super::codec::{BootstrapMessage, BootstrapMessageType};
use crate::network::hub::NodeHub;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// How long `bootstrap()` waits for a seed's `bootstrap_response` before
/// treating that seed as a non-respondent.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// The configured seed list was empty.
    NoBootstrapNodes,
    /// Every configured seed failed to connect or respond.
    ConnectionFailed,
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::NoBootstrapNodes => write!(f, "no bootstrap nodes configured"),
            BootstrapError::ConnectionFailed => write!(f, "all bootstrap seeds failed"),
        }
    }
}

impl std::error::Error for BootstrapError {}

/// Iterate `seeds`, skipping any that match `local_addr`, connecting via
/// `hub` and sending `bootstrap_request` then `peer_list_request` to each.
/// Per §4.7, success means the seed *responded* — each attempt waits up to
/// [`RESPONSE_TIMEOUT`] for that seed's `bootstrap_response` frame; a seed
/// that never replies does not count, even if the connection and sends
/// succeeded. The rest of the failures are logged, not surfaced.
pub async fn bootstrap(
    hub: &NodeHub,
    local_addr: SocketAddr,
    seeds: &[SocketAddr],
) -> Result<usize, BootstrapError> {
    if seeds.is_empty() {
        return Err(BootstrapError::NoBootstrapNodes);
    }

    // `connect()` spawns a receive loop that dispatches through the hub's
    // global handler registry, so a `bootstrap_response` must be observed
    // through a registered handler rather than a manual `session.receive()`
    // call (which would race that loop for the same session). Register one
    // handler for this pass that resolves a per-session waiter.
    let pending: Arc<Mutex<HashMap<u128, oneshot::Sender<()>>>> = Arc::new(Mutex::new(HashMap::new()));
    {
        let pending = pending.clone();
        hub.register_handler(BootstrapMessageType::BootstrapResponse as u8, move |session, _payload| {
            let pending = pending.clone();
            Box::pin(async move {
                if let Some(tx) = pending.lock().remove(&session.session_id) {
                    let _ = tx.send(());
                }
                Ok(())
            })
        });
    }

    let mut successes = 0usize;

    for &seed in seeds {
        if seed == local_addr {
            continue;
        }

        let session = match hub.connect(seed).await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("bootstrap: seed {seed} unreachable: {e:?}");
                continue;
            }
        };

        let (tx, rx) = oneshot::channel();
        pending.lock().insert(session.session_id, tx);

        let request = BootstrapMessage::new(
            BootstrapMessageType::BootstrapRequest,
            local_addr.ip().to_string(),
            local_addr.port(),
            Vec::new(),
        );
        if let Err(e) = session
            .send(BootstrapMessageType::BootstrapRequest as u8, &request.encode())
            .await
        {
            log::warn!("bootstrap: request to {seed} failed: {e}");
            pending.lock().remove(&session.session_id);
            continue;
        }

        let peer_list_request = BootstrapMessage::new(
            BootstrapMessageType::PeerListRequest,
            local_addr.ip().to_string(),
            local_addr.port(),
            Vec::new(),
        );
        if let Err(e) = session
            .send(
                BootstrapMessageType::PeerListRequest as u8,
                &peer_list_request.encode(),
            )
            .await
        {
            log::warn!("bootstrap: peer_list_request to {seed} failed: {e}");
            pending.lock().remove(&session.session_id);
            continue;
        }

        match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(())) => successes += 1,
            _ => {
                pending.lock().remove(&session.session_id);
                log::warn!("bootstrap: seed {seed} did not respond within {RESPONSE_TIMEOUT:?}");
            }
        }
    }

    if successes == 0 {
        return Err(BootstrapError::ConnectionFailed);
    }
    Ok(successes)
}

/// Broadcast a `node_announcement` carrying `"<address>:<port>"` to every
/// currently-connected peer.
pub async fn announce(hub: &NodeHub, local_addr: SocketAddr) {
    let payload = format!("{}:{}", local_addr.ip(), local_addr.port());
    let message = BootstrapMessage::new(
        BootstrapMessageType::NodeAnnouncement,
        local_addr.ip().to_string(),
        local_addr.port(),
        payload.into_bytes(),
    );
    hub.broadcast(BootstrapMessageType::NodeAnnouncement as u8, &message.encode())
        .await;
}

/// Parse a `peer_list_response` payload: either a JSON array of strings or a
/// comma-separated `host:port` list.
pub fn parse_peer_list_response(payload: &[u8]) -> Vec<SocketAddr> {
    let Ok(text) = std::str::from_utf8(payload) else {
        return Vec::new();
    };
    let text = text.trim();

    if text.starts_with('[') {
        if let Ok(entries) = serde_json::from_str::<Vec<String>>(text) {
            return entries.iter().filter_map(|s| s.parse().ok()).collect();
        }
        return Vec::new();
    }

    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// Connect to `addr` with up to 3 retries spaced 1 s apart, stopping at the
/// first success.
pub async fn connect_with_retries(hub: &NodeHub, addr: SocketAddr) -> bool {
    const MAX_RETRIES: u32 = 3;
    for attempt in 1..=MAX_RETRIES {
        match hub.connect(addr).await {
            Ok(_) => return true,
            Err(e) => {
                log::debug!("connect_with_retries: attempt {attempt} to {addr} failed: {e:?}");
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::NodeId;

    #[test]
    fn parse_peer_list_response_accepts_json_array() {
        let payload = br#"["127.0.0.1:9001","127.0.0.1:9002"]"#;
        let addrs = parse_peer_list_response(payload);
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn parse_peer_list_response_accepts_csv() {
        let payload = b"127.0.0.1:9001, 127.0.0.1:9002";
        let addrs = parse_peer_list_response(payload);
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn parse_peer_list_response_rejects_garbage() {
        let addrs = parse_peer_list_response(b"not an address list");
        assert!(addrs.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_with_empty_seed_list_errors() {
        let hub = NodeHub::new(NodeId::random());
        let local: SocketAddr = "127.0.0.1:19000".parse().unwrap();
        let result = bootstrap(&hub, local, &[]).await;
        assert_eq!(result, Err(BootstrapError::NoBootstrapNodes));
    }

    #[tokio::test]
    async fn bootstrap_succeeds_with_one_reachable_seed() {
        let listener_hub = NodeHub::new(NodeId::random());
        let bound = listener_hub
            .start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        // A seed only counts as a success once it actually responds, so the
        // listener side needs its server handlers wired up.
        let server = Arc::new(crate::bootstrap::server::BootstrapServer::with_default_capacity());
        crate::bootstrap::register_handlers(&listener_hub, server, bound);
        let listener_hub_clone = listener_hub.clone();
        tokio::spawn(async move {
            let _ = listener_hub_clone.accept_loop().await;
        });

        let client_hub = NodeHub::new(NodeId::random());
        let local: SocketAddr = "127.0.0.1:19100".parse().unwrap();
        let unreachable: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let result = bootstrap(&client_hub, local, &[unreachable, bound]).await;
        assert_eq!(result, Ok(1));
    }
}
