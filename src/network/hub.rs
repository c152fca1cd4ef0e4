//! Node hub (C4): owns the listening endpoint and the set of peer sessions,
//! dispatches inbound messages to typed handlers, and broadcasts outbound
//! messages.

use super::session::PeerSession;
use crate::dht::NodeId;
use crate::error::NodeError;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

pub const PING_MSG_TYPE: u8 = 0;
pub const PONG_MSG_TYPE: u8 = 1;
pub const BLOCK_MSG_TYPE: u8 = 2;
pub const TRANSACTION_MSG_TYPE: u8 = 3;
pub const HANDSHAKE_MSG_TYPE: u8 = 5;

pub const MAX_BIND_RETRIES: u16 = 10;

/// An installed dispatch target for one msg_type. Receives the originating
/// session (to reply/inspect the peer) and the decoded payload.
pub type Handler = Arc<dyn Fn(Arc<PeerSession>, Vec<u8>) -> BoxFuture<'static, Result<(), NodeError>> + Send + Sync>;

/// Known failure classes for `connect`, matching §7's "Connect" error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Refused,
    Unreachable,
    TimedOut,
    Other,
}

impl ConnectFailure {
    fn classify(err: &std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            ConnectionRefused => ConnectFailure::Refused,
            TimedOut => ConnectFailure::TimedOut,
            HostUnreachable | NetworkUnreachable | AddrNotAvailable => ConnectFailure::Unreachable,
            _ => ConnectFailure::Other,
        }
    }
}

struct Inner {
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    sessions: RwLock<HashMap<u128, Arc<PeerSession>>>,
    handlers: RwLock<HashMap<u8, Handler>>,
    local_id: NodeId,
    is_running: AtomicBool,
}

/// Owns the listener and peer set for one local node.
#[derive(Clone)]
pub struct NodeHub {
    inner: Arc<Inner>,
}

impl NodeHub {
    pub fn new(local_id: NodeId) -> Self {
        let hub = Self {
            inner: Arc::new(Inner {
                listener: tokio::sync::Mutex::new(None),
                sessions: RwLock::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                local_id,
                is_running: AtomicBool::new(true),
            }),
        };
        hub.register_default_handlers();
        hub
    }

    fn register_default_handlers(&self) {
        self.register_handler(PING_MSG_TYPE, |session, _payload| {
            Box::pin(async move {
                session
                    .send(PONG_MSG_TYPE, b"pong")
                    .await
                    .map_err(|e| NodeError::Protocol(e.to_string()))
            })
        });
        self.register_handler(PONG_MSG_TYPE, |session, _payload| {
            Box::pin(async move {
                session.note_pong().await;
                Ok(())
            })
        });
        // msg_type 2 (block) and 3 (transaction) are left for a
        // chain-layer consumer to register; see `chain_consumer`.
    }

    pub fn local_id(&self) -> NodeId {
        self.inner.local_id
    }

    /// Bind the listener on `addr`'s port. On address-in-use, retry with
    /// port+1 up to `MAX_BIND_RETRIES` times; fail if none bind.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr, NodeError> {
        let mut attempt_addr = addr;
        let mut last_err = None;

        for _ in 0..=MAX_BIND_RETRIES {
            match TcpListener::bind(attempt_addr).await {
                Ok(listener) => {
                    let bound = listener.local_addr()?;
                    *self.inner.listener.lock().await = Some(listener);
                    log::info!("node hub listening on {bound}");
                    return Ok(bound);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    log::debug!("port {} in use, retrying on {}", attempt_addr.port(), attempt_addr.port() + 1);
                    attempt_addr.set_port(attempt_addr.port() + 1);
                    last_err = Some(e);
                }
                Err(e) => return Err(NodeError::Io(e)),
            }
        }

        Err(NodeError::Io(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free port found")
        })))
    }

    /// TCP-connect to `remote`, wrap in a session, append it, and send the
    /// handshake frame.
    pub async fn connect(&self, remote: SocketAddr) -> Result<Arc<PeerSession>, ConnectFailure> {
        let stream = TcpStream::connect(remote)
            .await
            .map_err(|e| ConnectFailure::classify(&e))?;
        let session = Arc::new(PeerSession::new(stream, remote));
        self.inner.sessions.write().insert(session.session_id, session.clone());

        let payload = format!("HANDSHAKE:{}", self.inner.local_id.to_hex());
        if session.send(HANDSHAKE_MSG_TYPE, payload.as_bytes()).await.is_err() {
            self.remove_session(session.session_id);
            return Err(ConnectFailure::Other);
        }

        let hub = self.clone();
        let recv_session = session.clone();
        tokio::spawn(async move {
            hub.handle_peer(recv_session).await;
        });

        Ok(session)
    }

    fn remove_session(&self, session_id: u128) {
        self.inner.sessions.write().remove(&session_id);
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn sessions_snapshot(&self) -> Vec<Arc<PeerSession>> {
        self.inner.sessions.read().values().cloned().collect()
    }

    /// Install `handler` as the dispatch target for `msg_type`, overwriting
    /// any prior registration. Default registrations: 0=ping, 1=pong,
    /// 2=block, 3=transaction. 10-15 are reserved for the DHT codec, 20-24
    /// for bootstrap — registering on those ranges is the caller's choice,
    /// not enforced here.
    pub fn register_handler<F>(&self, msg_type: u8, handler: F)
    where
        F: Fn(Arc<PeerSession>, Vec<u8>) -> BoxFuture<'static, Result<(), NodeError>> + Send + Sync + 'static,
    {
        self.inner.handlers.write().insert(msg_type, Arc::new(handler));
    }

    /// Indefinitely accept new connections and append them as sessions.
    /// Fatal (returns) if the listener itself errors; per-connection errors
    /// are logged and skipped.
    pub async fn accept_loop(&self) -> Result<(), NodeError> {
        loop {
            if !self.inner.is_running.load(Ordering::Relaxed) {
                return Err(NodeError::Shutdown);
            }

            let accepted = {
                let mut guard = self.inner.listener.lock().await;
                let listener = guard.as_mut().ok_or_else(|| {
                    NodeError::Protocol("accept_loop called before start()".to_string())
                })?;
                listener.accept().await
            };

            match accepted {
                Ok((stream, remote)) => {
                    let session = Arc::new(PeerSession::new(stream, remote));
                    self.inner.sessions.write().insert(session.session_id, session.clone());
                    log::info!("accepted peer {remote}");
                    let hub = self.clone();
                    tokio::spawn(async move {
                        hub.handle_peer(session).await;
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("listener error, stopping accept loop: {e}");
                    return Err(NodeError::Io(e));
                }
            }
        }
    }

    /// Per-session receive loop: dispatch to the handler registered for the
    /// received msg_type. On decode failure or EOF, the session is removed.
    /// Handler failures are logged and do not remove the peer.
    pub async fn handle_peer(&self, session: Arc<PeerSession>) {
        loop {
            if !self.inner.is_running.load(Ordering::Relaxed) {
                break;
            }

            match session.receive().await {
                Ok((msg_type, payload)) => {
                    let handler = self.inner.handlers.read().get(&msg_type).cloned();
                    match handler {
                        Some(handler) => {
                            if let Err(e) = handler(session.clone(), payload).await {
                                log::warn!("handler for msg_type {msg_type} failed: {e}");
                            }
                        }
                        None => {
                            log::warn!("no handler registered for msg_type {msg_type}");
                        }
                    }
                }
                Err(e) => {
                    log::info!("peer {} disconnected: {e}", session.remote_address);
                    break;
                }
            }
        }
        self.remove_session(session.session_id);
    }

    /// Send `(msg_type, payload)` to every currently-connected session.
    /// Best-effort: a per-peer send error is logged but does not abort the
    /// broadcast to the remaining peers.
    pub async fn broadcast(&self, msg_type: u8, payload: &[u8]) {
        let snapshot = self.sessions_snapshot();
        for session in snapshot {
            if let Err(e) = session.send(msg_type, payload).await {
                log::warn!("broadcast to {} failed: {e}", session.remote_address);
            }
        }
    }

    /// Send ping on every session.
    pub async fn ping_all(&self) {
        let snapshot = self.sessions_snapshot();
        for session in snapshot {
            if let Err(e) = session.ping().await {
                log::warn!("ping to {} failed: {e}", session.remote_address);
            }
        }
    }

    /// Flip the shutdown flag. `accept_loop`/`handle_peer` observe it and
    /// return within their next blocking-call boundary.
    pub fn stop(&self) {
        self.inner.is_running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::NodeId;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    #[tokio::test]
    async fn two_node_framed_echo() {
        let hub_a = NodeHub::new(NodeId::random());
        let addr_a = hub_a.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let echoed = Arc::new(StdAtomicBool::new(false));
        let echoed_clone = echoed.clone();
        hub_a.register_handler(7, move |session, payload| {
            let echoed = echoed_clone.clone();
            Box::pin(async move {
                echoed.store(true, Ordering::Relaxed);
                session
                    .send(8, &payload)
                    .await
                    .map_err(|e| NodeError::Protocol(e.to_string()))
            })
        });

        let hub_a_clone = hub_a.clone();
        tokio::spawn(async move {
            let _ = hub_a_clone.accept_loop().await;
        });

        // `connect` now spawns `handle_peer` on the outbound session too, so
        // the echo reply (msg_type 8) must be observed through a registered
        // handler rather than a manual `session.receive()` call racing it
        // for the same read lock.
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(parking_lot::Mutex::new(Some(tx)));
        let hub_b = NodeHub::new(NodeId::random());
        hub_b.register_handler(8, move |_session, payload| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(payload);
                }
                Ok(())
            })
        });

        let session_b = hub_b.connect(addr_a).await.unwrap();
        session_b.send(7, b"hello").await.unwrap();

        let payload = tokio::time::timeout(std::time::Duration::from_secs(1), rx)
            .await
            .expect("timed out waiting for echo")
            .unwrap();
        assert_eq!(payload, b"hello");
        assert!(echoed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn bind_retries_on_addr_in_use() {
        let hub_a = NodeHub::new(NodeId::random());
        let addr = hub_a.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let hub_b = NodeHub::new(NodeId::random());
        let bound_b = hub_b.start(addr).await.unwrap();
        assert_ne!(addr.port(), bound_b.port());
    }
}
