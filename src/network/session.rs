//! Peer session (C3): one connection's lifecycle — handshake, send/receive,
//! liveness tracking, and teardown.

use super::frame::{self, FrameError};
use rand::RngCore;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub const LIVENESS_WINDOW: Duration = Duration::from_secs(60);
pub const PING_MSG_TYPE: u8 = 0;
pub const PONG_MSG_TYPE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Frame(FrameError),
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Frame(e) => write!(f, "{e}"),
            SessionError::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<FrameError> for SessionError {
    fn from(e: FrameError) -> Self {
        SessionError::Frame(e)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A 128-bit random session identifier.
pub fn new_session_id() -> u128 {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    u128::from_le_bytes(bytes)
}

/// One peer connection. `send`/`receive` use independent halves of the
/// stream so a session can be read from and written to concurrently from
/// different tasks without a lock round-trip on every frame.
pub struct PeerSession {
    pub remote_address: SocketAddr,
    pub session_id: u128,
    reader: Mutex<BufReader<ReadHalf<TcpStream>>>,
    writer: Mutex<BufWriter<WriteHalf<TcpStream>>>,
    connected: AtomicBool,
    last_ping: Mutex<u64>,
}

impl PeerSession {
    pub fn new(stream: TcpStream, remote_address: SocketAddr) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            remote_address,
            session_id: new_session_id(),
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(BufWriter::new(write_half)),
            connected: AtomicBool::new(true),
            last_ping: Mutex::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Alive iff connected and the last ping/pong was observed within the
    /// 60s liveness window.
    pub async fn is_alive(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let last_ping = *self.last_ping.lock().await;
        now_secs().saturating_sub(last_ping) < LIVENESS_WINDOW.as_secs()
    }

    pub async fn send(&self, msg_type: u8, payload: &[u8]) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Closed);
        }
        let buf = frame::encode(msg_type, payload)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await.map_err(FrameError::from)?;
        writer.flush().await.map_err(FrameError::from)?;
        Ok(())
    }

    /// Block (cooperatively) until one frame arrives, or the stream errors.
    pub async fn receive(&self) -> Result<(u8, Vec<u8>), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Closed);
        }
        let mut reader = self.reader.lock().await;
        let result = frame::decode(&mut *reader).await;
        if result.is_err() {
            self.connected.store(false, Ordering::Relaxed);
        }
        Ok(result?)
    }

    /// Send a msg_type=0 frame with payload `"ping"` and update `last_ping`.
    pub async fn ping(&self) -> Result<(), SessionError> {
        self.send(PING_MSG_TYPE, b"ping").await?;
        *self.last_ping.lock().await = now_secs();
        Ok(())
    }

    /// Update `last_ping` on pong receipt.
    pub async fn note_pong(&self) {
        *self.last_ping.lock().await = now_secs();
    }

    /// Idempotent: further calls observe `is_connected() == false` and are
    /// no-ops.
    pub fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (PeerSession, PeerSession) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_stream, _) = listener.accept().await.unwrap();
        let client_stream = connect.await.unwrap();

        let client_addr = client_stream.local_addr().unwrap();
        let server_addr = server_stream.local_addr().unwrap();

        (
            PeerSession::new(server_stream, client_addr),
            PeerSession::new(client_stream, server_addr),
        )
    }

    #[tokio::test]
    async fn send_then_receive_roundtrips() {
        let (a, b) = connected_pair().await;
        a.send(7, b"hello").await.unwrap();
        let (msg_type, payload) = b.receive().await.unwrap();
        assert_eq!(msg_type, 7);
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (a, _b) = connected_pair().await;
        a.close();
        a.close();
        assert!(!a.is_connected());
        assert!(a.send(0, b"x").await.is_err());
    }
}
