use thiserror::Error;

/// Crate-wide error type. Individual subsystems (hub, dht, bootstrap,
/// discovery, nat, tracker, autodiscovery) define their own narrow error
/// enums and convert into this one at the boundary.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Frame/codec validation failure: bad magic, version, checksum, or length.
    #[error("decode error: {0}")]
    Decode(String),

    /// TCP connect failure. Inspect the wrapped `io::Error::kind()` to tell
    /// refused/unreachable/timed-out apart, per the spec's "Connect" kind.
    #[error("connect error: {0}")]
    Connect(#[source] std::io::Error),

    /// Unknown msg_type or a handler that reported failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Bucket full and all-alive, max_peers reached, or an empty bootstrap list.
    #[error("exhausted: {0}")]
    Exhaustion(&'static str),

    /// A blocking/awaited call returned because `is_running` flipped. Not a
    /// failure: callers treat this as clean termination.
    #[error("shutdown")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl NodeError {
    pub fn connect(err: std::io::Error) -> Self {
        NodeError::Connect(err)
    }

    /// True if this error should be treated as a routine, expected shutdown
    /// rather than surfaced as a failure.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, NodeError::Shutdown)
    }
}
