//! Network module: framed transport (C2), peer session (C3), and the node
//! hub (C4) that owns the listener and peer set.

pub mod frame;
pub mod hub;
pub mod session;

pub use frame::{decode, encode, FrameError, MAGIC, MAX_PAYLOAD_SIZE, VERSION};
pub use hub::{ConnectFailure, Handler, NodeHub};
pub use session::{PeerSession, SessionError};
