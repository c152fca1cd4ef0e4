//! Bootstrap (C7): join-the-network client operations, the known-peers
//! server role, and the wire codec they share.

pub mod client;
pub mod codec;
pub mod server;

pub use client::{announce, bootstrap, connect_with_retries, parse_peer_list_response, BootstrapError};
pub use codec::{BootstrapCodecError, BootstrapMessage, BootstrapMessageType};
pub use server::BootstrapServer;

use crate::network::hub::NodeHub;
use std::net::SocketAddr;
use std::sync::Arc;

/// Wire the server-side handlers (`bootstrap_request`, `peer_list_request`,
/// `node_announcement`, `peer_list_response`) onto `hub`, backed by `server`.
pub fn register_handlers(hub: &NodeHub, server: Arc<BootstrapServer>, local_addr: SocketAddr) {
    hub.register_handler(BootstrapMessageType::BootstrapRequest as u8, {
        let server = server.clone();
        move |session, payload| {
            let server = server.clone();
            Box::pin(async move {
                if let Ok(msg) = BootstrapMessage::decode(&payload) {
                    server.note_peer(msg.sender_address, msg.sender_port);
                }
                let response = BootstrapMessage::new(
                    BootstrapMessageType::BootstrapResponse,
                    session.remote_address.ip().to_string(),
                    session.remote_address.port(),
                    Vec::new(),
                );
                session
                    .send(BootstrapMessageType::BootstrapResponse as u8, &response.encode())
                    .await
                    .map_err(|e| crate::error::NodeError::Protocol(e.to_string()))
            })
        }
    });

    hub.register_handler(BootstrapMessageType::PeerListRequest as u8, {
        let server = server.clone();
        move |session, _payload| {
            let server = server.clone();
            Box::pin(async move {
                let peer_list = server.encode_peer_list();
                let response = BootstrapMessage::new(
                    BootstrapMessageType::PeerListResponse,
                    session.remote_address.ip().to_string(),
                    session.remote_address.port(),
                    peer_list.to_vec(),
                );
                session
                    .send(BootstrapMessageType::PeerListResponse as u8, &response.encode())
                    .await
                    .map_err(|e| crate::error::NodeError::Protocol(e.to_string()))
            })
        }
    });

    hub.register_handler(BootstrapMessageType::NodeAnnouncement as u8, {
        let server = server.clone();
        let hub = hub.clone();
        move |_session, payload| {
            let server = server.clone();
            let hub = hub.clone();
            Box::pin(async move {
                let Ok(msg) = BootstrapMessage::decode(&payload) else {
                    return Ok(());
                };
                if let Some(addr) = BootstrapServer::parse_announcement(&msg.payload) {
                    server.note_peer(addr.ip().to_string(), addr.port());
                    let already_connected = hub
                        .sessions_snapshot()
                        .iter()
                        .any(|s| s.remote_address == addr);
                    if !already_connected && addr != local_addr {
                        let _ = hub.connect(addr).await;
                    }
                }
                Ok(())
            })
        }
    });

    hub.register_handler(BootstrapMessageType::PeerListResponse as u8, {
        let hub = hub.clone();
        move |_session, payload| {
            let hub = hub.clone();
            Box::pin(async move {
                let Ok(msg) = BootstrapMessage::decode(&payload) else {
                    return Ok(());
                };
                let addrs = parse_peer_list_response(&msg.payload);
                for addr in addrs {
                    if addr == local_addr {
                        continue;
                    }
                    let already_connected = hub
                        .sessions_snapshot()
                        .iter()
                        .any(|s| s.remote_address == addr);
                    if !already_connected {
                        connect_with_retries(&hub, addr).await;
                    }
                }
                Ok(())
            })
        }
    });
}
