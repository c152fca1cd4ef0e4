//! Wires the DHT overlay onto a node hub: ping/pong keep-alive and
//! find_node/find_node_response request-reply, msg_types 10-13.

use super::codec::{DhtMessage, DhtMessageType};
use super::node_id::NodeId;
use super::overlay::DhtOverlay;
use super::routing_table::PeerRecord;
use crate::network::hub::NodeHub;
use std::sync::Arc;

/// Register the DHT's default handlers on `hub`. Every inbound DHT message
/// also refreshes the sender's entry in the routing table.
pub fn register_handlers(hub: &NodeHub, overlay: Arc<DhtOverlay>) {
    hub.register_handler(DhtMessageType::Ping as u8, {
        let overlay = overlay.clone();
        move |session, payload| {
            let overlay = overlay.clone();
            Box::pin(async move {
                if let Ok(msg) = DhtMessage::decode(&payload) {
                    overlay.add_peer(PeerRecord::new(
                        msg.sender_id,
                        session.remote_address.ip().to_string(),
                        session.remote_address.port(),
                    ));
                    let pong = DhtMessage::new(DhtMessageType::Pong, overlay.local_id(), Vec::new());
                    return session
                        .send(DhtMessageType::Pong as u8, &pong.encode())
                        .await
                        .map_err(|e| crate::error::NodeError::Protocol(e.to_string()));
                }
                Ok(())
            })
        }
    });

    hub.register_handler(DhtMessageType::Pong as u8, {
        let overlay = overlay.clone();
        move |session, payload| {
            let overlay = overlay.clone();
            Box::pin(async move {
                if let Ok(msg) = DhtMessage::decode(&payload) {
                    overlay.add_peer(PeerRecord::new(
                        msg.sender_id,
                        session.remote_address.ip().to_string(),
                        session.remote_address.port(),
                    ));
                }
                Ok(())
            })
        }
    });

    hub.register_handler(DhtMessageType::FindNode as u8, {
        let overlay = overlay.clone();
        move |session, payload| {
            let overlay = overlay.clone();
            Box::pin(async move {
                let Ok(msg) = DhtMessage::decode(&payload) else {
                    return Ok(());
                };
                overlay.add_peer(PeerRecord::new(
                    msg.sender_id,
                    session.remote_address.ip().to_string(),
                    session.remote_address.port(),
                ));

                if msg.payload.len() != 32 {
                    return Ok(());
                }
                let mut target_bytes = [0u8; 32];
                target_bytes.copy_from_slice(&msg.payload);
                let target = NodeId(target_bytes);
                let closest = overlay.find_node(&target);
                let response_payload = encode_peer_records(&closest);
                let response = DhtMessage::new(DhtMessageType::FindNodeResponse, overlay.local_id(), response_payload);
                session
                    .send(DhtMessageType::FindNodeResponse as u8, &response.encode())
                    .await
                    .map_err(|e| crate::error::NodeError::Protocol(e.to_string()))
            })
        }
    });

    hub.register_handler(DhtMessageType::FindNodeResponse as u8, move |_session, payload| {
        let overlay = overlay.clone();
        Box::pin(async move {
            let Ok(msg) = DhtMessage::decode(&payload) else {
                return Ok(());
            };
            for peer in decode_peer_records(&msg.payload) {
                overlay.add_peer(peer);
            }
            Ok(())
        })
    });
}

/// `{count:u32, [id:32, addr_len:u16, addr, port:u16]*}`, little-endian —
/// a DHT-local extension of the bootstrap peer-list shape, carrying node
/// ids alongside addresses.
fn encode_peer_records(peers: &[PeerRecord]) -> Vec<u8> {
    use bytes::{BufMut, BytesMut};
    let mut buf = BytesMut::new();
    buf.put_u32_le(peers.len() as u32);
    for peer in peers {
        buf.put_slice(peer.id.as_bytes());
        let addr_bytes = peer.address.as_bytes();
        buf.put_u16_le(addr_bytes.len() as u16);
        buf.put_slice(addr_bytes);
        buf.put_u16_le(peer.port);
    }
    buf.to_vec()
}

fn decode_peer_records(bytes: &[u8]) -> Vec<PeerRecord> {
    use bytes::Buf;
    let mut cursor = bytes;
    if cursor.remaining() < 4 {
        return Vec::new();
    }
    let count = cursor.get_u32_le() as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if cursor.remaining() < 32 + 2 {
            break;
        }
        let mut id_bytes = [0u8; 32];
        cursor.copy_to_slice(&mut id_bytes);
        let addr_len = cursor.get_u16_le() as usize;
        if cursor.remaining() < addr_len + 2 {
            break;
        }
        let address = String::from_utf8_lossy(&cursor[..addr_len]).to_string();
        cursor.advance(addr_len);
        let port = cursor.get_u16_le();
        out.push(PeerRecord::new(NodeId(id_bytes), address, port));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_record_list_roundtrips() {
        let peers = vec![
            PeerRecord::new(NodeId::random(), "198.51.100.1", 9001),
            PeerRecord::new(NodeId::random(), "198.51.100.2", 9002),
        ];
        let encoded = encode_peer_records(&peers);
        let decoded = decode_peer_records(&encoded);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].id, peers[0].id);
        assert_eq!(decoded[0].address, peers[0].address);
        assert_eq!(decoded[0].port, peers[0].port);
    }
}
