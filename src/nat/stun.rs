//! STUN client (§4.9): a TCP (not UDP, per this implementation's
//! simplification) Binding Request/Response exchange against a hard-coded
//! public server list.

use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const MAGIC_COOKIE: u32 = 0x2112_A442;
pub const BINDING_REQUEST: u16 = 0x0001;
pub const MAPPED_ADDRESS: u16 = 0x0001;
pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Well-known public STUN servers, tried in order until one answers.
pub const DEFAULT_SERVERS: &[(&str, u16)] = &[
    ("stun.l.google.com", 19302),
    ("stun.cloudflare.com", 3478),
    ("stun.stunprotocol.org", 3478),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunError {
    Io(String),
    Truncated,
    NoMappedAddress,
}

impl std::fmt::Display for StunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StunError::Io(e) => write!(f, "stun io error: {e}"),
            StunError::Truncated => write!(f, "stun response truncated"),
            StunError::NoMappedAddress => write!(f, "no mapped-address attribute in response"),
        }
    }
}

impl std::error::Error for StunError {}

fn build_binding_request(transaction_id: &[u8; 12]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u16(BINDING_REQUEST);
    buf.put_u16(0); // message length, no attributes
    buf.put_u32(MAGIC_COOKIE);
    buf.put_slice(transaction_id);
    buf
}

/// Parse a STUN Binding Response body, extracting MAPPED-ADDRESS or
/// XOR-MAPPED-ADDRESS (IPv4 only).
pub fn parse_binding_response(bytes: &[u8], transaction_id: &[u8; 12]) -> Result<MappedAddress, StunError> {
    if bytes.len() < 20 {
        return Err(StunError::Truncated);
    }
    let mut header = &bytes[..20];
    let _msg_type = header.get_u16();
    let msg_len = header.get_u16() as usize;
    let _cookie = header.get_u32();
    let mut tid = [0u8; 12];
    header.copy_to_slice(&mut tid);

    let body = &bytes[20..];
    if body.len() < msg_len {
        return Err(StunError::Truncated);
    }

    let mut cursor = &body[..msg_len];
    while cursor.remaining() >= 4 {
        let attr_type = cursor.get_u16();
        let attr_len = cursor.get_u16() as usize;
        if cursor.remaining() < attr_len {
            break;
        }
        let attr_value = &cursor[..attr_len];

        if attr_type == MAPPED_ADDRESS && attr_len >= 8 {
            let mut v = attr_value;
            let _family = v.get_u16();
            let port = v.get_u16();
            let mut ip_bytes = [0u8; 4];
            v.copy_to_slice(&mut ip_bytes);
            return Ok(MappedAddress {
                ip: Ipv4Addr::from(ip_bytes),
                port,
            });
        }

        if attr_type == XOR_MAPPED_ADDRESS && attr_len >= 8 {
            let mut v = attr_value;
            let _family = v.get_u16();
            let xor_port = v.get_u16();
            let mut xor_ip_bytes = [0u8; 4];
            v.copy_to_slice(&mut xor_ip_bytes);

            let port = xor_port ^ ((MAGIC_COOKIE >> 16) as u16);
            let xor_ip = u32::from_be_bytes(xor_ip_bytes) ^ MAGIC_COOKIE;
            return Ok(MappedAddress {
                ip: Ipv4Addr::from(xor_ip.to_be_bytes()),
                port,
            });
        }

        cursor.advance(attr_len);
        // attributes are 4-byte aligned
        let padding = (4 - (attr_len % 4)) % 4;
        cursor.advance(padding.min(cursor.remaining()));
    }
    let _ = transaction_id;
    Err(StunError::NoMappedAddress)
}

/// Discover this node's externally-visible address/port by querying `server`.
pub async fn query(server: SocketAddr) -> Result<MappedAddress, StunError> {
    let mut transaction_id = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut transaction_id);

    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(server))
        .await
        .map_err(|_| StunError::Io("connect timed out".to_string()))?
        .map_err(|e| StunError::Io(e.to_string()))?;

    let request = build_binding_request(&transaction_id);
    stream
        .write_all(&request)
        .await
        .map_err(|e| StunError::Io(e.to_string()))?;

    let mut response = vec![0u8; 512];
    let n = tokio::time::timeout(CONNECT_TIMEOUT, stream.read(&mut response))
        .await
        .map_err(|_| StunError::Io("read timed out".to_string()))?
        .map_err(|e| StunError::Io(e.to_string()))?;

    parse_binding_response(&response[..n], &transaction_id)
}

/// Try each of `servers` in turn, returning the first successful mapping.
pub async fn discover_external_address(servers: &[SocketAddr]) -> Result<MappedAddress, StunError> {
    let mut last_err = StunError::NoMappedAddress;
    for &server in servers {
        match query(server).await {
            Ok(mapped) => return Ok(mapped),
            Err(e) => {
                log::debug!("stun: {server} failed: {e}");
                last_err = e;
            }
        }
    }
    Err(last_err)
}
