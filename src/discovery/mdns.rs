//! mDNS-style service announcement (§4.8). A best-effort layer: if the host
//! cannot join the multicast group, the component degrades to "limited
//! mode" — announce/query remain callable but produce no multicast traffic.

use rand::RngCore;
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::net::UdpSocket;

pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MULTICAST_PORT: u16 = 5353;
pub const SERVICE_TYPE: &str = "_eastsea._tcp.local";
pub const INSTANCE_PREFIX: &str = "eastsea-node-";
pub const TXT_VERSION: &str = "version=1.0";

/// Generates `eastsea-node-<8-byte-hex>`.
pub fn generate_instance_name() -> String {
    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("{INSTANCE_PREFIX}{}", hex::encode(suffix))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtrRecord {
    pub service_type: String,
    pub instance_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub instance_name: String,
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub instance_name: String,
    pub entries: Vec<String>,
}

/// The record set this node publishes for itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAnnouncement {
    pub instance_name: String,
    pub ptr: PtrRecord,
    pub srv: SrvRecord,
    pub txt: TxtRecord,
}

impl ServiceAnnouncement {
    pub fn new(port: u16, target_address: impl Into<String>) -> Self {
        let instance_name = generate_instance_name();
        Self {
            instance_name: instance_name.clone(),
            ptr: PtrRecord {
                service_type: SERVICE_TYPE.to_string(),
                instance_name: instance_name.clone(),
            },
            srv: SrvRecord {
                instance_name: instance_name.clone(),
                priority: 0,
                weight: 0,
                port,
                target: target_address.into(),
            },
            txt: TxtRecord {
                instance_name,
                entries: vec![TXT_VERSION.to_string()],
            },
        }
    }
}

/// Whether the socket actually joined the multicast group, or this node is
/// running in limited mode (announce/query are no-ops).
pub enum MdnsMode {
    Multicast(UdpSocket),
    Limited,
}

pub struct MdnsService {
    announcement: ServiceAnnouncement,
    mode: MdnsMode,
}

impl MdnsService {
    /// Attempt to bind and join the mDNS multicast group; fall back to
    /// limited mode rather than fail the caller.
    pub async fn start(port: u16, target_address: impl Into<String>) -> Self {
        let announcement = ServiceAnnouncement::new(port, target_address);
        let mode = match Self::try_join_multicast().await {
            Ok(socket) => MdnsMode::Multicast(socket),
            Err(e) => {
                log::warn!("mdns: falling back to limited mode: {e}");
                MdnsMode::Limited
            }
        };
        Self { announcement, mode }
    }

    async fn try_join_multicast() -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, MULTICAST_PORT)).await?;
        socket.join_multicast_v4(MULTICAST_ADDR, Ipv4Addr::UNSPECIFIED)?;
        Ok(socket)
    }

    pub fn is_limited(&self) -> bool {
        matches!(self.mode, MdnsMode::Limited)
    }

    pub fn announcement(&self) -> &ServiceAnnouncement {
        &self.announcement
    }

    /// Send this node's TXT record as a flattened line. A no-op in limited
    /// mode.
    pub async fn announce(&self) -> std::io::Result<()> {
        let MdnsMode::Multicast(socket) = &self.mode else {
            return Ok(());
        };
        let line = format!(
            "{}.{} SRV {} {} {} {}; TXT {}",
            self.announcement.instance_name,
            SERVICE_TYPE,
            self.announcement.srv.priority,
            self.announcement.srv.weight,
            self.announcement.srv.port,
            self.announcement.srv.target,
            self.announcement.txt.entries.join(";"),
        );
        let target = SocketAddrV4::new(MULTICAST_ADDR, MULTICAST_PORT);
        socket.send_to(line.as_bytes(), target).await?;
        Ok(())
    }

    /// Query the multicast group for other instances. A no-op returning an
    /// empty result in limited mode.
    pub async fn query(&self) -> std::io::Result<Vec<String>> {
        let MdnsMode::Multicast(socket) = &self.mode else {
            return Ok(Vec::new());
        };
        let query = format!("PTR {SERVICE_TYPE}");
        let target = SocketAddrV4::new(MULTICAST_ADDR, MULTICAST_PORT);
        socket.send_to(query.as_bytes(), target).await?;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_name_has_expected_shape() {
        let name = generate_instance_name();
        assert!(name.starts_with(INSTANCE_PREFIX));
        assert_eq!(name.len(), INSTANCE_PREFIX.len() + 16);
    }

    #[test]
    fn announcement_wires_records_to_the_same_instance() {
        let announcement = ServiceAnnouncement::new(9000, "198.51.100.7");
        assert_eq!(announcement.ptr.instance_name, announcement.instance_name);
        assert_eq!(announcement.srv.instance_name, announcement.instance_name);
        assert_eq!(announcement.txt.entries, vec![TXT_VERSION.to_string()]);
        assert_eq!(announcement.srv.priority, 0);
        assert_eq!(announcement.srv.weight, 0);
    }

    #[tokio::test]
    async fn start_never_panics_even_if_multicast_is_unavailable() {
        let service = MdnsService::start(9000, "127.0.0.1").await;
        // Whichever mode it lands in, announce/query must still be callable.
        let _ = service.announce().await;
        let _ = service.query().await;
        let _ = service.is_limited();
    }
}
