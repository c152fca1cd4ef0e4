//! Local/LAN discovery (C8): mDNS-style service announcement, UDP broadcast
//! presence, and the active-port scanner.

pub mod broadcast;
pub mod mdns;
pub mod port_scanner;

pub use broadcast::{AnnouncePacket, BroadcastDiscovery, BroadcastError, BroadcastMessageType};
pub use mdns::{MdnsService, ServiceAnnouncement};
pub use port_scanner::{build_targets, scan};
