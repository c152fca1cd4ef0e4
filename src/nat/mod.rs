//! NAT helpers (C9): STUN external-address discovery and UPnP port mapping.

pub mod stun;
pub mod upnp;

pub use stun::{discover_external_address, MappedAddress, StunError};
pub use upnp::{Gateway, Protocol, UpnpError};
