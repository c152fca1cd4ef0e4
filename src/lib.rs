//! Eastsea peer-discovery-and-transport substrate.
//!
//! This crate implements the network layer of the Eastsea network: a mesh
//! of framed-TCP peer connections (C2-C4), a Kademlia-style routing overlay
//! (C5-C6), and a set of complementary discovery mechanisms (bootstrap
//! seeds, mDNS-style announcement, UDP broadcast, LAN port scanning, STUN,
//! UPnP, and a centralized tracker fallback) composed by an auto-discovery
//! controller (C7-C11). The blockchain data model, RPC, and dashboard
//! layers are out of scope; `chain_consumer` is a worked example of how a
//! downstream layer would consume this crate.

pub mod autodiscovery;
pub mod bootstrap;
pub mod chain_consumer;
pub mod config;
pub mod dht;
pub mod discovery;
pub mod error;
pub mod hash;
pub mod nat;
pub mod network;
pub mod tracker;

pub use config::{Config, NetworkType, P2pConfig};
pub use dht::{DhtOverlay, NodeId};
pub use error::NodeError;
pub use network::{NodeHub, PeerSession};
