//! DHT routing table (C5) and overlay (C6): node-id assignment, find-node
//! lookup, wire codec, and the bootstrap walk.

pub mod codec;
pub mod handlers;
pub mod node_id;
pub mod overlay;
pub mod routing_table;

pub use codec::{DhtMessage, DhtMessageType};
pub use node_id::{bucket_index, NodeId};
pub use overlay::DhtOverlay;
pub use routing_table::{AddOutcome, KBucket, PeerRecord, RoutingTable, BUCKET_SIZE, NUM_BUCKETS};
