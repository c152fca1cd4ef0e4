//! Demo consumer for msg_types 2 (block) and 3 (transaction): shows the
//! contract a chain layer built on top of this crate would use — register
//! handlers, broadcast, and preserve the opaque payload round-trip. No
//! actual block/transaction validation lives here.

use crate::error::NodeError;
use crate::network::hub::{NodeHub, BLOCK_MSG_TYPE, TRANSACTION_MSG_TYPE};
use parking_lot::Mutex;
use std::sync::Arc;

/// Tracks the raw payloads received for each msg_type, so a caller (or a
/// test) can observe that broadcast/registration actually round-trips.
#[derive(Default)]
pub struct ChainConsumer {
    blocks_seen: Mutex<Vec<String>>,
    transactions_seen: Mutex<Vec<String>>,
}

impl ChainConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn blocks_seen(&self) -> Vec<String> {
        self.blocks_seen.lock().clone()
    }

    pub fn transactions_seen(&self) -> Vec<String> {
        self.transactions_seen.lock().clone()
    }

    /// Register the block/transaction handlers on `hub`.
    pub fn register(self: &Arc<Self>, hub: &NodeHub) {
        let consumer = self.clone();
        hub.register_handler(BLOCK_MSG_TYPE, move |_session, payload| {
            let consumer = consumer.clone();
            Box::pin(async move {
                let text = String::from_utf8(payload).map_err(|e| NodeError::Protocol(e.to_string()))?;
                if !text.starts_with("BLOCK:") {
                    return Err(NodeError::Protocol(format!("unexpected block payload: {text}")));
                }
                consumer.blocks_seen.lock().push(text);
                Ok(())
            })
        });

        let consumer = self.clone();
        hub.register_handler(TRANSACTION_MSG_TYPE, move |_session, payload| {
            let consumer = consumer.clone();
            Box::pin(async move {
                let text = String::from_utf8(payload).map_err(|e| NodeError::Protocol(e.to_string()))?;
                if !text.starts_with("TX:") {
                    return Err(NodeError::Protocol(format!("unexpected transaction payload: {text}")));
                }
                consumer.transactions_seen.lock().push(text);
                Ok(())
            })
        });
    }
}

/// `BLOCK:index=…,timestamp=…,txcount=…`
pub fn block_payload(index: u64, timestamp: u64, txcount: u64) -> Vec<u8> {
    format!("BLOCK:index={index},timestamp={timestamp},txcount={txcount}").into_bytes()
}

/// `TX:from=…,to=…,amount=…,timestamp=…`
pub fn transaction_payload(from: &str, to: &str, amount: u64, timestamp: u64) -> Vec<u8> {
    format!("TX:from={from},to={to},amount={amount},timestamp={timestamp}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::NodeId;

    #[tokio::test]
    async fn block_and_transaction_broadcast_round_trips() {
        let hub_a = NodeHub::new(NodeId::random());
        let addr_a = hub_a.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let consumer_a = ChainConsumer::new();
        consumer_a.register(&hub_a);

        let hub_a_clone = hub_a.clone();
        tokio::spawn(async move {
            let _ = hub_a_clone.accept_loop().await;
        });

        let hub_b = NodeHub::new(NodeId::random());
        let session_b = hub_b.connect(addr_a).await.unwrap();
        session_b
            .send(BLOCK_MSG_TYPE, &block_payload(10, 1_700_000_000, 3))
            .await
            .unwrap();
        session_b
            .send(TRANSACTION_MSG_TYPE, &transaction_payload("alice", "bob", 500, 1_700_000_001))
            .await
            .unwrap();

        // Give the accept loop's spawned handler a moment to dispatch.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(consumer_a.blocks_seen().len(), 1);
        assert_eq!(consumer_a.transactions_seen().len(), 1);
        assert!(consumer_a.blocks_seen()[0].starts_with("BLOCK:index=10"));
        assert!(consumer_a.transactions_seen()[0].starts_with("TX:from=alice"));
    }
}
