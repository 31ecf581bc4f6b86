//! Pub/sub ingress for application events.

use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};

use mnemosyne_types::{DataUnit, Name};

/// One event delivery: the signed packet plus its sync coordinates.
#[derive(Debug, Clone)]
pub struct EventNotice {
    /// The self-contained event packet.
    pub packet: DataUnit,
    /// Producer the packet was published under.
    pub producer: Name,
    /// Sequence number under that producer.
    pub seq: u64,
}

/// A subscription-shaped event source.
pub trait EventChannel: Send + Sync {
    /// Subscribe to the live stream of event notices.
    fn subscribe(&self) -> broadcast::Receiver<EventNotice>;
}

/// In-process pub/sub group: publishers assign per-producer sequence
/// numbers and every subscriber sees every notice.
pub struct MemoryEventChannel {
    tx: broadcast::Sender<EventNotice>,
    seqs: Mutex<HashMap<Name, u64>>,
}

impl Default for MemoryEventChannel {
    fn default() -> Self {
        MemoryEventChannel::new(1024)
    }
}

impl MemoryEventChannel {
    /// A channel buffering up to `capacity` notices per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        MemoryEventChannel {
            tx,
            seqs: Mutex::new(HashMap::new()),
        }
    }

    /// Publish `packet` under `producer`; returns the assigned sequence.
    pub async fn publish(&self, packet: DataUnit, producer: Name) -> u64 {
        let seq = {
            let mut seqs = self.seqs.lock().await;
            let entry = seqs.entry(producer.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        let _ = self.tx.send(EventNotice {
            packet,
            producer,
            seq,
        });
        seq
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventChannel for MemoryEventChannel {
    fn subscribe(&self) -> broadcast::Receiver<EventNotice> {
        self.tx.subscribe()
    }
}
