//! In-process sync substrate.
//!
//! [`MemoryHub`] plays the network for a set of loggers living in one
//! process: a shared state vector, a table of published units and the
//! forwarding-hint filter registry. Each logger talks to the hub through
//! its own [`MemoryTransport`] endpoint; announcements fan out as
//! missing-range notifications to every endpoint except the announcer.
//!
//! Tests use the hub directly; production deployments substitute a real
//! network face behind the same [`SyncTransport`] trait.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use mnemosyne_types::{DataUnit, Name};

use crate::transport::{Interest, InterestHandler, MissingRange, SyncTransport, TransportError};

const MISSING_CHANNEL_CAPACITY: usize = 256;

struct HubState {
    vector: BTreeMap<Name, u64>,
    units: BTreeMap<String, DataUnit>,
    filters: Vec<(Name, InterestHandler)>,
    endpoints: Vec<broadcast::Sender<Vec<MissingRange>>>,
}

/// A process-local sync group shared by several endpoints.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        MemoryHub::new()
    }
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        MemoryHub {
            state: Arc::new(Mutex::new(HubState {
                vector: BTreeMap::new(),
                units: BTreeMap::new(),
                filters: Vec::new(),
                endpoints: Vec::new(),
            })),
        }
    }

    /// Attach a new endpoint to this hub.
    pub async fn endpoint(&self) -> Arc<MemoryTransport> {
        let (missing_tx, _) = broadcast::channel(MISSING_CHANNEL_CAPACITY);
        self.state.lock().await.endpoints.push(missing_tx.clone());
        Arc::new(MemoryTransport {
            state: self.state.clone(),
            missing_tx,
        })
    }

    /// Drop every published unit under `prefix` (component boundaries
    /// respected). Lets tests force recovery through the hinted path.
    pub async fn forget(&self, prefix: &Name) {
        let mut state = self.state.lock().await;
        let keys: Vec<String> = state
            .units
            .keys()
            .filter(|key| match Name::parse(key) {
                Ok(name) => prefix.is_prefix_of(&name),
                Err(_) => false,
            })
            .cloned()
            .collect();
        for key in keys {
            state.units.remove(&key);
        }
    }

    /// Number of units currently held by the hub.
    pub async fn unit_count(&self) -> usize {
        self.state.lock().await.units.len()
    }
}

/// One logger's handle onto a [`MemoryHub`].
pub struct MemoryTransport {
    state: Arc<Mutex<HubState>>,
    missing_tx: broadcast::Sender<Vec<MissingRange>>,
}

fn interest_matches(interest: &Interest, candidate: &Name) -> bool {
    interest.name.is_prefix_of(candidate)
        && (interest.can_be_prefix || candidate.len() <= interest.name.len() + 1)
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn node_seq(&self, node: &Name) -> u64 {
        self.state.lock().await.vector.get(node).copied().unwrap_or(0)
    }

    async fn announce(&self, node: &Name, seq: u64) {
        let peers = {
            let mut state = self.state.lock().await;
            let old = state.vector.get(node).copied().unwrap_or(0);
            if seq <= old {
                return;
            }
            state.vector.insert(node.clone(), seq);
            let ranges = vec![MissingRange {
                node: node.clone(),
                low: old + 1,
                high: seq,
            }];
            state
                .endpoints
                .iter()
                .filter(|tx| !tx.same_channel(&self.missing_tx))
                .map(|tx| (tx.clone(), ranges.clone()))
                .collect::<Vec<_>>()
        };
        for (tx, ranges) in peers {
            let _ = tx.send(ranges);
        }
    }

    async fn fetch(&self, interest: Interest) -> Result<DataUnit, TransportError> {
        let prefix_uri = interest.name.to_uri();
        let (found, handlers) = {
            let state = self.state.lock().await;
            let mut found = None;
            for (key, unit) in state.units.range(prefix_uri.clone()..) {
                if !key.starts_with(&prefix_uri) {
                    break;
                }
                if interest_matches(&interest, &unit.full_name()) {
                    found = Some(unit.clone());
                    break;
                }
            }
            let handlers: Vec<InterestHandler> = match (&found, &interest.hint) {
                (None, Some(hint)) => state
                    .filters
                    .iter()
                    .filter(|(prefix, _)| prefix.is_prefix_of(hint))
                    .map(|(_, handler)| handler.clone())
                    .collect(),
                _ => Vec::new(),
            };
            (found, handlers)
        };

        if let Some(unit) = found {
            return Ok(unit);
        }
        for handler in handlers {
            if let Some(unit) = handler(interest.clone()).await {
                return Ok(unit);
            }
        }
        Err(TransportError::FetchTimeout(interest.name))
    }

    async fn put(&self, unit: DataUnit) {
        self.state
            .lock()
            .await
            .units
            .insert(unit.full_name().to_uri(), unit);
    }

    fn subscribe_missing(&self) -> broadcast::Receiver<Vec<MissingRange>> {
        self.missing_tx.subscribe()
    }

    async fn set_interest_filter(&self, prefix: Name, handler: InterestHandler) {
        self.state.lock().await.filters.push((prefix, handler));
    }
}
