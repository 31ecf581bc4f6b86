//! Bridge between the sync substrate and the record store.
//!
//! `RecordSync` publishes freshly created records, fetches missing ones
//! with a direct-then-hinted retry ladder, and serves hinted recovery
//! fetches straight out of the backend. The transport's view of stored
//! data *is* the backend: nothing is mirrored in memory.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use mnemosyne_store_core::Backend;
use mnemosyne_types::{DataSigner, DataUnit, Name, Record};

use crate::error::LoggerError;
use crate::transport::{Interest, SyncTransport, TransportError};

/// Freshness period stamped onto published records.
pub const RECORD_FRESHNESS: Duration = Duration::from_secs(300);

/// Lifetime of one fetch attempt.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Publishes, fetches and serves records over a [`SyncTransport`].
pub struct RecordSync {
    transport: Arc<dyn SyncTransport>,
    backend: Arc<Backend>,
    peer_prefix: Name,
    hint_prefix: Name,
    signer: Arc<dyn DataSigner>,
}

impl RecordSync {
    /// Wire the adapter and register its hint-prefix interest filter.
    pub async fn new(
        transport: Arc<dyn SyncTransport>,
        backend: Arc<Backend>,
        peer_prefix: Name,
        hint_prefix: Name,
        signer: Arc<dyn DataSigner>,
    ) -> Arc<Self> {
        let sync = Arc::new(RecordSync {
            transport,
            backend,
            peer_prefix,
            hint_prefix: hint_prefix.clone(),
            signer,
        });
        let weak: Weak<RecordSync> = Arc::downgrade(&sync);
        sync.transport
            .set_interest_filter(
                hint_prefix,
                Arc::new(move |interest| {
                    let weak = weak.clone();
                    Box::pin(async move {
                        match weak.upgrade() {
                            Some(sync) => sync.serve(interest).await,
                            None => None,
                        }
                    })
                }),
            )
            .await;
        sync
    }

    /// The transport this adapter runs over.
    pub fn transport(&self) -> &Arc<dyn SyncTransport> {
        &self.transport
    }

    /// Encode, sign and publish `record` under the next self sequence.
    ///
    /// The encoded unit is written through to the backend, the state
    /// vector advances, and the unit is injected into the substrate.
    /// Returns the assigned sequence number.
    pub async fn publish(
        &self,
        record: &mut Record,
        freshness: Duration,
        content_type: u32,
    ) -> Result<u64, LoggerError> {
        let seq = self.transport.node_seq(&self.peer_prefix).await + 1;
        let name = Record::record_name(&self.peer_prefix, seq);
        let unit = DataUnit::build(
            name,
            content_type,
            freshness.as_millis() as u64,
            record.encode_content(),
            self.signer.as_ref(),
        );
        record.set_unit(unit.clone())?;
        self.backend.put_record(&unit).await?;
        self.transport.announce(&self.peer_prefix, seq).await;
        self.transport.put(unit).await;
        info!(seq, "published record");
        Ok(seq)
    }

    /// Fetch `node`'s record at `seq`: direct attempts first, then hinted
    /// attempts through the recovery prefix.
    pub async fn fetch_record(
        &self,
        node: &Name,
        seq: u64,
        direct_retries: u32,
        hint_retries: u32,
    ) -> Result<DataUnit, TransportError> {
        let name = Record::record_name(node, seq);
        for attempt in 0..=direct_retries {
            match self.attempt(name.clone(), false, None).await {
                Ok(unit) => return Ok(unit),
                Err(e) => debug!(%name, attempt, error = %e, "direct fetch attempt failed"),
            }
        }
        for attempt in 0..=hint_retries {
            match self
                .attempt(name.clone(), true, Some(self.hint_prefix.clone()))
                .await
            {
                Ok(unit) => return Ok(unit),
                Err(e) => debug!(%name, attempt, error = %e, "hinted fetch attempt failed"),
            }
        }
        Err(TransportError::FetchTimeout(name))
    }

    async fn attempt(
        &self,
        name: Name,
        can_be_prefix: bool,
        hint: Option<Name>,
    ) -> Result<DataUnit, TransportError> {
        let interest = Interest {
            name: name.clone(),
            can_be_prefix,
            hint,
        };
        match timeout(FETCH_TIMEOUT, self.transport.fetch(interest)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::FetchTimeout(name)),
        }
    }

    /// Serve a hinted interest from the backend.
    pub async fn serve(&self, interest: Interest) -> Option<DataUnit> {
        debug!(name = %interest.name, "hinted interest incoming");
        let count = if interest.can_be_prefix { 1 } else { 0 };
        let names = match self.backend.list_records(&interest.name, count).await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "hinted lookup failed");
                return None;
            }
        };
        for name in names {
            if !interest.name.is_prefix_of(&name) {
                continue;
            }
            if !interest.can_be_prefix && name.len() > interest.name.len() + 1 {
                continue;
            }
            match self.backend.get_record(&name).await {
                Ok(found) => return found,
                Err(e) => {
                    warn!(error = %e, "hinted load failed");
                    return None;
                }
            }
        }
        None
    }
}
