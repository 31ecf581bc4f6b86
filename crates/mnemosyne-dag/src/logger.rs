//! The DAG logger: tip state, record creation, ingestion and recovery.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use rand::seq::SliceRandom;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use mnemosyne_store_core::{Backend, StoreError};
use mnemosyne_types::{
    Component, DataSigner, DataValidator, Name, Record, VersionVector, CONTENT_TYPE_ENCAPSULATED,
};

use crate::config::LoggerConfig;
use crate::error::LoggerError;
use crate::record_sync::{RecordSync, RECORD_FRESHNESS};
use crate::reference_checker::{DagReferenceChecker, PendingRecord};
use crate::replication_counter::ReplicationCounter;
use crate::transport::{MissingRange, SyncTransport};

/// Meta key of the persisted version-vector checkpoint.
pub const SEQ_NO_BACKUP_KEY: &str = "SeqNoBackup";

const RECORD_CHANNEL_CAPACITY: usize = 1024;

struct TipEntry {
    full_name: Name,
    budget: u32,
}

struct DagState {
    tips: HashMap<Name, TipEntry>,
    versions: VersionVector,
    known_self_seq: u64,
    counter: ReplicationCounter,
}

/// Coordinates codec, backend, sync adapter, reference checker and
/// replication counter into one logger.
///
/// Construction wires the pieces together; [`start`](Self::start) then
/// replays the persisted checkpoint, injects genesis tips and begins
/// consuming sync updates. Observers subscribe to committed third-party
/// records via [`subscribe`](Self::subscribe) before calling `start`, so
/// replayed records are not lost.
pub struct MnemosyneDagLogger {
    weak: Weak<MnemosyneDagLogger>,
    config: LoggerConfig,
    backend: Arc<Backend>,
    sync: Arc<RecordSync>,
    state: Arc<RwLock<DagState>>,
    checker: Mutex<DagReferenceChecker>,
    record_tx: broadcast::Sender<Record>,
    validator: Arc<dyn DataValidator>,
}

impl MnemosyneDagLogger {
    /// Wire a logger over the given backend and transport.
    pub async fn new(
        config: LoggerConfig,
        backend: Arc<Backend>,
        transport: Arc<dyn SyncTransport>,
        record_validator: Arc<dyn DataValidator>,
        signer: Arc<dyn DataSigner>,
    ) -> Result<Arc<Self>, LoggerError> {
        config.validate()?;
        info!(peer = %config.peer_prefix, "logger initialization start");
        let sync = RecordSync::new(
            transport,
            backend.clone(),
            config.peer_prefix.clone(),
            config.hint_prefix.clone(),
            signer,
        )
        .await;
        let (record_tx, _) = broadcast::channel(RECORD_CHANNEL_CAPACITY);
        let counter = ReplicationCounter::new(
            config.peer_prefix.clone(),
            config.max_counted_replication,
        );
        Ok(Arc::new_cyclic(|weak| MnemosyneDagLogger {
            weak: weak.clone(),
            config,
            backend,
            sync,
            state: Arc::new(RwLock::new(DagState {
                tips: HashMap::new(),
                versions: VersionVector::new(),
                known_self_seq: 0,
                counter,
            })),
            checker: Mutex::new(DagReferenceChecker::new()),
            record_tx,
            validator: record_validator,
        }))
    }

    /// Restore persisted state, seed genesis tips, register the version
    /// checkpoint and begin consuming sync updates.
    pub async fn start(&self) -> Result<(), LoggerError> {
        self.restore().await?;

        {
            let mut state = self.state.write().await;
            if state.tips.is_empty() {
                let mut lane = 0u64;
                while state.tips.len() + 1 < self.config.preceding_record_num {
                    let producer = Name::root().append(Component::number(lane));
                    lane += 1;
                    if state.tips.contains_key(&producer) {
                        continue;
                    }
                    let full_name = Record::genesis_full_name(&producer);
                    state.tips.insert(
                        producer,
                        TipEntry {
                            full_name,
                            budget: self.config.max_self_re_ref_count,
                        },
                    );
                }
                info!(count = lane, "synthetic genesis records added");
            }
            if !state.tips.contains_key(&self.config.peer_prefix) {
                state.tips.insert(
                    self.config.peer_prefix.clone(),
                    TipEntry {
                        full_name: Record::genesis_full_name(&self.config.peer_prefix),
                        budget: self.config.max_self_re_ref_count,
                    },
                );
            }
        }

        let state = self.state.clone();
        let backend = self.backend.clone();
        self.backend
            .add_backup_callback(Box::new(move || {
                let state = state.clone();
                let backend = backend.clone();
                Box::pin(async move {
                    let page = state.read().await.versions.encode();
                    match backend.place_meta(SEQ_NO_BACKUP_KEY, &page).await {
                        Ok(true) => {
                            debug!("sequence checkpoint written");
                            true
                        }
                        Ok(false) => false,
                        Err(e) => {
                            error!(error = %e, "sequence checkpoint write failed");
                            false
                        }
                    }
                })
            }))
            .await;

        let mut missing_rx = self.sync.transport().subscribe_missing();
        let weak = self.weak.clone();
        tokio::spawn(async move {
            loop {
                match missing_rx.recv().await {
                    Ok(ranges) => {
                        let Some(logger) = weak.upgrade() else { break };
                        logger.handle_missing(ranges).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missing-range notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        info!(peer = %self.config.peer_prefix, "logger initialization succeeded");
        Ok(())
    }

    /// Replay the persisted checkpoint: walk each producer's chain forward
    /// from its checkpointed sequence, rebuilding tips and re-delivering
    /// third-party records to observers.
    async fn restore(&self) -> Result<(), LoggerError> {
        let peer = self.config.peer_prefix.clone();
        let mut versions = match self.backend.get_meta(SEQ_NO_BACKUP_KEY).await? {
            Some(page) => {
                VersionVector::decode(&page).map_err(LoggerError::VersionVectorDecode)?
            }
            None => VersionVector::new(),
        };
        if versions.get(&peer) == 0 {
            versions.set(peer.clone(), 0);
        }

        let mut tips = HashMap::new();
        let mut known_self_seq = 0;
        let entries: Vec<(Name, u64)> = versions
            .iter()
            .map(|(producer, seq)| (producer.clone(), seq))
            .collect();
        for (producer, start) in entries {
            let listed = self
                .backend
                .list_records(&Record::record_name(&producer, start), 1)
                .await?;
            if producer != peer && listed.is_empty() {
                error!(producer = %producer, seq = start, "checkpointed record missing from store");
                return Err(LoggerError::RestoreFailed(producer));
            }
            let mut seq = start;
            loop {
                let next = self
                    .backend
                    .list_records(&Record::record_name(&producer, seq + 1), 1)
                    .await?;
                let Some(full_name) = next.first() else { break };
                seq += 1;
                tips.insert(
                    producer.clone(),
                    TipEntry {
                        full_name: full_name.clone(),
                        budget: self.config.max_self_re_ref_count,
                    },
                );
                if producer != peer {
                    if let Some(unit) = self.backend.get_record(full_name).await? {
                        match Record::from_unit(unit) {
                            Ok(record) => {
                                let _ = self.record_tx.send(record);
                            }
                            Err(e) => warn!(record = %full_name, error = %e, "stored record failed to decode"),
                        }
                    }
                }
            }
            self.sync.transport().announce(&producer, seq).await;
            versions.set(producer.clone(), seq);
            if producer == peer {
                known_self_seq = seq;
            }
        }
        info!(versions = %versions, "restored sequence checkpoint");

        let mut state = self.state.write().await;
        state.tips = tips;
        state.versions = versions;
        state.known_self_seq = known_self_seq;
        Ok(())
    }

    /// Append a new record to the DAG.
    ///
    /// Selects preceding pointers from the tip set (always including
    /// self's tip), publishes the record and self-ingests it. Returns the
    /// published full name. Tip entries consumed by the selection are put
    /// back if publish or ingest fails, so the call stays retryable.
    pub async fn create_record(&self, mut record: Record) -> Result<Name, LoggerError> {
        let mut consumed: Vec<(Name, TipEntry)> = Vec::new();
        {
            let mut state = self.state.write().await;
            let known_self_seq = state.known_self_seq;
            let Some(self_tip) = state.tips.get(&self.config.peer_prefix) else {
                return Err(LoggerError::Timing(known_self_seq));
            };
            if Record::seq_id(&self_tip.full_name)? < known_self_seq {
                warn!(known = known_self_seq, "waiting for self record discovery");
                return Err(LoggerError::Timing(known_self_seq));
            }
            if state.tips.len() < self.config.preceding_record_num {
                warn!(
                    have = state.tips.len(),
                    need = self.config.preceding_record_num,
                    "not enough tailing records"
                );
                return Err(LoggerError::NotEnoughTailingRecords {
                    have: state.tips.len(),
                    need: self.config.preceding_record_num,
                });
            }
            record.add_pointer(self_tip.full_name.clone())?;

            // Among the other tips, sample from the widest pool whose
            // reference budgets can still cover the demand.
            let need = self.config.preceding_record_num - 1;
            let mut budgets: Vec<u32> = state
                .tips
                .iter()
                .filter(|(producer, _)| **producer != self.config.peer_prefix)
                .map(|(_, tip)| tip.budget)
                .collect();
            budgets.sort_unstable_by(|a, b| b.cmp(a));
            let threshold = budgets[need - 1];
            let pool: Vec<Name> = state
                .tips
                .iter()
                .filter(|(producer, tip)| {
                    **producer != self.config.peer_prefix && tip.budget >= threshold
                })
                .map(|(producer, _)| producer.clone())
                .collect();
            let chosen: Vec<Name> = {
                let mut rng = rand::thread_rng();
                pool.choose_multiple(&mut rng, need).cloned().collect()
            };
            for producer in &chosen {
                if let Some(tip) = state.tips.get(producer) {
                    record.add_pointer(tip.full_name.clone())?;
                }
            }

            // Pointers are in place; consume the selected entries,
            // remembering each so a failed publish can put it back.
            let Some(self_entry) = state.tips.remove(&self.config.peer_prefix) else {
                return Err(LoggerError::Timing(known_self_seq));
            };
            consumed.push((self.config.peer_prefix.clone(), self_entry));
            for producer in chosen {
                if let Some(tip) = state.tips.get_mut(&producer) {
                    consumed.push((
                        producer.clone(),
                        TipEntry {
                            full_name: tip.full_name.clone(),
                            budget: tip.budget,
                        },
                    ));
                    if tip.budget <= 1 {
                        state.tips.remove(&producer);
                    } else {
                        tip.budget -= 1;
                    }
                }
            }
        }

        let seq = match self
            .sync
            .publish(&mut record, RECORD_FRESHNESS, CONTENT_TYPE_ENCAPSULATED)
            .await
        {
            Ok(seq) => seq,
            Err(e) => {
                self.restore_tips(consumed).await;
                return Err(e);
            }
        };
        let Some(full_name) = record.full_name() else {
            self.restore_tips(consumed).await;
            return Err(LoggerError::UnbuiltRecord);
        };
        info!(record = %full_name, "added a new record");
        let peer = self.config.peer_prefix.clone();
        if let Err(e) = self.add_received_record(record, &peer, seq).await {
            self.restore_tips(consumed).await;
            return Err(e);
        }
        Ok(full_name)
    }

    /// Put back tip entries consumed by a record creation that failed
    /// downstream. Entries a concurrent commit already replaced with a
    /// newer record are left alone.
    async fn restore_tips(&self, consumed: Vec<(Name, TipEntry)>) {
        let mut state = self.state.write().await;
        for (producer, saved) in consumed {
            match state.tips.entry(producer) {
                Entry::Occupied(mut occupied) => {
                    let tip = occupied.get_mut();
                    if tip.full_name == saved.full_name {
                        tip.budget = tip.budget.max(saved.budget);
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(saved);
                }
            }
        }
    }

    /// Commit a record whose references are satisfied: refresh tip state,
    /// checkpoint the version vector, persist the record and notify.
    async fn add_received_record(
        &self,
        record: Record,
        producer: &Name,
        seq: u64,
    ) -> Result<(), LoggerError> {
        let unit = record.unit().cloned().ok_or(LoggerError::UnbuiltRecord)?;
        let full_name = unit.full_name();
        let record_producer = Record::producer_prefix(unit.name())?;
        let record_seq = Record::seq_id(unit.name())?;
        debug!(record = %full_name, "adding record to the ledger");

        // All in-memory updates land before the fallible storage calls,
        // so a failed checkpoint never strands the tip map without self's
        // entry and the caller can simply retry.
        let notify = {
            let mut state = self.state.write().await;
            if state.versions.get(producer) + 1 != seq {
                warn!(
                    record = %full_name,
                    previous = state.versions.get(producer),
                    seq,
                    "non-contiguous sequence for producer"
                );
            }
            state.versions.set(producer.clone(), seq);
            state.tips.insert(
                record_producer,
                TipEntry {
                    full_name,
                    budget: self.config.max_self_re_ref_count,
                },
            );
            if *producer == self.config.peer_prefix {
                state.known_self_seq = state.known_self_seq.max(record_seq);
                false
            } else {
                state.counter.record_update(&record);
                true
            }
        };
        // Checkpoint counting happens before the write: replay re-adds,
        // never claims phantom records.
        self.backend.trigger_backup().await?;
        self.backend.put_record(&unit).await?;
        // Observers hear about a record only once it is durable.
        if notify {
            let _ = self.record_tx.send(record);
        }
        Ok(())
    }

    /// React to missing-range notifications from the sync substrate.
    async fn handle_missing(&self, ranges: Vec<MissingRange>) {
        for range in ranges {
            debug!(node = %range.node, low = range.low, high = range.high, "missing data");
            if range.node == self.config.peer_prefix {
                let mut state = self.state.write().await;
                state.known_self_seq = state.known_self_seq.max(range.high);
            }
            let committed = self.state.read().await.versions.get(&range.node);
            let start = if committed >= range.low {
                debug!(node = %range.node, seq = committed, "skipping in-backend items");
                committed
            } else {
                range.low
            };
            for seq in start..=range.high {
                let Some(logger) = self.weak.upgrade() else { return };
                let node = range.node.clone();
                tokio::spawn(async move {
                    logger.fetch_and_ingest(node, seq).await;
                });
            }
        }
    }

    async fn fetch_and_ingest(self: Arc<Self>, node: Name, seq: u64) {
        // A missing self record is expected to recover via the hint path.
        let direct_retries = if node == self.config.peer_prefix {
            0
        } else {
            self.config.record_fetch_retries
        };
        let unit = match self
            .sync
            .fetch_record(&node, seq, direct_retries, self.config.hinted_fetch_retries)
            .await
        {
            Ok(unit) => unit,
            Err(e) => {
                error!(node = %node, seq, error = %e, "record fetch failed");
                return;
            }
        };
        if let Err(e) = self.validator.validate(&unit) {
            error!(error = %e, "verification error on received record");
            return;
        }
        let record = match Record::from_unit(unit) {
            Ok(record) => record,
            Err(e) => {
                error!(node = %node, seq, error = %e, "bad record received");
                return;
            }
        };
        if let Err(e) = record.check_pointer_count(self.config.preceding_record_num) {
            error!(node = %node, seq, error = %e, "bad record received");
            return;
        }

        let ready = {
            let mut checker = self.checker.lock().await;
            checker
                .add_record(record, node.clone(), seq, &self.backend)
                .await
        };
        match ready {
            Ok(released) => {
                for PendingRecord {
                    record,
                    producer,
                    seq,
                } in released
                {
                    if let Err(e) = self.add_received_record(record, &producer, seq).await {
                        if matches!(
                            e,
                            LoggerError::Checkpoint(StoreError::CheckpointWriteFailed)
                        ) {
                            // Continuing would desynchronize the in-memory
                            // version vector from what replay can recover.
                            error!("checkpoint write failed, terminating");
                            std::process::exit(1);
                        }
                        error!(error = %e, "failed to commit record");
                    }
                }
            }
            Err(e) => error!(error = %e, "reference check failed"),
        }
    }

    //─────────────────────────────
    //  Introspection
    //─────────────────────────────

    /// This logger's producer prefix.
    pub fn peer_prefix(&self) -> &Name {
        &self.config.peer_prefix
    }

    /// Subscribe to committed third-party records.
    pub fn subscribe(&self) -> broadcast::Receiver<Record> {
        self.record_tx.subscribe()
    }

    /// The immutability frontier; see
    /// [`ReplicationCounter::max_reference_seq_no`].
    pub async fn max_reference_seq_no(&self) -> u64 {
        self.state.read().await.counter.max_reference_seq_no()
    }

    /// The tracked witness sequences plus the discovered self sequence.
    pub async fn replication_seq_ids(&self) -> Vec<u64> {
        let state = self.state.read().await;
        let mut ids = state.counter.counts();
        ids.push(state.known_self_seq);
        ids
    }

    /// A copy of the collected version vector.
    pub async fn collected_versions(&self) -> VersionVector {
        self.state.read().await.versions.clone()
    }

    /// The highest self sequence discovered so far.
    pub async fn known_self_seq(&self) -> u64 {
        self.state.read().await.known_self_seq
    }

    /// Current tips as `(producer, full name)` pairs.
    pub async fn tailing_records(&self) -> Vec<(Name, Name)> {
        self.state
            .read()
            .await
            .tips
            .iter()
            .map(|(producer, tip)| (producer.clone(), tip.full_name.clone()))
            .collect()
    }
}
