#![forbid(unsafe_code)]

//! **mnemosyne** – Event-ingestion interface of the Mnemosyne log.
//!
//! [`Mnemosyne`] sits between application event sources and the DAG
//! engine: events arrive over pub/sub subscriptions or raw sync groups,
//! pass the event validator, are deduplicated against a TTL-windowed seen
//! set, wait out a randomized backoff (so that one logger in the fleet
//! wins the race to publish) and finally become records via the DAG
//! logger. Committed third-party records flow back in to feed the seen
//! set and the immutability-frontier log line.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use mnemosyne_dag::{
    Interest, LoggerError, MissingRange, MnemosyneDagLogger, SyncTransport,
};
use mnemosyne_store_core::Backend;
use mnemosyne_types::{Component, DataSigner, DataUnit, DataValidator, Name, Record};

pub mod config;
pub mod event_channel;
pub mod seen_event_set;
pub mod self_inserted_set;

pub use config::Config;
pub use event_channel::{EventChannel, EventNotice, MemoryEventChannel};
pub use seen_event_set::SeenEventSet;
pub use self_inserted_set::SelfInsertedSet;

/// Meta key of the persisted seen-event snapshot.
pub const SEEN_EVENT_BACKUP_KEY: &str = "MnemosyneSeenEvent";

/// The event interface: validation, dedup, backoff and the record sink.
pub struct Mnemosyne {
    weak: Weak<Mnemosyne>,
    config: Config,
    backend: Arc<Backend>,
    logger: Arc<MnemosyneDagLogger>,
    event_validator: Arc<dyn DataValidator>,
    seen_events: Arc<Mutex<SeenEventSet>>,
    self_inserted: Arc<Mutex<SelfInsertedSet>>,
    /// Serializes the check-then-publish section of delayed inserts, so
    /// concurrent deliveries of one event cannot both create a record.
    insert_gate: Mutex<()>,
    ready: Arc<AtomicBool>,
    last_immutable: AtomicU64,
}

impl Mnemosyne {
    /// Assemble a logger instance.
    ///
    /// `ps_channels` and `sync_channels` are the already-joined ingress
    /// groups for the prefixes named in the configuration. Event intake
    /// opens only after the configured startup delay; sync updates
    /// arriving earlier are ignored, which keeps a cold logger from
    /// re-publishing events its peers already carried.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: Config,
        backend: Arc<Backend>,
        dag_transport: Arc<dyn SyncTransport>,
        ps_channels: Vec<Arc<dyn EventChannel>>,
        sync_channels: Vec<Arc<dyn SyncTransport>>,
        record_validator: Arc<dyn DataValidator>,
        event_validator: Arc<dyn DataValidator>,
        signer: Arc<dyn DataSigner>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let logger = MnemosyneDagLogger::new(
            config.logger.clone(),
            backend.clone(),
            dag_transport,
            record_validator,
            signer,
        )
        .await?;
        let records_rx = logger.subscribe();

        let interface = Arc::new_cyclic(|weak| Mnemosyne {
            weak: weak.clone(),
            seen_events: Arc::new(Mutex::new(SeenEventSet::new(config.seen_event_ttl))),
            self_inserted: Arc::new(Mutex::new(SelfInsertedSet::new(
                config.self_insert_reset_freq,
            ))),
            insert_gate: Mutex::new(()),
            ready: Arc::new(AtomicBool::new(false)),
            last_immutable: AtomicU64::new(0),
            config,
            backend: backend.clone(),
            logger,
            event_validator,
        });

        interface.restore_seen().await?;
        interface.spawn_record_consumer(records_rx);
        interface.logger.start().await?;

        // Snapshot the seen set at every checkpoint.
        {
            let seen = interface.seen_events.clone();
            let backend_for_backup = backend.clone();
            backend
                .add_backup_callback(Box::new(move || {
                    let seen = seen.clone();
                    let backend = backend_for_backup.clone();
                    Box::pin(async move {
                        let page = seen.lock().await.encode();
                        match backend.place_meta(SEEN_EVENT_BACKUP_KEY, &page).await {
                            Ok(ok) => {
                                debug!(ok, "seen event snapshot written");
                                ok
                            }
                            Err(e) => {
                                error!(error = %e, "seen event snapshot write failed");
                                false
                            }
                        }
                    })
                }))
                .await;
        }

        interface.spawn_startup_gate(ps_channels);
        for channel in sync_channels {
            interface.spawn_sync_consumer(channel);
        }
        Ok(interface)
    }

    /// The DAG logger behind this interface.
    pub fn logger(&self) -> &Arc<MnemosyneDagLogger> {
        &self.logger
    }

    /// Whether the startup grace period has elapsed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Names currently held by the seen-event set.
    pub async fn seen_event_count(&self) -> usize {
        self.seen_events.lock().await.len()
    }

    /// The last logged immutability frontier.
    pub fn last_immutable_seq_no(&self) -> u64 {
        self.last_immutable.load(Ordering::SeqCst)
    }

    async fn restore_seen(&self) -> Result<()> {
        if let Some(page) = self.backend.get_meta(SEEN_EVENT_BACKUP_KEY).await? {
            self.seen_events
                .lock()
                .await
                .decode(&page)
                .map_err(|e| anyhow::anyhow!("seen event recovery failed: {e}"))?;
            debug!("seen event recovery success");
        }
        Ok(())
    }

    fn spawn_record_consumer(&self, mut records_rx: broadcast::Receiver<Record>) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            loop {
                match records_rx.recv().await {
                    Ok(record) => {
                        let Some(interface) = weak.upgrade() else { break };
                        interface.on_record_update(record).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "record updates lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_startup_gate(&self, ps_channels: Vec<Arc<dyn EventChannel>>) {
        let weak = self.weak.clone();
        let delay = self.config.startup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(interface) = weak.upgrade() else { return };
            interface.ready.store(true, Ordering::SeqCst);
            info!("startup delay elapsed, accepting events");
            for channel in ps_channels {
                let mut rx = channel.subscribe();
                let weak = interface.weak.clone();
                tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(notice) => {
                                let Some(interface) = weak.upgrade() else { break };
                                interface
                                    .on_event_data(notice.packet, notice.producer, notice.seq)
                                    .await;
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "event notices lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
            }
        });
    }

    fn spawn_sync_consumer(&self, channel: Arc<dyn SyncTransport>) {
        let weak = self.weak.clone();
        tokio::spawn(async move {
            let mut rx = channel.subscribe_missing();
            loop {
                match rx.recv().await {
                    Ok(ranges) => {
                        let Some(interface) = weak.upgrade() else { break };
                        interface.on_sync_update(&channel, ranges).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "interface sync updates lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Fetch sync-discovered events and feed them to the common sink.
    async fn on_sync_update(
        &self,
        channel: &Arc<dyn SyncTransport>,
        ranges: Vec<MissingRange>,
    ) {
        if !self.is_ready() {
            return;
        }
        for range in ranges {
            for seq in range.low..=range.high {
                debug!(node = %range.node, seq, "interface sync fetching item");
                let name = range.node.clone().append(Component::number(seq));
                let mut fetched = None;
                for _ in 0..=self.config.interface_sync_retries {
                    match channel
                        .fetch(Interest {
                            name: name.clone(),
                            can_be_prefix: true,
                            hint: None,
                        })
                        .await
                    {
                        Ok(unit) => {
                            fetched = Some(unit);
                            break;
                        }
                        Err(e) => debug!(error = %e, "interface fetch attempt failed"),
                    }
                }
                match fetched {
                    Some(unit) => self.on_event_data(unit, range.node.clone(), seq).await,
                    None => warn!(node = %range.node, seq, "interface sync item unreachable"),
                }
            }
        }
    }

    /// The common event sink: validate, dedup, back off, insert.
    async fn on_event_data(&self, packet: DataUnit, producer: Name, _seq: u64) {
        if let Err(e) = self.event_validator.validate(&packet) {
            error!(error = %e, "event verification failed");
            return;
        }
        let full_name = packet.full_name();
        debug!(event = %full_name, "received event data");
        if self.seen_events.lock().await.has_event(&full_name) {
            debug!(event = %full_name, "event already found in the log");
            return;
        }

        let skip_backoff = self.self_inserted.lock().await.contains(&producer);
        let delay_ms = if skip_backoff {
            0
        } else {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.config.insert_backoff_min_ms..=self.config.insert_backoff_max_ms)
        };
        let Some(interface) = self.weak.upgrade() else { return };
        tokio::spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            interface.delayed_event_insert(packet, producer).await;
        });
    }

    /// The post-backoff half of event insertion.
    async fn delayed_event_insert(&self, packet: DataUnit, producer: Name) {
        let full_name = packet.full_name();
        let _gate = self.insert_gate.lock().await;
        if self.seen_events.lock().await.has_event(&full_name) {
            debug!(event = %full_name, "event already found in the log");
            return;
        }
        debug!(event = %full_name, "event not found in the log, publishing");
        self.self_inserted.lock().await.insert(producer);
        match self.logger.create_record(Record::new(packet)).await {
            Ok(record_name) => {
                self.seen_events.lock().await.add_event(full_name.clone());
                info!(
                    peer = %self.config.logger.peer_prefix,
                    event = %full_name,
                    record = %record_name,
                    "published event data"
                );
            }
            Err(e @ (LoggerError::Timing(_) | LoggerError::NotEnoughTailingRecords { .. })) => {
                // Not fatal: the event resurfaces on the next sync update.
                warn!(event = %full_name, error = %e, "record creation deferred");
            }
            Err(e) => error!(event = %full_name, error = %e, "record creation failed"),
        }
    }

    /// Sink for committed third-party records.
    async fn on_record_update(&self, record: Record) {
        let Some(event) = record.body() else { return };
        if let Err(e) = self.event_validator.validate(event) {
            error!(error = %e, "verification error on event record");
            return;
        }
        let event_full_name = event.full_name();
        self.seen_events
            .lock()
            .await
            .add_event(event_full_name.clone());
        self.self_inserted
            .lock()
            .await
            .received_other(&event_full_name);

        let frontier = self.logger.max_reference_seq_no().await;
        let previous = self.last_immutable.fetch_max(frontier, Ordering::SeqCst);
        if frontier > previous {
            info!(
                peer = %self.config.logger.peer_prefix,
                frontier,
                "immutable record frontier advanced"
            );
        }
    }
}
