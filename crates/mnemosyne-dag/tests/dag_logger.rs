//! End-to-end tests of the DAG logger over the in-process hub.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use mnemosyne_dag::{
    LoggerConfig, LoggerError, MemoryHub, MnemosyneDagLogger, StoreKind, SyncTransport,
};
use mnemosyne_store_core::{Backend, RecordStore, StoreError};
use mnemosyne_store_memory::MemoryStore;
use mnemosyne_store_sled::SledStore;
use mnemosyne_types::{
    AcceptAllValidator, Component, DataUnit, DigestSigner, Name, Record, CONTENT_TYPE_BLOB,
    CONTENT_TYPE_ENCAPSULATED,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn name(uri: &str) -> Name {
    Name::parse(uri).unwrap()
}

fn config(peer: &str) -> LoggerConfig {
    LoggerConfig::new(
        name("/mnemosyne/dag-sync"),
        name("/mnemosyne/hint"),
        name(peer),
    )
    .with_database(StoreKind::Memory, "")
}

fn event(label: &str) -> DataUnit {
    DataUnit::build(
        name(&format!("/app/events/{label}")),
        CONTENT_TYPE_BLOB,
        60_000,
        Bytes::from(label.as_bytes().to_vec()),
        &DigestSigner,
    )
}

async fn spawn_logger(
    hub: &MemoryHub,
    config: LoggerConfig,
    backend: Arc<Backend>,
) -> Arc<MnemosyneDagLogger> {
    let logger = MnemosyneDagLogger::new(
        config,
        backend,
        hub.endpoint().await,
        Arc::new(AcceptAllValidator),
        Arc::new(DigestSigner),
    )
    .await
    .unwrap();
    logger.start().await.unwrap();
    logger
}

fn memory_backend() -> Arc<Backend> {
    Arc::new(Backend::new(Arc::new(MemoryStore::new()), u32::MAX))
}

/// Build a foreign record unit for `producer` at `seq`.
fn foreign_record(producer: &str, seq: u64, pointers: &[Name]) -> (Record, DataUnit) {
    let mut record = Record::new(event(&format!("{producer}-{seq}")));
    for pointer in pointers {
        record.add_pointer(pointer.clone()).unwrap();
    }
    let unit = DataUnit::build(
        Record::record_name(&name(producer), seq),
        CONTENT_TYPE_ENCAPSULATED,
        300_000,
        record.encode_content(),
        &DigestSigner,
    );
    record.set_unit(unit.clone()).unwrap();
    (record, unit)
}

#[tokio::test]
async fn genesis_bootstrap() {
    let hub = MemoryHub::new();
    let mut cfg = config("/a");
    cfg.max_counted_replication = 0;
    let backend = memory_backend();
    let logger = spawn_logger(&hub, cfg, backend.clone()).await;

    // Tip map holds self's genesis plus one synthetic lane.
    let tips = logger.tailing_records().await;
    assert_eq!(tips.len(), 2);
    let producers: Vec<String> = tips.iter().map(|(p, _)| p.to_uri()).collect();
    assert!(producers.contains(&"/a".to_string()));
    assert!(producers.contains(&"/0".to_string()));
    for (producer, full_name) in &tips {
        assert_eq!(*full_name, Record::genesis_full_name(producer));
    }

    let full_name = logger
        .create_record(Record::new(event("hello")))
        .await
        .unwrap();
    assert_eq!(Record::producer_prefix(&full_name).unwrap(), name("/a"));
    assert_eq!(Record::seq_id(&full_name).unwrap(), 1);
    assert!(full_name.last().unwrap().is_digest());

    assert_eq!(logger.collected_versions().await.get(&name("/a")), 1);
    assert!(backend.get_record(&full_name).await.unwrap().is_some());
}

#[tokio::test]
async fn reference_gating_holds_records_until_dependencies_commit() {
    let hub = MemoryHub::new();
    let observer = spawn_logger(&hub, config("/c"), memory_backend()).await;
    let mut records = observer.subscribe();

    let net = hub.endpoint().await;
    let lane0 = Name::root().append(Component::number(0));
    let (_, a1) = foreign_record(
        "/a",
        1,
        &[
            Record::genesis_full_name(&name("/a")),
            Record::genesis_full_name(&lane0),
        ],
    );
    let (_, b1) = foreign_record(
        "/b",
        1,
        &[a1.full_name(), Record::genesis_full_name(&lane0)],
    );

    // The observer learns about B1 before A1 resolves locally.
    net.put(b1.clone()).await;
    net.announce(&name("/b"), 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(observer.collected_versions().await.get(&name("/b")), 0);

    net.put(a1.clone()).await;
    net.announce(&name("/a"), 1).await;

    // Both commit, dependency first.
    let first = timeout(RECV_TIMEOUT, records.recv()).await.unwrap().unwrap();
    let second = timeout(RECV_TIMEOUT, records.recv()).await.unwrap().unwrap();
    assert_eq!(first.full_name().unwrap(), a1.full_name());
    assert_eq!(second.full_name().unwrap(), b1.full_name());

    let versions = observer.collected_versions().await;
    assert_eq!(versions.get(&name("/a")), 1);
    assert_eq!(versions.get(&name("/b")), 1);
}

#[tokio::test]
async fn checkpoint_restart_replays_forward() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mnemosyne.db");

    let mut cfg = config("/a").with_database(StoreKind::Sled, &path);
    cfg.seq_no_backup_freq = 5;
    cfg.max_self_re_ref_count = 16;

    {
        let hub = MemoryHub::new();
        let store = Arc::new(SledStore::open(&path).unwrap());
        let backend = Arc::new(Backend::new(store.clone(), cfg.seq_no_backup_freq));
        let logger = spawn_logger(&hub, cfg.clone(), backend).await;
        for i in 0..12 {
            logger
                .create_record(Record::new(event(&format!("e{i}"))))
                .await
                .unwrap();
        }
        assert_eq!(logger.known_self_seq().await, 12);
        store.flush().await.unwrap();
    }

    // The persisted checkpoint lags by at most freq - 1 writes.
    {
        let store = Arc::new(SledStore::open(&path).unwrap());
        let page = store.get_meta(mnemosyne_dag::SEQ_NO_BACKUP_KEY).await;
        // Read through the raw driver: the checkpoint was written at 10.
        let page = page.unwrap().unwrap();
        let vv = mnemosyne_types::VersionVector::decode(&page).unwrap();
        assert!(vv.get(&name("/a")) >= 8);
        assert!(vv.get(&name("/a")) <= 12);
    }

    // Restart: the walk from the checkpoint recovers the full chain.
    let hub = MemoryHub::new();
    let store = Arc::new(SledStore::open(&path).unwrap());
    let backend = Arc::new(Backend::new(store, cfg.seq_no_backup_freq));
    let logger = spawn_logger(&hub, cfg, backend).await;

    assert_eq!(logger.collected_versions().await.get(&name("/a")), 12);
    assert_eq!(logger.known_self_seq().await, 12);
    let tips = logger.tailing_records().await;
    let self_tip = tips.iter().find(|(p, _)| *p == name("/a")).unwrap();
    assert_eq!(Record::seq_id(&self_tip.1).unwrap(), 12);
}

#[tokio::test]
async fn create_record_respects_reference_budgets() {
    let hub = MemoryHub::new();
    let mut cfg = config("/a");
    cfg.max_self_re_ref_count = 2;
    let logger = spawn_logger(&hub, cfg, memory_backend()).await;

    // The synthetic lane can be referenced twice, then retires.
    logger
        .create_record(Record::new(event("one")))
        .await
        .unwrap();
    logger
        .create_record(Record::new(event("two")))
        .await
        .unwrap();
    let err = logger.create_record(Record::new(event("three"))).await;
    assert!(matches!(
        err,
        Err(LoggerError::NotEnoughTailingRecords { have: 1, need: 2 })
    ));
}

#[tokio::test]
async fn failed_checkpoint_leaves_creation_retryable() {
    let hub = MemoryHub::new();
    // Checkpoint on every write so the failure surfaces immediately.
    let backend = Arc::new(Backend::new(Arc::new(MemoryStore::new()), 1));
    let logger = spawn_logger(&hub, config("/a"), backend.clone()).await;

    backend
        .add_backup_callback(Box::new(|| Box::pin(async { false })))
        .await;

    let err = logger.create_record(Record::new(event("first"))).await;
    assert!(matches!(
        err,
        Err(LoggerError::Checkpoint(StoreError::CheckpointWriteFailed))
    ));

    // Self's tip survives the failure and points at the published record.
    let tips = logger.tailing_records().await;
    let self_tip = tips.iter().find(|(p, _)| *p == name("/a")).unwrap();
    assert_eq!(Record::seq_id(&self_tip.1).unwrap(), 1);

    // Later attempts keep reporting the checkpoint failure instead of
    // wedging on a missing self tip.
    let err = logger.create_record(Record::new(event("second"))).await;
    assert!(matches!(
        err,
        Err(LoggerError::Checkpoint(StoreError::CheckpointWriteFailed))
    ));
    let tips = logger.tailing_records().await;
    let self_tip = tips.iter().find(|(p, _)| *p == name("/a")).unwrap();
    assert_eq!(Record::seq_id(&self_tip.1).unwrap(), 2);
}

#[tokio::test]
async fn create_record_waits_for_self_recovery() {
    let hub = MemoryHub::new();
    let logger = spawn_logger(&hub, config("/a"), memory_backend()).await;

    // A peer advertises self records we have not fetched yet.
    let net = hub.endpoint().await;
    net.announce(&name("/a"), 5).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = logger.create_record(Record::new(event("early"))).await;
    assert!(matches!(err, Err(LoggerError::Timing(5))));
}

#[tokio::test]
async fn two_loggers_witness_each_other() {
    let hub = MemoryHub::new();
    let mut cfg_a = config("/a");
    cfg_a.max_counted_replication = 1;
    let logger_a = spawn_logger(&hub, cfg_a, memory_backend()).await;
    let logger_b = spawn_logger(&hub, config("/b"), memory_backend()).await;
    let mut b_records = logger_b.subscribe();

    // /a publishes; /b ingests it and publishes a record that references
    // /a's tip, which /a then counts as a witness.
    let a1 = logger_a
        .create_record(Record::new(event("from-a")))
        .await
        .unwrap();
    let seen = timeout(RECV_TIMEOUT, b_records.recv()).await.unwrap().unwrap();
    assert_eq!(seen.full_name().unwrap(), a1);

    let mut a_records = logger_a.subscribe();
    let b1 = logger_b
        .create_record(Record::new(event("from-b")))
        .await
        .unwrap();
    let seen = timeout(RECV_TIMEOUT, a_records.recv()).await.unwrap().unwrap();
    assert_eq!(seen.full_name().unwrap(), b1);

    // /b's tip set contained /a's record; selection must have included it
    // (self tip plus one sampled from a pool containing /a's tip).
    let witnessed = seen.pointers().iter().any(|pointer| {
        Record::producer_prefix(pointer).map(|p| p == name("/a")).unwrap_or(false)
    });
    if witnessed {
        assert_eq!(logger_a.max_reference_seq_no().await, 1);
    }
}
