//! End-to-end tests of the event interface.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use mnemosyne::{
    Config, EventChannel, MemoryEventChannel, Mnemosyne, SEEN_EVENT_BACKUP_KEY,
};
use mnemosyne_dag::{LoggerConfig, MemoryHub, StoreKind, SyncTransport};
use mnemosyne_store_core::Backend;
use mnemosyne_store_memory::MemoryStore;
use mnemosyne_types::{
    AcceptAllValidator, Component, DataUnit, DigestSigner, Name, Record, CONTENT_TYPE_BLOB,
};

fn name(uri: &str) -> Name {
    Name::parse(uri).unwrap()
}

fn test_config(peer: &str) -> Config {
    let logger = LoggerConfig::new(
        name("/mnemosyne/dag-sync"),
        name("/mnemosyne/hint"),
        name(peer),
    )
    .with_database(StoreKind::Memory, "");
    let mut config = Config::new(logger);
    config.insert_backoff_min_ms = 0;
    config.insert_backoff_max_ms = 0;
    config.startup_delay = Duration::ZERO;
    config
}

/// An event packet named by the interface sync convention, so the same
/// packet can arrive over pub/sub and sync with one identity.
fn client_event(seq: u64) -> DataUnit {
    DataUnit::build(
        name("/client").append(Component::number(seq)),
        CONTENT_TYPE_BLOB,
        60_000,
        Bytes::from(format!("reading-{seq}")),
        &DigestSigner,
    )
}

struct Harness {
    interface: Arc<Mnemosyne>,
    backend: Arc<Backend>,
    ps: Arc<MemoryEventChannel>,
    sync_net: Arc<dyn SyncTransport>,
}

async fn harness(config: Config, backend: Arc<Backend>) -> Harness {
    let dag_hub = MemoryHub::new();
    let sync_hub = MemoryHub::new();
    let ps = Arc::new(MemoryEventChannel::default());
    let sync_net: Arc<dyn SyncTransport> = sync_hub.endpoint().await;

    let interface = Mnemosyne::new(
        config,
        backend.clone(),
        dag_hub.endpoint().await,
        vec![ps.clone() as Arc<dyn EventChannel>],
        vec![sync_hub.endpoint().await as Arc<dyn SyncTransport>],
        Arc::new(AcceptAllValidator),
        Arc::new(AcceptAllValidator),
        Arc::new(DigestSigner),
    )
    .await
    .unwrap();

    // The startup gate flips on a spawned task; wait for it.
    for _ in 0..100 {
        if interface.is_ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(interface.is_ready());

    Harness {
        interface,
        backend,
        ps,
        sync_net,
    }
}

async fn records_carrying(backend: &Backend, peer: &Name, event: &DataUnit) -> usize {
    let mut matching = 0;
    for full_name in backend.list_records(peer, 0).await.unwrap() {
        let Some(unit) = backend.get_record(&full_name).await.unwrap() else {
            continue;
        };
        if let Ok(record) = Record::from_unit(unit) {
            if record.body() == Some(event) {
                matching += 1;
            }
        }
    }
    matching
}

#[tokio::test]
async fn duplicate_submissions_yield_one_record() {
    let backend = Arc::new(Backend::new(Arc::new(MemoryStore::new()), u32::MAX));
    let h = harness(test_config("/a"), backend).await;
    let event = client_event(1);

    // The same packet arrives over pub/sub and over sync.
    h.ps.publish(event.clone(), name("/client")).await;
    h.sync_net.put(event.clone()).await;
    h.sync_net.announce(&name("/client"), 1).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(records_carrying(&h.backend, &name("/a"), &event).await, 1);
    assert!(h.interface.seen_event_count().await >= 1);
}

#[tokio::test]
async fn repeated_pubsub_submissions_are_deduplicated() {
    let backend = Arc::new(Backend::new(Arc::new(MemoryStore::new()), u32::MAX));
    let h = harness(test_config("/a"), backend).await;
    let event = client_event(1);

    h.ps.publish(event.clone(), name("/client")).await;
    h.ps.publish(event.clone(), name("/client")).await;
    h.ps.publish(event.clone(), name("/client")).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(records_carrying(&h.backend, &name("/a"), &event).await, 1);
}

#[tokio::test]
async fn events_before_the_startup_gate_are_ignored() {
    let backend = Arc::new(Backend::new(Arc::new(MemoryStore::new()), u32::MAX));
    let mut config = test_config("/a");
    config.startup_delay = Duration::from_millis(400);

    let dag_hub = MemoryHub::new();
    let ps = Arc::new(MemoryEventChannel::default());
    let interface = Mnemosyne::new(
        config,
        backend.clone(),
        dag_hub.endpoint().await,
        vec![ps.clone() as Arc<dyn EventChannel>],
        Vec::new(),
        Arc::new(AcceptAllValidator),
        Arc::new(AcceptAllValidator),
        Arc::new(DigestSigner),
    )
    .await
    .unwrap();

    // Published before the subscription opens: never delivered.
    let event = client_event(1);
    ps.publish(event.clone(), name("/client")).await;
    assert!(!interface.is_ready());

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(interface.is_ready());
    assert_eq!(records_carrying(&backend, &name("/a"), &event).await, 0);
}

#[tokio::test]
async fn seen_snapshot_survives_restart() {
    // Checkpoint on every write so the snapshot lands quickly.
    let backend = Arc::new(Backend::new(Arc::new(MemoryStore::new()), 1));
    let first = harness(test_config("/a"), backend.clone()).await;

    first.ps.publish(client_event(1), name("/client")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    first.ps.publish(client_event(2), name("/client")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let page = backend.get_meta(SEEN_EVENT_BACKUP_KEY).await.unwrap();
    assert!(page.is_some());
    drop(first);

    // A fresh interface over the same backend recovers the membership.
    let second = harness(test_config("/a"), backend.clone()).await;
    assert!(second.interface.seen_event_count().await >= 1);
}
