#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **mnemosyne-store-core** – Storage abstraction for the Mnemosyne log.
//!
//! This crate defines the [`RecordStore`] trait implemented by the storage
//! drivers (in-memory, sled) and the [`Backend`] wrapper that owns the
//! deferred, coalesced checkpoint machinery shared by every component that
//! persists state. It contains no concrete storage engine.
//!
//! Record keys are full-name URIs and therefore always begin with `/`;
//! the remaining key space holds small meta-data blobs (checkpoints, the
//! seen-event snapshot). The backend enforces that split.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use mnemosyne_types::{DataUnit, Name};

/// Checkpoint frequency that never fires; used by volatile stores.
pub const INFINITE_BACKUP_FREQ: u32 = u32::MAX;

//─────────────────────────────
//  Storage driver trait
//─────────────────────────────

/// Abstraction over an ordered record store plus a meta-data key space.
///
/// Implementations keep records under their full-name URI key in ascending
/// key order; `list_records` must honor component boundaries, so that a
/// prefix never matches a sibling whose URI merely shares leading bytes.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load the record stored under `full_name`, if resident.
    async fn get_record(&self, full_name: &Name) -> Result<Option<DataUnit>>;

    /// Store a record under its full name. Returns `false` on write failure.
    async fn put_record(&self, unit: &DataUnit) -> Result<bool>;

    /// Remove the record stored under `full_name`, if resident.
    async fn delete_record(&self, full_name: &Name) -> Result<()>;

    /// List full names under `prefix` in ascending order. `count == 0`
    /// returns every match, otherwise at most `count`.
    async fn list_records(&self, prefix: &Name, count: usize) -> Result<Vec<Name>>;

    /// Store a meta-data value. Returns `false` on write failure.
    async fn place_meta(&self, key: &str, value: &[u8]) -> Result<bool>;

    /// Load a meta-data value.
    async fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors raised by the backend wrapper and the storage drivers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A registered checkpoint callback reported failure. Continuing would
    /// risk silent data loss, so callers treat this as fatal.
    #[error("checkpoint write failed")]
    CheckpointWriteFailed,

    /// The underlying store could not be opened.
    #[error("failed to open storage backend: {0}")]
    OpenFailed(String),

    /// Meta keys live outside the record key space.
    #[error("meta keys must not begin with '/': {0}")]
    BadMetaKey(String),
}

//─────────────────────────────
//  Backend wrapper
//─────────────────────────────

/// Async callback run at each coalesced checkpoint; `false` means the
/// checkpoint could not be written.
pub type BackupCallback = Box<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

struct BackupState {
    callbacks: Vec<BackupCallback>,
    pending: u32,
}

/// Shared storage handle with deferred, coalesced checkpointing.
///
/// `trigger_backup` merely counts writes; once the count reaches the
/// configured frequency every registered callback runs in insertion order
/// and the count resets. Callbacks must not call back into
/// `trigger_backup`.
pub struct Backend {
    store: Arc<dyn RecordStore>,
    backup_every: u32,
    backup: Mutex<BackupState>,
}

impl Backend {
    /// Wrap a storage driver with the given checkpoint frequency.
    pub fn new(store: Arc<dyn RecordStore>, backup_every: u32) -> Self {
        Backend {
            store,
            backup_every: backup_every.max(1),
            backup: Mutex::new(BackupState {
                callbacks: Vec::new(),
                pending: 0,
            }),
        }
    }

    /// Load the record stored under `full_name`.
    pub async fn get_record(&self, full_name: &Name) -> Result<Option<DataUnit>> {
        self.store.get_record(full_name).await
    }

    /// Store a record under its full name.
    pub async fn put_record(&self, unit: &DataUnit) -> Result<bool> {
        self.store.put_record(unit).await
    }

    /// Remove the record stored under `full_name`.
    pub async fn delete_record(&self, full_name: &Name) -> Result<()> {
        self.store.delete_record(full_name).await
    }

    /// List full names under `prefix`; see [`RecordStore::list_records`].
    pub async fn list_records(&self, prefix: &Name, count: usize) -> Result<Vec<Name>> {
        self.store.list_records(prefix, count).await
    }

    /// Store a meta-data value. Keys beginning with `/` are rejected.
    pub async fn place_meta(&self, key: &str, value: &[u8]) -> Result<bool> {
        if key.is_empty() || key.starts_with('/') {
            return Err(StoreError::BadMetaKey(key.to_owned()).into());
        }
        self.store.place_meta(key, value).await
    }

    /// Load a meta-data value. Keys beginning with `/` are rejected.
    pub async fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if key.is_empty() || key.starts_with('/') {
            return Err(StoreError::BadMetaKey(key.to_owned()).into());
        }
        self.store.get_meta(key).await
    }

    /// Register a checkpoint callback, appended after existing ones.
    pub async fn add_backup_callback(&self, callback: BackupCallback) {
        self.backup.lock().await.callbacks.push(callback);
    }

    /// Count one write toward the next checkpoint; when the configured
    /// frequency is reached, run every callback in order.
    pub async fn trigger_backup(&self) -> Result<(), StoreError> {
        let mut state = self.backup.lock().await;
        state.pending += 1;
        if state.pending < self.backup_every {
            return Ok(());
        }
        debug!(pending = state.pending, "running checkpoint callbacks");
        for callback in &state.callbacks {
            if !callback().await {
                return Err(StoreError::CheckpointWriteFailed);
            }
        }
        state.pending = 0;
        Ok(())
    }
}
