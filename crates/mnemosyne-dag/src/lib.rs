#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **mnemosyne-dag** – The DAG maintenance engine of the Mnemosyne log.
//!
//! This crate coordinates everything between the storage backend and the
//! content-addressed sync substrate: publishing and fetching records
//! ([`RecordSync`]), holding back records whose predecessors are not yet
//! resident ([`DagReferenceChecker`]), collapsing indirect reference paths
//! into an immutability frontier ([`ReplicationCounter`]) and driving tip
//! selection, record creation and restart recovery
//! ([`MnemosyneDagLogger`]).
//!
//! The substrate itself is external; it is consumed through the
//! [`SyncTransport`] trait, with an in-process [`MemoryHub`] bundled for
//! tests and single-process deployments.

pub mod config;
pub mod error;
pub mod logger;
pub mod memory_transport;
pub mod record_sync;
pub mod reference_checker;
pub mod replication_counter;
pub mod transport;

pub use config::{LoggerConfig, StoreKind};
pub use error::LoggerError;
pub use logger::{MnemosyneDagLogger, SEQ_NO_BACKUP_KEY};
pub use memory_transport::{MemoryHub, MemoryTransport};
pub use record_sync::{RecordSync, FETCH_TIMEOUT, RECORD_FRESHNESS};
pub use reference_checker::{DagReferenceChecker, PendingRecord};
pub use replication_counter::ReplicationCounter;
pub use transport::{Interest, InterestHandler, MissingRange, SyncTransport, TransportError};
