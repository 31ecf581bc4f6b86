//! Error taxonomy of the DAG engine.

use thiserror::Error;

use mnemosyne_store_core::StoreError;
use mnemosyne_types::{CodecError, Name, RecordError};

/// Errors surfaced by the DAG logger.
///
/// `Timing` and `NotEnoughTailingRecords` are returned to the caller and
/// retried under caller policy; the configuration, restore and checkpoint
/// variants are fatal at process level.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The configuration cannot express a working DAG.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The persisted version-vector checkpoint could not be decoded.
    #[error("failed to decode version vector checkpoint: {0}")]
    VersionVectorDecode(#[source] CodecError),

    /// A checkpointed producer has no record resident in the store.
    #[error("failed to restore sequenced record for {0}")]
    RestoreFailed(Name),

    /// Self's tip lags behind the discovered self sequence; a fetch is in
    /// progress and creation must wait.
    #[error("waiting for self record discovery at sequence {0}")]
    Timing(u64),

    /// Fewer tips than preceding pointers required.
    #[error("not enough tailing records: {have} < {need}")]
    NotEnoughTailingRecords {
        /// Tips currently available.
        have: usize,
        /// Pointers each record must carry.
        need: usize,
    },

    /// A record was expected to carry its encoded data unit.
    #[error("record is not built")]
    UnbuiltRecord,

    /// Checkpoint machinery failure; fatal.
    #[error(transparent)]
    Checkpoint(#[from] StoreError),

    /// Record construction or naming failure.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for LoggerError {
    fn from(e: anyhow::Error) -> Self {
        LoggerError::Storage(e)
    }
}
