//! DAG logger configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use mnemosyne_store_core::INFINITE_BACKUP_FREQ;
use mnemosyne_types::Name;

use crate::error::LoggerError;

/// Storage driver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Durable sled database.
    Sled,
    /// Volatile ordered map.
    Memory,
}

/// Configuration of one DAG logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Multicast name under which the DAG sync group runs.
    pub sync_prefix: Name,

    /// Forwarding-hint name used by recovery fetches.
    pub hint_prefix: Name,

    /// This logger's producer prefix.
    pub peer_prefix: Name,

    /// Preceding pointers carried by every record (at least 2).
    pub preceding_record_num: usize,

    /// Direct retries when fetching a record.
    pub record_fetch_retries: u32,

    /// Hinted retries after direct fetches are exhausted.
    pub hinted_fetch_retries: u32,

    /// Writes between checkpoint flushes.
    pub seq_no_backup_freq: u32,

    /// Replication counter size; 0 disables the counter.
    pub max_counted_replication: u32,

    /// How often one tip may be referenced before it is retired.
    pub max_self_re_ref_count: u32,

    /// Storage driver.
    pub database_type: StoreKind,

    /// Path of the durable database.
    pub database_path: PathBuf,
}

impl LoggerConfig {
    /// Configuration with the given names and default tuning.
    pub fn new(sync_prefix: Name, hint_prefix: Name, peer_prefix: Name) -> Self {
        LoggerConfig {
            sync_prefix,
            hint_prefix,
            peer_prefix,
            preceding_record_num: 2,
            record_fetch_retries: 1,
            hinted_fetch_retries: 2,
            seq_no_backup_freq: 10,
            max_counted_replication: 2,
            max_self_re_ref_count: 3,
            database_type: StoreKind::Sled,
            database_path: PathBuf::new(),
        }
    }

    /// Select the storage driver. A volatile store disables checkpointing,
    /// since there is nothing durable to recover from.
    pub fn with_database(mut self, kind: StoreKind, path: impl Into<PathBuf>) -> Self {
        self.database_type = kind;
        self.database_path = path.into();
        if kind == StoreKind::Memory {
            self.seq_no_backup_freq = INFINITE_BACKUP_FREQ;
        }
        self
    }

    /// Set the preceding pointer count.
    pub fn with_preceding_records(mut self, count: usize) -> Self {
        self.preceding_record_num = count;
        self
    }

    /// Set the replication counter bound.
    pub fn with_max_counted_replication(mut self, count: u32) -> Self {
        self.max_counted_replication = count;
        self
    }

    /// Check the configuration can express a working DAG.
    pub fn validate(&self) -> Result<(), LoggerError> {
        if self.preceding_record_num < 2 {
            return Err(LoggerError::Config(format!(
                "preceding_record_num must be at least 2, got {}",
                self.preceding_record_num
            )));
        }
        if self.peer_prefix.is_empty() {
            return Err(LoggerError::Config("peer_prefix must not be empty".into()));
        }
        if self.max_self_re_ref_count == 0 {
            return Err(LoggerError::Config(
                "max_self_re_ref_count must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> LoggerConfig {
        LoggerConfig::new(
            Name::parse("/mnemosyne/dag-sync").unwrap(),
            Name::parse("/mnemosyne/hint").unwrap(),
            Name::parse("/a").unwrap(),
        )
    }

    #[test]
    fn defaults_validate() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_single_pointer() {
        let config = base().with_preceding_records(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn memory_store_disables_checkpoints() {
        let config = base().with_database(StoreKind::Memory, "");
        assert_eq!(config.seq_no_backup_freq, INFINITE_BACKUP_FREQ);
    }
}
