#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **mnemosyne-store-sled** – Durable storage driver for Mnemosyne.
//!
//! A persistent [`RecordStore`] over the sled embedded database. Records
//! and meta-data live in separate trees; keys are the same URI strings the
//! in-memory driver uses, so the two drivers are interchangeable behind the
//! backend wrapper.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sled::{Db, Tree};

use mnemosyne_store_core::{RecordStore, StoreError};
use mnemosyne_types::{DataUnit, Name};

/// Persistent record and meta-data store backed by sled.
#[derive(Debug)]
pub struct SledStore {
    _db: Db, // keeps the database open for the lifetime of the store
    records: Tree,
    meta: Tree,
}

impl SledStore {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Self::from_db(db)
    }

    /// Wrap an existing sled database.
    pub fn from_db(db: Db) -> Result<Self> {
        let records = db
            .open_tree("records")
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        let meta = db
            .open_tree("meta")
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(SledStore {
            _db: db,
            records,
            meta,
        })
    }

    /// Create a throwaway store in a temporary location.
    #[cfg(test)]
    fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Number of resident records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> Result<()> {
        self.records.flush_async().await?;
        self.meta.flush_async().await?;
        Ok(())
    }
}

fn boundary_match(prefix: &Name, prefix_uri: &str, key: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    key.len() == prefix_uri.len() || key[prefix_uri.len()..].starts_with('/')
}

#[async_trait]
impl RecordStore for SledStore {
    async fn get_record(&self, full_name: &Name) -> Result<Option<DataUnit>> {
        Ok(match self.records.get(full_name.to_uri().as_bytes())? {
            Some(bytes) => Some(DataUnit::decode(&bytes)?),
            None => None,
        })
    }

    async fn put_record(&self, unit: &DataUnit) -> Result<bool> {
        self.records
            .insert(unit.full_name().to_uri().as_bytes(), unit.encode().to_vec())?;
        Ok(true)
    }

    async fn delete_record(&self, full_name: &Name) -> Result<()> {
        self.records.remove(full_name.to_uri().as_bytes())?;
        Ok(())
    }

    async fn list_records(&self, prefix: &Name, count: usize) -> Result<Vec<Name>> {
        let prefix_uri = prefix.to_uri();
        let mut out = Vec::new();
        for entry in self.records.range(prefix_uri.as_bytes().to_vec()..) {
            let (key, _) = entry?;
            let key = std::str::from_utf8(&key)
                .map_err(|_| anyhow::anyhow!("non-UTF-8 record key"))?;
            if !key.starts_with(&prefix_uri) {
                break;
            }
            if !boundary_match(prefix, &prefix_uri, key) {
                continue;
            }
            out.push(Name::parse(key)?);
            if count != 0 && out.len() >= count {
                break;
            }
        }
        Ok(out)
    }

    async fn place_meta(&self, key: &str, value: &[u8]) -> Result<bool> {
        Ok(self.meta.insert(key.as_bytes(), value).map(|_| true)?)
    }

    async fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.meta.get(key.as_bytes())?.map(|v| v.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mnemosyne_types::{DigestSigner, Record, CONTENT_TYPE_BLOB};

    fn record_unit(producer: &str, seq: u64) -> DataUnit {
        DataUnit::build(
            Record::record_name(&Name::parse(producer).unwrap(), seq),
            CONTENT_TYPE_BLOB,
            0,
            Bytes::from(format!("{producer}:{seq}")),
            &DigestSigner,
        )
    }

    #[tokio::test]
    async fn basic_operations() {
        let store = SledStore::temporary().unwrap();
        let unit = record_unit("/a", 1);
        assert!(store.put_record(&unit).await.unwrap());
        assert_eq!(
            store.get_record(&unit.full_name()).await.unwrap().unwrap(),
            unit
        );
        assert_eq!(store.record_count(), 1);
        store.delete_record(&unit.full_name()).await.unwrap();
        assert!(store.get_record(&unit.full_name()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_with_boundaries() {
        let store = SledStore::temporary().unwrap();
        store.put_record(&record_unit("/a", 1)).await.unwrap();
        store.put_record(&record_unit("/a", 10)).await.unwrap();
        store.put_record(&record_unit("/ab", 1)).await.unwrap();

        let a = Name::parse("/a").unwrap();
        assert_eq!(store.list_records(&a, 0).await.unwrap().len(), 2);

        let seq1 = Record::record_name(&a, 1);
        let matches = store.list_records(&seq1, 1).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(Record::seq_id(&matches[0]).unwrap(), 1);
    }

    #[tokio::test]
    async fn meta_round_trip() {
        let store = SledStore::temporary().unwrap();
        assert!(store.place_meta("MnemosyneSeenEvent", b"names").await.unwrap());
        assert_eq!(
            store.get_meta("MnemosyneSeenEvent").await.unwrap().unwrap(),
            b"names"
        );
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let unit = record_unit("/a", 1);

        {
            let store = SledStore::open(&path).unwrap();
            store.put_record(&unit).await.unwrap();
            store.place_meta("SeqNoBackup", b"vv").await.unwrap();
            store.flush().await.unwrap();
        }

        let store = SledStore::open(&path).unwrap();
        assert_eq!(
            store.get_record(&unit.full_name()).await.unwrap().unwrap(),
            unit
        );
        assert_eq!(store.get_meta("SeqNoBackup").await.unwrap().unwrap(), b"vv");
    }
}
