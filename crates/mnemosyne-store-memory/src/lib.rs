#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **mnemosyne-store-memory** – In-memory storage driver for Mnemosyne.
//!
//! An ordered, non-persistent [`RecordStore`] suitable for tests and for
//! deployments that accept losing the log on restart. Because the store is
//! volatile anyway, it is normally wrapped in a backend with an infinite
//! checkpoint frequency.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use mnemosyne_store_core::RecordStore;
use mnemosyne_types::{DataUnit, Name};

/// Ordered in-memory record and meta-data store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
    meta: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of resident records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

/// Accept `key` as a match for `prefix_uri` only at a component boundary.
fn boundary_match(prefix: &Name, prefix_uri: &str, key: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    key.len() == prefix_uri.len() || key[prefix_uri.len()..].starts_with('/')
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_record(&self, full_name: &Name) -> Result<Option<DataUnit>> {
        Ok(match self.records.read().await.get(&full_name.to_uri()) {
            Some(bytes) => Some(DataUnit::decode(bytes)?),
            None => None,
        })
    }

    async fn put_record(&self, unit: &DataUnit) -> Result<bool> {
        self.records
            .write()
            .await
            .insert(unit.full_name().to_uri(), unit.encode().to_vec());
        Ok(true)
    }

    async fn delete_record(&self, full_name: &Name) -> Result<()> {
        self.records.write().await.remove(&full_name.to_uri());
        Ok(())
    }

    async fn list_records(&self, prefix: &Name, count: usize) -> Result<Vec<Name>> {
        let prefix_uri = prefix.to_uri();
        let records = self.records.read().await;
        let mut out = Vec::new();
        for key in records.range(prefix_uri.clone()..).map(|(k, _)| k) {
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
        self.meta
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(true)
    }

    async fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.meta.read().await.get(key).cloned())
    }
}
