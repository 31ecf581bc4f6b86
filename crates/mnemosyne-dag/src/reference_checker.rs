//! Reference-completeness gating.
//!
//! Fetched records may arrive before the records they point to. The
//! checker parks such records, keyed by the pointer they wait on, and
//! releases them in dependency order once every pointer is resident. A
//! record with a malformed or forged-genesis pointer is dropped outright
//! and never retried.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use anyhow::Result;
use tracing::{debug, warn};

use mnemosyne_store_core::Backend;
use mnemosyne_types::{Name, Record};

/// A record held together with its sync coordinates.
pub struct PendingRecord {
    /// The decoded record.
    pub record: Record,
    /// Producer under which the sync layer announced it.
    pub producer: Name,
    /// Sequence number under that producer.
    pub seq: u64,
}

enum Disposition {
    Ready,
    Wait(Name),
    Drop(String),
}

/// Holds records whose predecessors are not yet resident and releases
/// them in dependency order.
#[derive(Default)]
pub struct DagReferenceChecker {
    waiting: HashMap<Name, PendingRecord>,
    reverse: BTreeMap<Name, Vec<Name>>,
}

impl DagReferenceChecker {
    /// An empty checker.
    pub fn new() -> Self {
        DagReferenceChecker::default()
    }

    /// Number of records currently parked.
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Offer a record. Returns every record that became releasable, in
    /// dependency order; the caller commits them before notifying anyone.
    ///
    /// The drain runs over an explicit queue rather than recursion, so
    /// arbitrarily long buffered chains release without deepening the
    /// stack.
    pub async fn add_record(
        &mut self,
        record: Record,
        producer: Name,
        seq: u64,
        backend: &Backend,
    ) -> Result<Vec<PendingRecord>> {
        let mut ready = Vec::new();
        let mut released: HashSet<Name> = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(PendingRecord {
            record,
            producer,
            seq,
        });

        while let Some(pending) = queue.pop_front() {
            let Some(full_name) = pending.record.full_name() else {
                warn!("discarding unbuilt record");
                continue;
            };
            match self.disposition(&pending, &released, backend).await? {
                Disposition::Drop(reason) => {
                    warn!(record = %full_name, reason, "dropping record");
                }
                Disposition::Wait(pointer) => {
                    debug!(record = %full_name, waiting_for = %pointer, "record parked");
                    self.reverse
                        .entry(pointer)
                        .or_default()
                        .push(full_name.clone());
                    self.waiting.insert(full_name, pending);
                }
                Disposition::Ready => {
                    debug!(record = %full_name, "record references satisfied");
                    released.insert(full_name.clone());
                    if let Some(dependents) = self.reverse.remove(&full_name) {
                        for dependent in dependents {
                            if let Some(parked) = self.waiting.remove(&dependent) {
                                queue.push_back(parked);
                            }
                        }
                    }
                    ready.push(pending);
                }
            }
        }
        Ok(ready)
    }

    async fn disposition(
        &self,
        pending: &PendingRecord,
        released: &HashSet<Name>,
        backend: &Backend,
    ) -> Result<Disposition> {
        for pointer in pending.record.pointers() {
            if !Record::is_full_record_name(pointer) {
                return Ok(Disposition::Drop(format!(
                    "bad preceding pointer {pointer}"
                )));
            }
            if Record::is_genesis_record(pointer).unwrap_or(false) {
                let producer = match Record::producer_prefix(pointer) {
                    Ok(producer) => producer,
                    Err(_) => {
                        return Ok(Disposition::Drop(format!(
                            "bad preceding pointer {pointer}"
                        )))
                    }
                };
                if *pointer != Record::genesis_full_name(&producer) {
                    return Ok(Disposition::Drop(format!(
                        "bad genesis pointer {pointer}"
                    )));
                }
                continue;
            }
            if self.waiting.contains_key(pointer) {
                return Ok(Disposition::Wait(pointer.clone()));
            }
            if released.contains(pointer) {
                continue;
            }
            if backend.get_record(pointer).await?.is_none() {
                return Ok(Disposition::Wait(pointer.clone()));
            }
        }
        Ok(Disposition::Ready)
    }
}
