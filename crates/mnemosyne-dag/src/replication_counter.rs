//! Witness counting along this logger's chain.
//!
//! Other producers witness this logger's records either directly (a
//! pointer into the self chain) or transitively (a pointer into a chain
//! that itself witnesses self). The counter keeps, per external producer,
//! a monotone envelope from that producer's own sequence numbers to the
//! best self sequence each one witnesses, and buckets producers by their
//! current best witness. The *immutability frontier* is the highest self
//! sequence witnessed by the full complement of counted producers; it is
//! reported as a high-water mark and never moves backwards.
//!
//! The tracked state is bounded: at most `max_counted` producers are
//! tracked, and whole lowest buckets are evicted beyond that. After a
//! restart the counter rebuilds from incoming records and may briefly
//! undercount; it converges as peers keep publishing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::trace;

use mnemosyne_types::{Name, Record};

/// Bounded tracker of independent reference paths onto the self chain.
pub struct ReplicationCounter {
    peer_prefix: Name,
    max_counted: u32,
    /// self-seq bucket -> producers currently witnessing that self-seq.
    locations: BTreeMap<u64, BTreeSet<Name>>,
    /// producer -> the self-seq bucket it currently occupies.
    tracked: HashMap<Name, u64>,
    /// producer -> (their seq -> best witnessed self-seq), strictly
    /// increasing in both coordinates.
    reference_points: HashMap<Name, BTreeMap<u64, u64>>,
    frontier: u64,
}

impl ReplicationCounter {
    /// A counter for `peer_prefix`'s chain tracking up to `max_counted`
    /// external producers. `max_counted == 0` disables the counter.
    pub fn new(peer_prefix: Name, max_counted: u32) -> Self {
        ReplicationCounter {
            peer_prefix,
            max_counted,
            locations: BTreeMap::new(),
            tracked: HashMap::new(),
            reference_points: HashMap::new(),
            frontier: 0,
        }
    }

    /// The tracked witnesses, best first, at most `max_counted` entries.
    pub fn counts(&self) -> Vec<u64> {
        let mut out = Vec::new();
        if self.max_counted == 0 {
            return out;
        }
        'buckets: for (seq, bucket) in self.locations.iter().rev() {
            for _ in bucket {
                out.push(*seq);
                if out.len() >= self.max_counted as usize {
                    break 'buckets;
                }
            }
        }
        out
    }

    /// The highest self sequence witnessed by the full complement of
    /// counted producers so far. Monotone non-decreasing.
    pub fn max_reference_seq_no(&self) -> u64 {
        self.frontier
    }

    /// Fold one committed external record into the witness state.
    pub fn record_update(&mut self, record: &Record) {
        if self.max_counted == 0 {
            return;
        }
        let Some(unit) = record.unit() else {
            return;
        };
        let (Ok(producer), Ok(their_seq)) = (
            Record::producer_prefix(unit.name()),
            Record::seq_id(unit.name()),
        ) else {
            return;
        };
        if producer == self.peer_prefix {
            return;
        }

        // Best self sequence this record witnesses, across all pointers.
        let mut pointed_to = 0u64;
        for pointer in record.pointers() {
            let (Ok(pointed_producer), Ok(pointed_seq)) = (
                Record::producer_prefix(pointer),
                Record::seq_id(pointer),
            ) else {
                continue;
            };
            let witnessed = if pointed_producer == self.peer_prefix {
                pointed_seq
            } else {
                self.reference_points
                    .get(&pointed_producer)
                    .and_then(|envelope| envelope.range(..=pointed_seq).next_back())
                    .map(|(_, self_seq)| *self_seq)
                    .unwrap_or(0)
            };
            pointed_to = pointed_to.max(witnessed);
        }
        if pointed_to == 0 {
            return;
        }
        let floor = self.locations.keys().next().copied().unwrap_or(0);
        if pointed_to < floor {
            return;
        }

        // Envelope update: trim below the floor, keep both coordinates
        // strictly increasing.
        let envelope = self.reference_points.entry(producer.clone()).or_default();
        envelope.retain(|_, self_seq| *self_seq >= floor);
        if envelope
            .get(&their_seq)
            .is_some_and(|self_seq| *self_seq >= pointed_to)
        {
            return;
        }
        if envelope
            .range(..their_seq)
            .next_back()
            .is_some_and(|(_, self_seq)| *self_seq > pointed_to)
        {
            return;
        }
        envelope.insert(their_seq, pointed_to);
        let dominated: Vec<u64> = envelope
            .range(their_seq + 1..)
            .filter(|(_, self_seq)| **self_seq <= pointed_to)
            .map(|(k, _)| *k)
            .collect();
        for k in dominated {
            envelope.remove(&k);
        }

        // Move the producer to its new bucket if the witness improved.
        match self.tracked.get(&producer).copied() {
            Some(old) if old >= pointed_to => {}
            old => {
                if let Some(old) = old {
                    if let Some(bucket) = self.locations.get_mut(&old) {
                        bucket.remove(&producer);
                        if bucket.is_empty() {
                            self.locations.remove(&old);
                        }
                    }
                }
                trace!(producer = %producer, self_seq = pointed_to, "witness advanced");
                self.locations
                    .entry(pointed_to)
                    .or_default()
                    .insert(producer.clone());
                self.tracked.insert(producer, pointed_to);
            }
        }

        // Bound the tracked set by evicting whole lowest buckets.
        while self.tracked.len() > self.max_counted as usize {
            let Some((&lowest, _)) = self.locations.iter().next() else {
                break;
            };
            if let Some(bucket) = self.locations.remove(&lowest) {
                for evicted in bucket {
                    self.tracked.remove(&evicted);
                    self.reference_points.remove(&evicted);
                }
            }
        }

        if self.tracked.len() == self.max_counted as usize {
            if let Some((&lowest, _)) = self.locations.iter().next() {
                self.frontier = self.frontier.max(lowest);
            }
        }
    }
}
