//! Time-windowed deduplication of event names.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use mnemosyne_types::{CodecError, Name};

/// Add-only set of event full names with TTL-based eviction.
///
/// Every insertion purges entries older than the window. The set encodes
/// as a flat sequence of name TLVs; decoding re-adds the names with fresh
/// timestamps, which is good enough for the snapshot's purpose of
/// surviving a restart.
pub struct SeenEventSet {
    ttl: Duration,
    events: HashSet<Name>,
    order: VecDeque<(Instant, Name)>,
}

impl SeenEventSet {
    /// A set evicting entries older than `ttl`.
    pub fn new(ttl: Duration) -> Self {
        SeenEventSet {
            ttl,
            events: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Whether `name` is inside the window.
    pub fn has_event(&self, name: &Name) -> bool {
        self.events.contains(name)
    }

    /// Number of names inside the window.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Insert `name` and purge expired entries.
    pub fn add_event(&mut self, name: Name) {
        if self.events.contains(&name) {
            return;
        }
        self.events.insert(name.clone());
        self.order.push_back((Instant::now(), name));
        loop {
            match self.order.front() {
                Some((inserted, _)) if inserted.elapsed() >= self.ttl => {
                    if let Some((_, stale)) = self.order.pop_front() {
                        self.events.remove(&stale);
                    }
                }
                _ => break,
            }
        }
    }

    /// Encode the membership as a flat container of names.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for (_, name) in &self.order {
            if self.events.contains(name) {
                name.encode(&mut buf);
            }
        }
        buf.freeze()
    }

    /// Re-add every name from an encoded snapshot. Timestamps reset to now.
    pub fn decode(&mut self, mut bytes: &[u8]) -> Result<(), CodecError> {
        while !bytes.is_empty() {
            let name = Name::read_from(&mut bytes)?;
            self.add_event(name);
        }
        Ok(())
    }
}
