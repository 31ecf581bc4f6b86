//! Producers whose events this logger recently published on their behalf.
//!
//! Membership lets a follow-up event from the same producer skip the
//! randomized backoff. A shared churn counter clears the whole set every
//! `reset_freq` operations, bounding state without per-entry timers.

use std::collections::HashSet;

use mnemosyne_types::Name;

/// Bounded set of producer prefixes with coarse periodic reset.
pub struct SelfInsertedSet {
    producers: HashSet<Name>,
    reset_freq: u32,
    count: u32,
}

impl SelfInsertedSet {
    /// A set clearing itself every `reset_freq` operations.
    pub fn new(reset_freq: u32) -> Self {
        SelfInsertedSet {
            producers: HashSet::new(),
            reset_freq: reset_freq.max(1),
            count: 0,
        }
    }

    /// Whether `producer` is in the set.
    pub fn contains(&self, producer: &Name) -> bool {
        self.producers.contains(producer)
    }

    /// Number of producers in the set.
    pub fn len(&self) -> usize {
        self.producers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Record that we just published an event for `producer`.
    pub fn insert(&mut self, producer: Name) {
        self.producers.insert(producer);
        self.bump();
    }

    /// Remove `producer` outright.
    pub fn remove(&mut self, producer: &Name) {
        self.producers.remove(producer);
    }

    /// A committed record carried `event_name`: whichever member prefix
    /// authored it has now seen one of its outputs land, so drop it.
    /// Prefixes are tried longest first.
    pub fn received_other(&mut self, event_name: &Name) {
        if self.bump() {
            return;
        }
        for len in (1..=event_name.len()).rev() {
            let prefix = event_name.prefix(len);
            if self.producers.remove(&prefix) {
                break;
            }
        }
    }

    /// Count one operation; returns true when the set was just cleared.
    fn bump(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.reset_freq {
            self.producers.clear();
            self.count = 0;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::parse(uri).unwrap()
    }

    #[test]
    fn insert_and_lookup() {
        let mut set = SelfInsertedSet::new(100);
        set.insert(name("/client/a"));
        assert!(set.contains(&name("/client/a")));
        assert!(!set.contains(&name("/client/b")));
    }

    #[test]
    fn received_other_removes_longest_prefix() {
        let mut set = SelfInsertedSet::new(100);
        set.insert(name("/client"));
        set.insert(name("/client/a"));

        // The event name extends both members; the longer one goes.
        set.received_other(&name("/client/a/events/7"));
        assert!(!set.contains(&name("/client/a")));
        assert!(set.contains(&name("/client")));

        set.received_other(&name("/client/a/events/8"));
        assert!(!set.contains(&name("/client")));
    }

    #[test]
    fn received_other_ignores_unrelated_names() {
        let mut set = SelfInsertedSet::new(100);
        set.insert(name("/client"));
        set.received_other(&name("/other/events/1"));
        assert!(set.contains(&name("/client")));
    }

    #[test]
    fn churn_counter_clears_the_set() {
        let mut set = SelfInsertedSet::new(3);
        set.insert(name("/a"));
        set.insert(name("/b"));
        assert_eq!(set.len(), 2);
        // Third operation trips the reset.
        set.received_other(&name("/x/events/1"));
        assert!(set.is_empty());
    }
}
