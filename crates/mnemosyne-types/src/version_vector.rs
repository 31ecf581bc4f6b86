//! Version vectors: producer to highest contiguously observed sequence.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::CodecError;
use crate::name::Name;
use crate::tlv::{self, tag};

/// Mapping from producer prefix to the highest sequence committed for it.
///
/// Absent producers read as 0. Iteration is ordered by producer name, so
/// the encoding is deterministic and round-trips exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionVector {
    entries: BTreeMap<Name, u64>,
}

impl VersionVector {
    /// An empty vector.
    pub fn new() -> Self {
        VersionVector::default()
    }

    /// The sequence recorded for `producer`, 0 if absent.
    pub fn get(&self, producer: &Name) -> u64 {
        self.entries.get(producer).copied().unwrap_or(0)
    }

    /// Record `seq` for `producer`, replacing any previous value.
    pub fn set(&mut self, producer: Name, seq: u64) {
        self.entries.insert(producer, seq);
    }

    /// Number of producers with an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no producer has an entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in producer-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&Name, u64)> {
        self.entries.iter().map(|(name, seq)| (name, *seq))
    }

    /// Encode as a flat sequence of entry TLVs.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for (producer, seq) in &self.entries {
            let mut entry = BytesMut::new();
            producer.encode(&mut entry);
            let mut scratch = BytesMut::new();
            tlv::write_nonneg_int(&mut scratch, *seq);
            tlv::write_tlv(&mut entry, tag::VERSION_SEQ, &scratch);
            tlv::write_tlv(&mut buf, tag::VERSION_ENTRY, &entry);
        }
        buf.freeze()
    }

    /// Decode from the flat entry sequence.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, CodecError> {
        let mut entries = BTreeMap::new();
        while !bytes.is_empty() {
            let mut entry = tlv::expect_tlv(&mut bytes, tag::VERSION_ENTRY)?;
            let producer = Name::read_from(&mut entry)?;
            let seq = tlv::read_nonneg_int(tlv::expect_tlv(&mut entry, tag::VERSION_SEQ)?)?;
            if !entry.is_empty() {
                return Err(CodecError::bad("trailing bytes in version entry"));
            }
            entries.insert(producer, seq);
        }
        Ok(VersionVector { entries })
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (producer, seq)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{producer}:{seq}")?;
        }
        write!(f, "}}")
    }
}
