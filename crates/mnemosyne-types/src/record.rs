//! Records: the nodes of the witness DAG.
//!
//! Record names follow `<producer-prefix>/RECORD/<seq>`; the sync substrate
//! appends the content digest to form the full name used as the storage
//! key. Sequence 0 marks the producer's genesis record, which is never
//! stored: its full name is a pure function of the producer prefix.

use std::collections::HashSet;

use bytes::{Bytes, BytesMut};

use crate::data::{DataUnit, DigestSigner, CONTENT_TYPE_BLOB};
use crate::error::{CodecError, RecordError};
use crate::name::{Component, Name};
use crate::tlv::{self, tag};

/// The keyword component separating producer prefix and sequence number.
pub const RECORD_KEYWORD: &str = "RECORD";

/// One DAG node: preceding pointers plus an optional embedded event.
///
/// A record is assembled (body, then pointers), encoded into a [`DataUnit`]
/// exactly once, and immutable afterwards. Decoding a fetched unit yields a
/// record that is already built.
#[derive(Debug, Clone)]
pub struct Record {
    pointers: Vec<Name>,
    body: Option<DataUnit>,
    unit: Option<DataUnit>,
}

impl Record {
    /// Start a record carrying the given event payload.
    pub fn new(event: DataUnit) -> Self {
        Record {
            pointers: Vec::new(),
            body: Some(event),
            unit: None,
        }
    }

    /// Start a record with no payload.
    pub fn empty() -> Self {
        Record {
            pointers: Vec::new(),
            body: None,
            unit: None,
        }
    }

    /// Reconstruct a record from a fetched data unit.
    ///
    /// Rejects units whose name is not a record name, genesis units (they
    /// are never materialized) and malformed header or body containers.
    pub fn from_unit(unit: DataUnit) -> Result<Self, RecordError> {
        if !Self::is_record_name(unit.name()) || Self::seq_id(unit.name())? == 0 {
            return Err(RecordError::NotRecordName(unit.name().clone()));
        }

        let mut content = &unit.content()[..];
        let mut header = tlv::expect_tlv(&mut content, tag::RECORD_HEADER).map_err(bad_container)?;
        let mut pointers = Vec::new();
        while !header.is_empty() {
            let (typ, value) = tlv::read_tlv(&mut header)?;
            if typ != tag::NAME {
                return Err(CodecError::bad("non-name element in record header").into());
            }
            pointers.push(Name::decode_value(value)?);
        }

        let body_value = tlv::expect_tlv(&mut content, tag::RECORD_BODY).map_err(bad_container)?;
        if !content.is_empty() {
            return Err(CodecError::bad("trailing bytes after record body").into());
        }
        let body = if body_value.is_empty() {
            None
        } else {
            Some(DataUnit::decode(body_value)?)
        };

        Ok(Record {
            pointers,
            body,
            unit: Some(unit),
        })
    }

    /// The preceding pointers, in header order.
    pub fn pointers(&self) -> &[Name] {
        &self.pointers
    }

    /// The embedded event, if any.
    pub fn body(&self) -> Option<&DataUnit> {
        self.body.as_ref()
    }

    /// Whether nothing has been set on this record yet.
    pub fn is_empty(&self) -> bool {
        self.unit.is_none() && self.pointers.is_empty() && self.body.is_none()
    }

    /// Append a preceding pointer. Fails once the record is built.
    pub fn add_pointer(&mut self, full_name: Name) -> Result<(), RecordError> {
        if self.unit.is_some() {
            return Err(RecordError::AlreadyBuilt);
        }
        self.pointers.push(full_name);
        Ok(())
    }

    /// Set the embedded event. Fails once the record is built.
    pub fn set_body(&mut self, event: DataUnit) -> Result<(), RecordError> {
        if self.unit.is_some() {
            return Err(RecordError::AlreadyBuilt);
        }
        self.body = Some(event);
        Ok(())
    }

    /// Encode header and body containers into content bytes.
    pub fn encode_content(&self) -> Bytes {
        let mut buf = BytesMut::new();

        let mut header = BytesMut::new();
        for pointer in &self.pointers {
            pointer.encode(&mut header);
        }
        tlv::write_tlv(&mut buf, tag::RECORD_HEADER, &header);

        let body = match &self.body {
            Some(event) => event.encode(),
            None => Bytes::new(),
        };
        tlv::write_tlv(&mut buf, tag::RECORD_BODY, &body);

        buf.freeze()
    }

    /// Attach the encoded data unit. Fails if one is already attached.
    pub fn set_unit(&mut self, unit: DataUnit) -> Result<(), RecordError> {
        if self.unit.is_some() {
            return Err(RecordError::AlreadyBuilt);
        }
        self.unit = Some(unit);
        Ok(())
    }

    /// The encoded data unit, once built.
    pub fn unit(&self) -> Option<&DataUnit> {
        self.unit.as_ref()
    }

    /// The full name of the built record.
    pub fn full_name(&self) -> Option<Name> {
        self.unit.as_ref().map(DataUnit::full_name)
    }

    /// Verify the header carries `expected` pointers from distinct producers.
    pub fn check_pointer_count(&self, expected: usize) -> Result<(), RecordError> {
        if self.pointers.len() != expected {
            return Err(RecordError::InsufficientPointers {
                found: self.pointers.len(),
                expected,
            });
        }
        let mut producers = HashSet::new();
        for pointer in &self.pointers {
            let producer = Self::producer_prefix(pointer)?;
            if !producers.insert(producer.clone()) {
                return Err(RecordError::DuplicateProducer(producer));
            }
        }
        Ok(())
    }

    //─────────────────────────────
    //  Name algebra
    //─────────────────────────────

    /// Whether `name` follows `<producer>/RECORD/<seq>[/digest]`.
    pub fn is_record_name(name: &Name) -> bool {
        let is_full = matches!(name.last(), Some(Component::Digest(_))) as usize;
        let len = name.len();
        if len < 2 + is_full {
            return false;
        }
        if name.get(len - 1 - is_full).and_then(Component::as_number).is_none() {
            return false;
        }
        matches!(
            name.get(len - 2 - is_full),
            Some(Component::Generic(k)) if k == RECORD_KEYWORD
        )
    }

    /// Whether `name` carries a digest as its final component.
    pub fn is_full_record_name(name: &Name) -> bool {
        Self::is_record_name(name) && matches!(name.last(), Some(Component::Digest(_)))
    }

    /// Whether `name` names a genesis record (sequence 0).
    pub fn is_genesis_record(name: &Name) -> Result<bool, RecordError> {
        Ok(Self::seq_id(name)? == 0)
    }

    /// The producer prefix of a record name.
    pub fn producer_prefix(name: &Name) -> Result<Name, RecordError> {
        if !Self::is_record_name(name) {
            return Err(RecordError::NotRecordName(name.clone()));
        }
        let is_full = matches!(name.last(), Some(Component::Digest(_))) as usize;
        Ok(name.prefix(name.len() - 2 - is_full))
    }

    /// The sequence number of a record name.
    pub fn seq_id(name: &Name) -> Result<u64, RecordError> {
        if !Self::is_record_name(name) {
            return Err(RecordError::NotRecordName(name.clone()));
        }
        let is_full = matches!(name.last(), Some(Component::Digest(_))) as usize;
        Ok(name
            .get(name.len() - 1 - is_full)
            .and_then(Component::as_number)
            .unwrap_or(0))
    }

    /// The record name for `producer` at `seq`.
    pub fn record_name(producer: &Name, seq: u64) -> Name {
        producer
            .clone()
            .append(Component::generic(RECORD_KEYWORD))
            .append(Component::number(seq))
    }

    /// The canonical genesis data unit for `producer`: an empty payload
    /// under `<producer>/RECORD/0`, signed with the fixed digest signer.
    pub fn genesis_unit(producer: &Name) -> DataUnit {
        DataUnit::build(
            Self::record_name(producer, 0),
            CONTENT_TYPE_BLOB,
            0,
            Bytes::new(),
            &DigestSigner,
        )
    }

    /// The deterministic genesis full name for `producer`. Identical on
    /// every node for the same producer.
    pub fn genesis_full_name(producer: &Name) -> Name {
        Self::genesis_unit(producer).full_name()
    }
}

fn bad_container(_: CodecError) -> RecordError {
    CodecError::bad("record header or body container missing").into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataSigner, CONTENT_TYPE_ENCAPSULATED};

    fn event(suffix: &str) -> DataUnit {
        DataUnit::build(
            Name::parse(&format!("/app/events/{suffix}")).unwrap(),
            CONTENT_TYPE_BLOB,
            60_000,
            Bytes::from_static(b"payload"),
            &DigestSigner,
        )
    }

    fn build_record(record: &Record, producer: &str, seq: u64) -> DataUnit {
        DataUnit::build(
            Record::record_name(&Name::parse(producer).unwrap(), seq),
            CONTENT_TYPE_ENCAPSULATED,
            300_000,
            record.encode_content(),
            &DigestSigner,
        )
    }

    #[test]
    fn name_algebra() {
        let name = Record::record_name(&Name::parse("/a").unwrap(), 7);
        assert_eq!(name.to_uri(), "/a/RECORD/7");
        assert!(Record::is_record_name(&name));
        assert!(!Record::is_genesis_record(&name).unwrap());
        assert_eq!(Record::producer_prefix(&name).unwrap().to_uri(), "/a");
        assert_eq!(Record::seq_id(&name).unwrap(), 7);

        let full = name.append(Component::digest([3u8; 32]));
        assert!(Record::is_full_record_name(&full));
        assert_eq!(Record::producer_prefix(&full).unwrap().to_uri(), "/a");
        assert_eq!(Record::seq_id(&full).unwrap(), 7);

        assert!(!Record::is_record_name(&Name::parse("/a/b/c").unwrap()));
        assert!(Record::producer_prefix(&Name::parse("/x").unwrap()).is_err());
    }

    #[test]
    fn genesis_name_is_deterministic() {
        let a = Name::parse("/a").unwrap();
        assert_eq!(Record::genesis_full_name(&a), Record::genesis_full_name(&a));
        assert_ne!(
            Record::genesis_full_name(&a),
            Record::genesis_full_name(&Name::parse("/b").unwrap())
        );
        assert!(Record::is_genesis_record(&Record::genesis_full_name(&a)).unwrap());
    }

    #[test]
    fn content_round_trip() {
        let mut record = Record::new(event("1"));
        let p1 = Record::genesis_full_name(&Name::parse("/a").unwrap());
        let p2 = Record::genesis_full_name(&Name::parse("/b").unwrap());
        record.add_pointer(p1.clone()).unwrap();
        record.add_pointer(p2.clone()).unwrap();

        let unit = build_record(&record, "/c", 1);
        let decoded = Record::from_unit(unit).unwrap();
        assert_eq!(decoded.pointers(), &[p1, p2]);
        assert_eq!(decoded.body().unwrap(), record.body().unwrap());
    }

    #[test]
    fn empty_body_round_trip() {
        let mut record = Record::empty();
        record
            .add_pointer(Record::genesis_full_name(&Name::parse("/a").unwrap()))
            .unwrap();
        let unit = build_record(&record, "/c", 2);
        let decoded = Record::from_unit(unit).unwrap();
        assert!(decoded.body().is_none());
        assert_eq!(decoded.pointers().len(), 1);
    }

    #[test]
    fn built_record_is_immutable() {
        let mut record = Record::new(event("2"));
        record
            .add_pointer(Record::genesis_full_name(&Name::parse("/a").unwrap()))
            .unwrap();
        let unit = build_record(&record, "/c", 1);
        record.set_unit(unit).unwrap();

        assert!(matches!(
            record.add_pointer(Record::genesis_full_name(&Name::parse("/b").unwrap())),
            Err(RecordError::AlreadyBuilt)
        ));
        assert!(matches!(
            record.set_body(event("3")),
            Err(RecordError::AlreadyBuilt)
        ));
        assert!(record.full_name().is_some());
    }

    #[test]
    fn decode_rejects_bad_units() {
        // Wrong name shape.
        let unit = DataUnit::build(
            Name::parse("/not/a/record").unwrap(),
            CONTENT_TYPE_ENCAPSULATED,
            0,
            Bytes::new(),
            &DigestSigner,
        );
        assert!(matches!(
            Record::from_unit(unit),
            Err(RecordError::NotRecordName(_))
        ));

        // Genesis units are never decoded as records.
        let unit = Record::genesis_unit(&Name::parse("/a").unwrap());
        assert!(Record::from_unit(unit).is_err());

        // Garbage content.
        let unit = DataUnit::build(
            Record::record_name(&Name::parse("/a").unwrap(), 1),
            CONTENT_TYPE_ENCAPSULATED,
            0,
            Bytes::from_static(b"garbage"),
            &DigestSigner,
        );
        assert!(Record::from_unit(unit).is_err());

        // Header containing a non-name element.
        let mut content = BytesMut::new();
        let mut header = BytesMut::new();
        tlv::write_tlv(&mut header, tag::CONTENT, b"oops");
        tlv::write_tlv(&mut content, tag::RECORD_HEADER, &header);
        tlv::write_tlv(&mut content, tag::RECORD_BODY, b"");
        let unit = DataUnit::build(
            Record::record_name(&Name::parse("/a").unwrap(), 1),
            CONTENT_TYPE_ENCAPSULATED,
            0,
            content.freeze(),
            &DigestSigner,
        );
        assert!(Record::from_unit(unit).is_err());
    }

    #[test]
    fn pointer_count_checks() {
        let mut record = Record::new(event("4"));
        record
            .add_pointer(Record::genesis_full_name(&Name::parse("/a").unwrap()))
            .unwrap();
        assert!(matches!(
            record.check_pointer_count(2),
            Err(RecordError::InsufficientPointers {
                found: 1,
                expected: 2
            })
        ));

        record
            .add_pointer(
                Record::record_name(&Name::parse("/a").unwrap(), 4)
                    .append(Component::digest([9u8; 32])),
            )
            .unwrap();
        assert!(matches!(
            record.check_pointer_count(2),
            Err(RecordError::DuplicateProducer(_))
        ));

        let mut ok = Record::new(event("5"));
        ok.add_pointer(Record::genesis_full_name(&Name::parse("/a").unwrap()))
            .unwrap();
        ok.add_pointer(Record::genesis_full_name(&Name::parse("/b").unwrap()))
            .unwrap();
        ok.check_pointer_count(2).unwrap();
    }

    #[test]
    fn signer_is_deterministic() {
        let portion = b"stable bytes";
        assert_eq!(DigestSigner.sign(portion), DigestSigner.sign(portion));
    }
}
