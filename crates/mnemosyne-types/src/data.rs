//! Signed, named data units and the signing/validation seams.
//!
//! A [`DataUnit`] is the wire-level packet the sync substrate moves around:
//! a name, a small meta block, an opaque payload and a signature. The
//! *full name* appends the blake3 digest of the complete encoding, which is
//! what makes names content addressed. Key management lives behind the
//! [`DataSigner`] and [`DataValidator`] traits; the bundled implementations
//! cover integrity-only digest signatures and permissive validation.

use bytes::{Bytes, BytesMut};

use crate::error::{CodecError, ValidationError};
use crate::name::{Component, Name};
use crate::tlv::{self, tag};

/// Content type for opaque payloads.
pub const CONTENT_TYPE_BLOB: u32 = 0;
/// Content type for payloads that encapsulate another data unit.
pub const CONTENT_TYPE_ENCAPSULATED: u32 = 6;

/// Signature scheme: blake3 integrity digest over the signed portion.
pub const SIGNATURE_TYPE_DIGEST: u64 = 0;

//─────────────────────────────
//  Signing and validation seams
//─────────────────────────────

/// Produces signatures over the signed portion of a data unit.
pub trait DataSigner: Send + Sync {
    /// Signature scheme discriminator written into the unit.
    fn signature_type(&self) -> u64;

    /// Sign the given signed portion.
    fn sign(&self, signed_portion: &[u8]) -> Bytes;
}

/// Deterministic integrity-only signer: a blake3 digest of the signed
/// portion. Every node derives identical bytes for identical input, which
/// the genesis-name convention depends on.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestSigner;

impl DataSigner for DigestSigner {
    fn signature_type(&self) -> u64 {
        SIGNATURE_TYPE_DIGEST
    }

    fn sign(&self, signed_portion: &[u8]) -> Bytes {
        Bytes::copy_from_slice(blake3::hash(signed_portion).as_bytes())
    }
}

/// Validates data units against a trust policy.
pub trait DataValidator: Send + Sync {
    /// Accept or reject the unit.
    fn validate(&self, unit: &DataUnit) -> Result<(), ValidationError>;
}

/// Accepts everything. Stands in where deployments have not configured a
/// trust schema.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllValidator;

impl DataValidator for AcceptAllValidator {
    fn validate(&self, _unit: &DataUnit) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Requires a correct digest signature.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestValidator;

impl DataValidator for DigestValidator {
    fn validate(&self, unit: &DataUnit) -> Result<(), ValidationError> {
        if unit.signature_type() != SIGNATURE_TYPE_DIGEST {
            return Err(ValidationError {
                name: unit.full_name(),
                reason: format!("unexpected signature type {}", unit.signature_type()),
            });
        }
        let expected = DigestSigner.sign(&unit.signed_portion());
        if expected != *unit.signature() {
            return Err(ValidationError {
                name: unit.full_name(),
                reason: "digest signature mismatch".to_owned(),
            });
        }
        Ok(())
    }
}

//─────────────────────────────
//  Data unit
//─────────────────────────────

/// One signed packet: name, meta information, payload and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUnit {
    name: Name,
    content_type: u32,
    freshness_ms: u64,
    content: Bytes,
    signature_type: u64,
    signature: Bytes,
}

impl DataUnit {
    /// Build and sign a unit.
    pub fn build(
        name: Name,
        content_type: u32,
        freshness_ms: u64,
        content: Bytes,
        signer: &dyn DataSigner,
    ) -> Self {
        let mut unit = DataUnit {
            name,
            content_type,
            freshness_ms,
            content,
            signature_type: signer.signature_type(),
            signature: Bytes::new(),
        };
        unit.signature = signer.sign(&unit.signed_portion());
        unit
    }

    /// The unit's name, without the digest component.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The payload bytes.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// The content type discriminator.
    pub fn content_type(&self) -> u32 {
        self.content_type
    }

    /// Freshness period in milliseconds.
    pub fn freshness_ms(&self) -> u64 {
        self.freshness_ms
    }

    /// The signature scheme discriminator.
    pub fn signature_type(&self) -> u64 {
        self.signature_type
    }

    /// The signature bytes.
    pub fn signature(&self) -> &Bytes {
        &self.signature
    }

    /// The portion covered by the signature: everything up to and including
    /// the signature information block.
    pub fn signed_portion(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_signed_portion(&mut buf);
        buf.freeze()
    }

    fn encode_signed_portion(&self, buf: &mut BytesMut) {
        self.name.encode(buf);

        let mut meta = BytesMut::new();
        let mut scratch = BytesMut::new();
        tlv::write_nonneg_int(&mut scratch, self.content_type as u64);
        tlv::write_tlv(&mut meta, tag::CONTENT_TYPE, &scratch);
        scratch.clear();
        tlv::write_nonneg_int(&mut scratch, self.freshness_ms);
        tlv::write_tlv(&mut meta, tag::FRESHNESS_PERIOD, &scratch);
        tlv::write_tlv(buf, tag::META_INFO, &meta);

        tlv::write_tlv(buf, tag::CONTENT, &self.content);

        let mut siginfo = BytesMut::new();
        scratch.clear();
        tlv::write_nonneg_int(&mut scratch, self.signature_type);
        tlv::write_tlv(&mut siginfo, tag::SIGNATURE_TYPE, &scratch);
        tlv::write_tlv(buf, tag::SIGNATURE_INFO, &siginfo);
    }

    /// Canonical encoding of the whole unit.
    pub fn encode(&self) -> Bytes {
        let mut inner = BytesMut::new();
        self.encode_signed_portion(&mut inner);
        tlv::write_tlv(&mut inner, tag::SIGNATURE_VALUE, &self.signature);

        let mut buf = BytesMut::new();
        tlv::write_tlv(&mut buf, tag::DATA, &inner);
        buf.freeze()
    }

    /// Decode a unit from its canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut outer = bytes;
        let mut inner = tlv::expect_tlv(&mut outer, tag::DATA)?;
        if !outer.is_empty() {
            return Err(CodecError::bad("trailing bytes after data unit"));
        }

        let name = Name::read_from(&mut inner)?;

        let mut meta = tlv::expect_tlv(&mut inner, tag::META_INFO)?;
        let content_type =
            tlv::read_nonneg_int(tlv::expect_tlv(&mut meta, tag::CONTENT_TYPE)?)? as u32;
        let freshness_ms = tlv::read_nonneg_int(tlv::expect_tlv(&mut meta, tag::FRESHNESS_PERIOD)?)?;
        if !meta.is_empty() {
            return Err(CodecError::bad("trailing bytes in meta information"));
        }

        let content = Bytes::copy_from_slice(tlv::expect_tlv(&mut inner, tag::CONTENT)?);

        let mut siginfo = tlv::expect_tlv(&mut inner, tag::SIGNATURE_INFO)?;
        let signature_type = tlv::read_nonneg_int(tlv::expect_tlv(&mut siginfo, tag::SIGNATURE_TYPE)?)?;
        if !siginfo.is_empty() {
            return Err(CodecError::bad("trailing bytes in signature information"));
        }

        let signature = Bytes::copy_from_slice(tlv::expect_tlv(&mut inner, tag::SIGNATURE_VALUE)?);
        if !inner.is_empty() {
            return Err(CodecError::bad("trailing bytes in data unit"));
        }

        Ok(DataUnit {
            name,
            content_type,
            freshness_ms,
            content,
            signature_type,
            signature,
        })
    }

    /// Blake3 digest of the canonical encoding.
    pub fn digest(&self) -> [u8; 32] {
        *blake3::hash(&self.encode()).as_bytes()
    }

    /// The full name: the unit's name extended with its content digest.
    pub fn full_name(&self) -> Name {
        self.name.clone().append(Component::digest(self.digest()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_unit() -> DataUnit {
        DataUnit::build(
            Name::parse("/app/events/42").unwrap(),
            CONTENT_TYPE_BLOB,
            60_000,
            Bytes::from_static(b"temperature=21.5"),
            &DigestSigner,
        )
    }

    #[test]
    fn encode_decode_round_trip() {
        let unit = sample_unit();
        let decoded = DataUnit::decode(&unit.encode()).unwrap();
        assert_eq!(decoded, unit);
    }

    #[test]
    fn digest_is_stable() {
        let unit = sample_unit();
        assert_eq!(unit.digest(), sample_unit().digest());
        assert!(unit.full_name().last().unwrap().is_digest());
        assert_eq!(unit.full_name().prefix(unit.name().len()), *unit.name());
    }

    #[test]
    fn digest_validator_accepts_and_rejects() {
        let unit = sample_unit();
        assert!(DigestValidator.validate(&unit).is_ok());

        let mut tampered = unit.clone();
        tampered.content = Bytes::from_static(b"temperature=99.9");
        assert!(DigestValidator.validate(&tampered).is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(DataUnit::decode(b"not a data unit").is_err());
        let unit = sample_unit();
        let mut bytes = unit.encode().to_vec();
        bytes.push(0);
        assert!(DataUnit::decode(&bytes).is_err());
    }
}
