//! Hierarchical names and their URI / TLV forms.
//!
//! A name is an ordered list of components. Three component kinds exist:
//! opaque generics (path segments, keywords), non-negative integers
//! (sequence numbers, synthetic producers) and 32-byte content digests
//! (the final component of a *full name*).
//!
//! The URI form joins components with `/`; generics are percent-encoded,
//! numbers render as decimal and digests as 64 lowercase hex characters.
//! Parsing classifies segments the same way, so every name produced by
//! this crate round-trips through its URI. The URI form doubles as the
//! storage key for records, which is why record keys always begin with `/`.

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CodecError;
use crate::tlv::{self, tag};

//─────────────────────────────
//  Components
//─────────────────────────────

/// One component of a [`Name`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    /// Opaque segment, e.g. a path element or the `RECORD` keyword.
    Generic(String),
    /// Non-negative integer segment (sequence numbers, synthetic lanes).
    Number(u64),
    /// Content digest segment, always the final component of a full name.
    Digest([u8; 32]),
}

impl Component {
    /// Build a generic component.
    pub fn generic(s: impl Into<String>) -> Self {
        Component::Generic(s.into())
    }

    /// Build a number component.
    pub fn number(v: u64) -> Self {
        Component::Number(v)
    }

    /// Build a digest component.
    pub fn digest(d: [u8; 32]) -> Self {
        Component::Digest(d)
    }

    /// Whether this is a digest component.
    pub fn is_digest(&self) -> bool {
        matches!(self, Component::Digest(_))
    }

    /// The numeric value, if this is a number component.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Component::Number(v) => Some(*v),
            _ => None,
        }
    }

    fn write_uri(&self, out: &mut String) {
        match self {
            Component::Generic(s) => {
                for b in s.bytes() {
                    match b {
                        b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                            out.push(b as char)
                        }
                        _ => {
                            out.push('%');
                            out.push_str(&format!("{b:02X}"));
                        }
                    }
                }
            }
            Component::Number(v) => out.push_str(&v.to_string()),
            Component::Digest(d) => out.push_str(&hex::encode(d)),
        }
    }

    fn parse_segment(segment: &str) -> Result<Self, CodecError> {
        if segment.len() == 64 && segment.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            let raw = hex::decode(segment).map_err(|e| CodecError::bad(e.to_string()))?;
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&raw);
            return Ok(Component::Digest(digest));
        }
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(v) = segment.parse::<u64>() {
                return Ok(Component::Number(v));
            }
        }
        Ok(Component::Generic(percent_decode(segment)?))
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Component::Generic(s) => tlv::write_tlv(buf, tag::GENERIC_COMPONENT, s.as_bytes()),
            Component::Number(v) => {
                let mut inner = BytesMut::new();
                tlv::write_nonneg_int(&mut inner, *v);
                tlv::write_tlv(buf, tag::NUMBER_COMPONENT, &inner);
            }
            Component::Digest(d) => tlv::write_tlv(buf, tag::DIGEST_COMPONENT, d),
        }
    }

    fn decode(typ: u64, value: &[u8]) -> Result<Self, CodecError> {
        match typ {
            tag::GENERIC_COMPONENT => {
                let s = std::str::from_utf8(value)
                    .map_err(|_| CodecError::bad("generic component is not UTF-8"))?;
                Ok(Component::Generic(s.to_owned()))
            }
            tag::NUMBER_COMPONENT => Ok(Component::Number(tlv::read_nonneg_int(value)?)),
            tag::DIGEST_COMPONENT => {
                if value.len() != 32 {
                    return Err(CodecError::bad("digest component is not 32 bytes"));
                }
                let mut digest = [0u8; 32];
                digest.copy_from_slice(value);
                Ok(Component::Digest(digest))
            }
            other => Err(CodecError::bad(format!("unknown component type {other}"))),
        }
    }
}

fn percent_decode(segment: &str) -> Result<String, CodecError> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(CodecError::bad("truncated percent escape"));
            }
            let hi = (bytes[i + 1] as char)
                .to_digit(16)
                .ok_or_else(|| CodecError::bad("bad percent escape"))?;
            let lo = (bytes[i + 2] as char)
                .to_digit(16)
                .ok_or_else(|| CodecError::bad("bad percent escape"))?;
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| CodecError::bad("percent-decoded segment is not UTF-8"))
}

//─────────────────────────────
//  Names
//─────────────────────────────

/// A hierarchical name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    /// The empty (root) name, `/`.
    pub fn root() -> Self {
        Name::default()
    }

    /// Build a name from components.
    pub fn from_components(components: Vec<Component>) -> Self {
        Name { components }
    }

    /// Parse a URI-form name such as `/ndn/site/logger-a`.
    pub fn parse(uri: &str) -> Result<Self, CodecError> {
        let mut components = Vec::new();
        for segment in uri.split('/') {
            if segment.is_empty() {
                continue;
            }
            components.push(Component::parse_segment(segment)?);
        }
        Ok(Name { components })
    }

    /// Append a component, consuming the name (builder style).
    pub fn append(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    /// Append a component in place.
    pub fn push(&mut self, component: Component) {
        self.components.push(component);
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether this is the root name.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Component at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Component> {
        self.components.get(index)
    }

    /// The final component, if any.
    pub fn last(&self) -> Option<&Component> {
        self.components.last()
    }

    /// All components.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// The name formed by the first `n` components.
    pub fn prefix(&self, n: usize) -> Name {
        Name {
            components: self.components[..n.min(self.components.len())].to_vec(),
        }
    }

    /// Whether `self` is a component-wise prefix of `other`.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        other.components.len() >= self.components.len()
            && other.components[..self.components.len()] == self.components[..]
    }

    /// The canonical URI form, always beginning with `/`.
    pub fn to_uri(&self) -> String {
        if self.components.is_empty() {
            return "/".to_owned();
        }
        let mut out = String::new();
        for c in &self.components {
            out.push('/');
            c.write_uri(&mut out);
        }
        out
    }

    /// Encode as a name TLV into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut inner = BytesMut::new();
        for c in &self.components {
            c.encode(&mut inner);
        }
        tlv::write_tlv(buf, tag::NAME, &inner);
    }

    /// Encode as a standalone name TLV.
    pub fn encoded(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode the value of a name TLV (the component sequence).
    pub fn decode_value(mut value: &[u8]) -> Result<Self, CodecError> {
        let mut components = Vec::new();
        while !value.is_empty() {
            let (typ, v) = tlv::read_tlv(&mut value)?;
            components.push(Component::decode(typ, v)?);
        }
        Ok(Name { components })
    }

    /// Read a full name TLV from the front of `buf`.
    pub fn read_from(buf: &mut &[u8]) -> Result<Self, CodecError> {
        let value = tlv::expect_tlv(buf, tag::NAME)?;
        Name::decode_value(value)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl FromStr for Name {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::parse(s)
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_uri())
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Name::parse(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let name = Name::parse("/ndn/site/logger-a").unwrap();
        assert_eq!(name.len(), 3);
        assert_eq!(name.to_uri(), "/ndn/site/logger-a");
        assert_eq!(Name::parse("/").unwrap(), Name::root());
        assert_eq!(Name::root().to_uri(), "/");
    }

    #[test]
    fn segment_classification() {
        let name = Name::parse("/a/RECORD/17").unwrap();
        assert_eq!(name.get(2).unwrap().as_number(), Some(17));

        let digest = hex::encode([0xabu8; 32]);
        let full = Name::parse(&format!("/a/RECORD/17/{digest}")).unwrap();
        assert!(full.last().unwrap().is_digest());
    }

    #[test]
    fn uri_round_trip_with_escapes() {
        let name = Name::root()
            .append(Component::generic("with space"))
            .append(Component::number(9))
            .append(Component::digest([7u8; 32]));
        let parsed = Name::parse(&name.to_uri()).unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn tlv_round_trip() {
        let name = Name::parse("/a/RECORD/3").unwrap().append(Component::digest([1u8; 32]));
        let encoded = name.encoded();
        let mut slice = &encoded[..];
        let decoded = Name::read_from(&mut slice).unwrap();
        assert_eq!(decoded, name);
        assert!(slice.is_empty());
    }

    #[test]
    fn prefix_relations() {
        let a = Name::parse("/a").unwrap();
        let ab = Name::parse("/a/b").unwrap();
        let ax = Name::parse("/ax").unwrap();
        assert!(a.is_prefix_of(&ab));
        assert!(!ab.is_prefix_of(&a));
        assert!(!a.is_prefix_of(&ax));
        assert_eq!(ab.prefix(1), a);
    }

    #[test]
    fn serde_as_uri() {
        let name = Name::parse("/a/RECORD/5").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"/a/RECORD/5\"");
        let back: Name = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
