//! Minimal self-describing type-length-value framing.
//!
//! Types and lengths are encoded as variable-size integers (one byte below
//! 253, then 2/4/8-byte wide forms introduced by 253/254/255). Values are
//! opaque byte strings interpreted by the caller. The assigned tag space is
//! listed in [`tag`].

use bytes::{Buf, BufMut, BytesMut};

use crate::error::CodecError;

/// Assigned TLV tags.
pub mod tag {
    /// A hierarchical name.
    pub const NAME: u64 = 7;
    /// Opaque name component.
    pub const GENERIC_COMPONENT: u64 = 8;
    /// Content-digest name component (32 bytes).
    pub const DIGEST_COMPONENT: u64 = 1;
    /// Non-negative integer name component.
    pub const NUMBER_COMPONENT: u64 = 33;

    /// A signed data unit.
    pub const DATA: u64 = 6;
    /// Data unit meta information container.
    pub const META_INFO: u64 = 20;
    /// Data unit payload.
    pub const CONTENT: u64 = 21;
    /// Signature information container.
    pub const SIGNATURE_INFO: u64 = 22;
    /// Signature bytes.
    pub const SIGNATURE_VALUE: u64 = 23;
    /// Content type discriminator inside meta information.
    pub const CONTENT_TYPE: u64 = 24;
    /// Freshness period (milliseconds) inside meta information.
    pub const FRESHNESS_PERIOD: u64 = 25;
    /// Signature scheme discriminator.
    pub const SIGNATURE_TYPE: u64 = 27;

    /// Record header container (preceding pointers).
    pub const RECORD_HEADER: u64 = 129;
    /// Record body container (embedded event).
    pub const RECORD_BODY: u64 = 130;

    /// One producer entry of a version vector.
    pub const VERSION_ENTRY: u64 = 201;
    /// Sequence number inside a version entry.
    pub const VERSION_SEQ: u64 = 202;
}

/// Write a variable-size integer.
pub fn write_varint(buf: &mut BytesMut, v: u64) {
    if v < 253 {
        buf.put_u8(v as u8);
    } else if v <= u16::MAX as u64 {
        buf.put_u8(253);
        buf.put_u16(v as u16);
    } else if v <= u32::MAX as u64 {
        buf.put_u8(254);
        buf.put_u32(v as u32);
    } else {
        buf.put_u8(255);
        buf.put_u64(v);
    }
}

/// Read a variable-size integer, advancing the slice.
pub fn read_varint(buf: &mut &[u8]) -> Result<u64, CodecError> {
    if buf.is_empty() {
        return Err(CodecError::bad("truncated varint"));
    }
    let first = buf.get_u8();
    let wide = |buf: &mut &[u8], n: usize| -> Result<(), CodecError> {
        if buf.remaining() < n {
            Err(CodecError::bad("truncated varint"))
        } else {
            Ok(())
        }
    };
    match first {
        0..=252 => Ok(first as u64),
        253 => {
            wide(buf, 2)?;
            Ok(buf.get_u16() as u64)
        }
        254 => {
            wide(buf, 4)?;
            Ok(buf.get_u32() as u64)
        }
        255 => {
            wide(buf, 8)?;
            Ok(buf.get_u64())
        }
    }
}

/// Append one TLV element.
pub fn write_tlv(buf: &mut BytesMut, typ: u64, value: &[u8]) {
    write_varint(buf, typ);
    write_varint(buf, value.len() as u64);
    buf.put_slice(value);
}

/// Read one TLV element, advancing the slice past it.
pub fn read_tlv<'a>(buf: &mut &'a [u8]) -> Result<(u64, &'a [u8]), CodecError> {
    let typ = read_varint(buf)?;
    let len = read_varint(buf)? as usize;
    if buf.len() < len {
        return Err(CodecError::bad(format!(
            "TLV type {typ} declares {len} bytes, {} available",
            buf.len()
        )));
    }
    let (value, rest) = buf.split_at(len);
    *buf = rest;
    Ok((typ, value))
}

/// Read one TLV element and require the given type.
pub fn expect_tlv<'a>(buf: &mut &'a [u8], typ: u64) -> Result<&'a [u8], CodecError> {
    let (found, value) = read_tlv(buf)?;
    if found != typ {
        return Err(CodecError::bad(format!(
            "expected TLV type {typ}, found {found}"
        )));
    }
    Ok(value)
}

/// Write a non-negative integer in its minimal 1/2/4/8-byte big-endian form.
pub fn write_nonneg_int(buf: &mut BytesMut, v: u64) {
    if v <= u8::MAX as u64 {
        buf.put_u8(v as u8);
    } else if v <= u16::MAX as u64 {
        buf.put_u16(v as u16);
    } else if v <= u32::MAX as u64 {
        buf.put_u32(v as u32);
    } else {
        buf.put_u64(v);
    }
}

/// Decode a non-negative integer from its minimal big-endian form.
pub fn read_nonneg_int(mut value: &[u8]) -> Result<u64, CodecError> {
    match value.len() {
        1 => Ok(value.get_u8() as u64),
        2 => Ok(value.get_u16() as u64),
        4 => Ok(value.get_u32() as u64),
        8 => Ok(value.get_u64()),
        n => Err(CodecError::bad(format!("bad integer width {n}"))),
    }
}
