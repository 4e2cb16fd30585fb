//! Content codecs for the scalar universal types.
//!
//! These operate on element content only (no tag or length). Pair them with
//! [`crate::der::encode::encode_tlv`] or a [`crate::der::Buffer`] to move whole elements.

use crate::error::{Error, Result};
use uuid::Uuid;

/// Minimal two's-complement encoding of a signed integer.
pub fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Drop a leading 0x00/0xFF only when the next byte carries the same sign.
    while start < bytes.len() - 1 {
        let next_negative = bytes[start + 1] & 0x80 != 0;
        match bytes[start] {
            0x00 if !next_negative => start += 1,
            0xFF if next_negative => start += 1,
            _ => break,
        }
    }
    bytes[start..].to_vec()
}

/// Decode two's-complement content, sign-extending to 64 bits.
pub fn decode_integer(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Err(Error::decode("empty INTEGER"));
    }
    if bytes.len() > 8 {
        return Err(Error::decode(format!("INTEGER of {} bytes overflows i64", bytes.len())));
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in bytes {
        value = (value << 8) | b as i64;
    }
    Ok(value)
}

/// Minimal encoding of an unsigned value; a 0x00 is prepended when the high bit is set.
pub fn encode_unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    let mut out = Vec::with_capacity(9);
    if bytes[start] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[start..]);
    out
}

/// Reinterpret INTEGER content as an unsigned magnitude, without sign extension.
pub fn decode_unsigned(bytes: &[u8]) -> Result<u64> {
    if bytes.is_empty() {
        return Err(Error::decode("empty INTEGER"));
    }
    let significant = match bytes.iter().position(|&b| b != 0) {
        Some(i) => &bytes[i..],
        None => return Ok(0),
    };
    if significant.len() > 8 {
        return Err(Error::decode(format!("unsigned INTEGER of {} bytes overflows u64", bytes.len())));
    }
    Ok(significant.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

/// Fixed-width unsigned decode of at most four content bytes.
pub fn decode_unsigned_primitive(bytes: &[u8]) -> Result<u32> {
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(Error::decode(format!(
            "expected 1-4 bytes for unsigned primitive, got {}",
            bytes.len()
        )));
    }
    Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

pub fn encode_boolean(value: bool) -> Vec<u8> {
    vec![if value { 0xFF } else { 0x00 }]
}

/// Any non-zero single octet is true.
pub fn decode_boolean(bytes: &[u8]) -> Result<bool> {
    match bytes {
        [b] => Ok(*b != 0),
        _ => Err(Error::decode(format!("BOOLEAN must be 1 byte, got {}", bytes.len()))),
    }
}

fn parse_oid_arcs(oid: &str) -> Result<Vec<u64>> {
    let mut arcs = Vec::new();
    for arc in oid.split('.') {
        if arc.is_empty() || !arc.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Format(format!("invalid OID '{}'", oid)));
        }
        let n: u64 = arc
            .parse()
            .map_err(|_| Error::Format(format!("OID arc out of range in '{}'", oid)))?;
        arcs.push(n);
    }
    if arcs.len() < 2 {
        return Err(Error::Format(format!("OID '{}' needs at least two arcs", oid)));
    }
    if arcs[0] > 2 {
        return Err(Error::Format(format!("OID '{}' first arc must be 0, 1 or 2", oid)));
    }
    if arcs[0] < 2 && arcs[1] > 39 {
        return Err(Error::Format(format!("OID '{}' second arc must be below 40", oid)));
    }
    Ok(arcs)
}

fn write_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        groups.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    groups.reverse();
    out.extend_from_slice(&groups);
}

/// Validate a dotted OID string without encoding it.
pub fn validate_oid(oid: &str) -> Result<()> {
    parse_oid_arcs(oid).map(|_| ())
}

pub fn encode_oid(oid: &str) -> Result<Vec<u8>> {
    let arcs = parse_oid_arcs(oid)?;
    let first = (arcs[0] * 40)
        .checked_add(arcs[1])
        .ok_or_else(|| Error::Format(format!("OID arc out of range in '{}'", oid)))?;
    let mut out = Vec::new();
    write_base128(&mut out, first);
    for &arc in &arcs[2..] {
        write_base128(&mut out, arc);
    }
    Ok(out)
}

pub fn decode_oid(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() {
        return Err(Error::decode("empty OID"));
    }
    let mut values = Vec::new();
    let mut current: u64 = 0;
    let mut pending = false;
    for &b in bytes {
        if current > (u64::MAX >> 7) {
            return Err(Error::decode("OID arc overflows u64"));
        }
        current = (current << 7) | (b & 0x7F) as u64;
        pending = b & 0x80 != 0;
        if !pending {
            values.push(current);
            current = 0;
        }
    }
    if pending {
        return Err(Error::decode("truncated OID arc"));
    }
    let (x, y) = match values[0] {
        v if v < 40 => (0, v),
        v if v < 80 => (1, v - 40),
        v => (2, v - 80),
    };
    let mut oid = format!("{}.{}", x, y);
    for v in &values[1..] {
        oid.push('.');
        oid.push_str(&v.to_string());
    }
    Ok(oid)
}

pub fn encode_uuid(uuid: &Uuid) -> Vec<u8> {
    uuid.as_bytes().to_vec()
}

pub fn decode_uuid(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| Error::decode(format!("invalid UUID: {}", e)))
}

/// UTF-8 view of string content.
pub fn decode_string(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::decode(format!("invalid UTF-8: {}", e)))
}
