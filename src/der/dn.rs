//! X.501 `Name` as it appears in certificates and some control values:
//! `SEQUENCE OF SET OF SEQUENCE { type OID, value ANY }`.

use crate::der::buffer::Buffer;
use crate::der::encode::{encode_tlv, ConstructedEncoder, DerEncoder, OidEncoder, RawEncoder};
use crate::der::parser::DerParser;
use crate::der::tag::Tag;
use crate::der::types;
use crate::error::{Error, Result};
use std::fmt;

const SHORT_NAMES: &[(&str, &str)] = &[
    ("2.5.4.3", "CN"),
    ("2.5.4.6", "C"),
    ("2.5.4.7", "L"),
    ("2.5.4.8", "ST"),
    ("2.5.4.9", "STREET"),
    ("2.5.4.10", "O"),
    ("2.5.4.11", "OU"),
    ("0.9.2342.19200300.100.1.1", "UID"),
    ("0.9.2342.19200300.100.1.25", "DC"),
    ("1.2.840.113549.1.9.1", "emailAddress"),
];

/// One `type=value` pair. The value keeps the string type it was encoded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValueAssertion {
    oid: String,
    tag: Tag,
    value: Vec<u8>,
}

impl AttributeValueAssertion {
    pub fn new(oid: impl Into<String>, tag: Tag, value: impl Into<Vec<u8>>) -> Result<Self> {
        let oid = oid.into();
        types::validate_oid(&oid)?;
        Ok(Self {
            oid,
            tag,
            value: value.into(),
        })
    }

    pub fn utf8(oid: impl Into<String>, value: &str) -> Result<Self> {
        Self::new(oid, Tag::UTF8_STRING, value.as_bytes())
    }

    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    fn decode(buf: &mut Buffer<'_>) -> Result<Self> {
        let oid = types::decode_oid(buf.read_expected(Tag::OID)?)?;
        let (tag, mut value) = buf.read_tlv()?;
        if buf.has_remaining() {
            return Err(Error::decode("trailing data in attribute value assertion"));
        }
        Ok(Self {
            oid,
            tag,
            value: value.read_remaining().to_vec(),
        })
    }

    fn encoder(&self) -> Result<ConstructedEncoder> {
        Ok(ConstructedEncoder::sequence(vec![
            Box::new(OidEncoder::new(&self.oid)?),
            Box::new(RawEncoder(encode_tlv(self.tag, &self.value))),
        ]))
    }
}

impl fmt::Display for AttributeValueAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = SHORT_NAMES
            .iter()
            .find(|(oid, _)| *oid == self.oid)
            .map(|(_, n)| *n)
            .unwrap_or(self.oid.as_str());
        write!(f, "{}=", name)?;
        match std::str::from_utf8(&self.value) {
            Ok(s) => {
                for (i, c) in s.chars().enumerate() {
                    let leading = i == 0 && (c == '#' || c == ' ');
                    if leading || matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
                        write!(f, "\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                Ok(())
            }
            Err(_) => {
                // Non-UTF-8 values print as the hex of the whole element.
                write!(f, "#")?;
                for b in encode_tlv(self.tag, &self.value) {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Relative distinguished name; member order is the order found in the SET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn(Vec<AttributeValueAssertion>);

impl Rdn {
    pub fn new(values: Vec<AttributeValueAssertion>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[AttributeValueAssertion] {
        &self.0
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ava) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "+")?;
            }
            write!(f, "{}", ava)?;
        }
        Ok(())
    }
}

/// Distinguished name in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName(Vec<Rdn>);

impl DistinguishedName {
    pub fn new(rdns: Vec<Rdn>) -> Self {
        Self(rdns)
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.0
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut outer = Buffer::new(bytes);
        outer.read_expected(Tag::SEQUENCE)?;
        if outer.has_remaining() {
            return Err(Error::decode("trailing bytes after Name"));
        }
        let parser = DerParser::<Vec<Rdn>>::new().on("/SEQ/SET", |rdns, buf| {
            let mut values = Vec::new();
            while buf.has_remaining() {
                let mut member = Buffer::new(buf.read_expected(Tag::SEQUENCE)?);
                values.push(AttributeValueAssertion::decode(&mut member)?);
            }
            rdns.push(Rdn(values));
            Ok(())
        })?;
        let mut rdns = Vec::new();
        parser.parse(&mut rdns, bytes)?;
        Ok(Self(rdns))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut name = ConstructedEncoder::sequence(Vec::new());
        for rdn in &self.0 {
            let mut set = ConstructedEncoder::new(Tag::SET, Vec::new());
            for ava in &rdn.0 {
                set.push(ava.encoder()?);
            }
            name.push(set);
        }
        Ok(name.encode())
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}
