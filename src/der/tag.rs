use crate::error::{Error, Result};
use std::fmt;

/// Identifier class (bits 8-7 of the identifier octet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagClass {
    Universal,
    Application,
    Context,
    Private,
}

impl TagClass {
    fn bits(self) -> u8 {
        match self {
            TagClass::Universal => 0x00,
            TagClass::Application => 0x40,
            TagClass::Context => 0x80,
            TagClass::Private => 0xC0,
        }
    }

    fn from_bits(octet: u8) -> Self {
        match octet & 0xC0 {
            0x00 => TagClass::Universal,
            0x40 => TagClass::Application,
            0x80 => TagClass::Context,
            _ => TagClass::Private,
        }
    }
}

/// Universal types known to the path language, with their path keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniversalType {
    Boolean,
    Integer,
    BitString,
    OctetString,
    Null,
    Oid,
    ObjectDescriptor,
    External,
    Real,
    Enumerated,
    EmbeddedPdv,
    Utf8String,
    RelativeOid,
    Sequence,
    Set,
    NumericString,
    PrintableString,
    T61String,
    VideotexString,
    Ia5String,
    UtcTime,
    GeneralizedTime,
    GraphicString,
    VisibleString,
    GeneralString,
    UniversalString,
    CharacterString,
    BmpString,
}

const UNIVERSAL_TYPES: [(UniversalType, u32, &str); 28] = [
    (UniversalType::Boolean, 1, "BOOL"),
    (UniversalType::Integer, 2, "INT"),
    (UniversalType::BitString, 3, "BITSTR"),
    (UniversalType::OctetString, 4, "OCTSTR"),
    (UniversalType::Null, 5, "NULL"),
    (UniversalType::Oid, 6, "OID"),
    (UniversalType::ObjectDescriptor, 7, "OBJDESC"),
    (UniversalType::External, 8, "EXTERNAL"),
    (UniversalType::Real, 9, "REAL"),
    (UniversalType::Enumerated, 10, "ENUM"),
    (UniversalType::EmbeddedPdv, 11, "EMBEDDED"),
    (UniversalType::Utf8String, 12, "UTF8STR"),
    (UniversalType::RelativeOid, 13, "RELOID"),
    (UniversalType::Sequence, 16, "SEQ"),
    (UniversalType::Set, 17, "SET"),
    (UniversalType::NumericString, 18, "NUMSTR"),
    (UniversalType::PrintableString, 19, "PRNSTR"),
    (UniversalType::T61String, 20, "T61STR"),
    (UniversalType::VideotexString, 21, "VIDSTR"),
    (UniversalType::Ia5String, 22, "IA5STR"),
    (UniversalType::UtcTime, 23, "UTCTIME"),
    (UniversalType::GeneralizedTime, 24, "GENTIME"),
    (UniversalType::GraphicString, 25, "GRASTR"),
    (UniversalType::VisibleString, 26, "VISSTR"),
    (UniversalType::GeneralString, 27, "GENSTR"),
    (UniversalType::UniversalString, 28, "UNISTR"),
    (UniversalType::CharacterString, 29, "CHARSTR"),
    (UniversalType::BmpString, 30, "BMPSTR"),
];

impl UniversalType {
    pub fn from_number(number: u32) -> Option<Self> {
        UNIVERSAL_TYPES
            .iter()
            .find(|(_, n, _)| *n == number)
            .map(|(t, _, _)| *t)
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        UNIVERSAL_TYPES
            .iter()
            .find(|(_, _, k)| *k == keyword)
            .map(|(t, _, _)| *t)
    }

    pub fn number(self) -> u32 {
        UNIVERSAL_TYPES
            .iter()
            .find(|(t, _, _)| *t == self)
            .map(|(_, n, _)| *n)
            .unwrap_or(0)
    }

    pub fn keyword(self) -> &'static str {
        UNIVERSAL_TYPES
            .iter()
            .find(|(t, _, _)| *t == self)
            .map(|(_, _, k)| *k)
            .unwrap_or("?")
    }

    /// SEQUENCE and SET are always constructed in DER; everything else defaults to primitive.
    pub fn is_constructed(self) -> bool {
        matches!(self, UniversalType::Sequence | UniversalType::Set)
    }
}

/// A BER identifier: class, primitive/constructed flag and tag number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    class: TagClass,
    constructed: bool,
    number: u32,
}

impl Tag {
    pub const BOOLEAN: Tag = Tag::universal(1, false);
    pub const INTEGER: Tag = Tag::universal(2, false);
    pub const OCTET_STRING: Tag = Tag::universal(4, false);
    pub const NULL: Tag = Tag::universal(5, false);
    pub const OID: Tag = Tag::universal(6, false);
    pub const ENUMERATED: Tag = Tag::universal(10, false);
    pub const UTF8_STRING: Tag = Tag::universal(12, false);
    pub const SEQUENCE: Tag = Tag::universal(16, true);
    pub const SET: Tag = Tag::universal(17, true);
    pub const PRINTABLE_STRING: Tag = Tag::universal(19, false);

    pub const fn new(class: TagClass, constructed: bool, number: u32) -> Self {
        Self {
            class,
            constructed,
            number,
        }
    }

    pub const fn universal(number: u32, constructed: bool) -> Self {
        Self::new(TagClass::Universal, constructed, number)
    }

    pub const fn application(number: u32, constructed: bool) -> Self {
        Self::new(TagClass::Application, constructed, number)
    }

    pub const fn context(number: u32, constructed: bool) -> Self {
        Self::new(TagClass::Context, constructed, number)
    }

    pub fn class(&self) -> TagClass {
        self.class
    }

    pub fn is_constructed(&self) -> bool {
        self.constructed
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Same tag with the constructed bit forced on or off.
    pub fn with_constructed(self, constructed: bool) -> Self {
        Self {
            constructed,
            ..self
        }
    }

    /// The universal type for this tag, if it is universal and known.
    pub fn universal_type(&self) -> Option<UniversalType> {
        if self.class == TagClass::Universal {
            UniversalType::from_number(self.number)
        } else {
            None
        }
    }

    /// Append identifier octets (low- or high-tag-number form).
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut first = self.class.bits();
        if self.constructed {
            first |= 0x20;
        }
        if self.number < 31 {
            out.push(first | self.number as u8);
            return;
        }
        out.push(first | 0x1F);
        let mut groups = Vec::new();
        let mut n = self.number;
        loop {
            groups.push((n & 0x7F) as u8);
            n >>= 7;
            if n == 0 {
                break;
            }
        }
        for (i, g) in groups.iter().rev().enumerate() {
            if i + 1 < groups.len() {
                out.push(g | 0x80);
            } else {
                out.push(*g);
            }
        }
    }

    /// Parse identifier octets from the front of `bytes`, returning the tag and octets consumed.
    pub(crate) fn decode_from(bytes: &[u8]) -> Result<(Tag, usize)> {
        let first = *bytes
            .first()
            .ok_or_else(|| Error::decode("truncated tag"))?;
        let class = TagClass::from_bits(first);
        let constructed = first & 0x20 != 0;
        if first & 0x1F != 0x1F {
            return Ok((Tag::new(class, constructed, (first & 0x1F) as u32), 1));
        }
        let mut number: u32 = 0;
        for (i, &b) in bytes[1..].iter().enumerate() {
            if i >= 4 {
                return Err(Error::decode("tag number too large"));
            }
            number = (number << 7) | (b & 0x7F) as u32;
            if b & 0x80 == 0 {
                return Ok((Tag::new(class, constructed, number), i + 2));
            }
        }
        Err(Error::decode("truncated high tag number"))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            TagClass::Universal => match self.universal_type() {
                Some(t) => write!(f, "{}", t.keyword()),
                None => write!(f, "UNIVERSAL({})", self.number),
            },
            TagClass::Application => write!(f, "APP({})", self.number),
            TagClass::Context => write!(f, "CTX({})", self.number),
            TagClass::Private => write!(f, "PRIVATE({})", self.number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_tag_number_round_trip() {
        let mut out = Vec::new();
        Tag::SEQUENCE.encode_into(&mut out);
        Tag::application(4, true).encode_into(&mut out);
        Tag::context(0, false).encode_into(&mut out);
        assert_eq!(out, vec![0x30, 0x64, 0x80]);
        assert_eq!(Tag::decode_from(&[0x64]).unwrap(), (Tag::application(4, true), 1));
        assert_eq!(Tag::decode_from(&[0xB9]).unwrap(), (Tag::context(25, true), 1));
    }

    #[test]
    fn test_high_tag_number_round_trip() {
        let tag = Tag::context(200, false);
        let mut out = Vec::new();
        tag.encode_into(&mut out);
        assert_eq!(out, vec![0x9F, 0x81, 0x48]);
        assert_eq!(Tag::decode_from(&out).unwrap(), (tag, 3));
    }

    #[test]
    fn test_truncated_tag() {
        assert!(Tag::decode_from(&[]).is_err());
        assert!(Tag::decode_from(&[0x9F, 0x81]).is_err());
    }

    #[test]
    fn test_universal_keywords() {
        assert_eq!(UniversalType::from_keyword("OCTSTR"), Some(UniversalType::OctetString));
        assert_eq!(UniversalType::Sequence.number(), 16);
        assert_eq!(UniversalType::from_number(14), None);
        assert_eq!(Tag::INTEGER.to_string(), "INT");
        assert_eq!(Tag::application(3, true).to_string(), "APP(3)");
    }
}
