// DER encoding: a length/tag writer and composable element encoders

use crate::der::tag::Tag;
use crate::der::types;
use crate::error::Result;

/// Anything that can produce one complete DER element.
pub trait DerEncoder {
    fn encode(&self) -> Vec<u8>;
}

/// Append a definite length in the minimal form.
pub fn write_length(out: &mut Vec<u8>, length: usize) {
    if length < 128 {
        // Short form
        out.push(length as u8);
    } else {
        // Long form
        let mut bytes = Vec::new();
        let mut len = length;
        while len > 0 {
            bytes.push((len & 0xFF) as u8);
            len >>= 8;
        }
        bytes.reverse();
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }
}

/// Encode one element: identifier, minimal length, content.
pub fn encode_tlv(tag: Tag, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    tag.encode_into(&mut out);
    write_length(&mut out, content.len());
    out.extend_from_slice(content);
    out
}

pub struct IntegerEncoder {
    tag: Tag,
    value: i64,
}

impl IntegerEncoder {
    pub fn new(value: i64) -> Self {
        Self {
            tag: Tag::INTEGER,
            value,
        }
    }

    /// INTEGER content under an implicit tag, e.g. `[APPLICATION 16]` for AbandonRequest.
    pub fn with_tag(tag: Tag, value: i64) -> Self {
        Self { tag, value }
    }
}

impl DerEncoder for IntegerEncoder {
    fn encode(&self) -> Vec<u8> {
        encode_tlv(self.tag, &types::encode_integer(self.value))
    }
}

pub struct EnumeratedEncoder(pub i64);

impl DerEncoder for EnumeratedEncoder {
    fn encode(&self) -> Vec<u8> {
        encode_tlv(Tag::ENUMERATED, &types::encode_integer(self.0))
    }
}

pub struct BooleanEncoder(pub bool);

impl DerEncoder for BooleanEncoder {
    fn encode(&self) -> Vec<u8> {
        encode_tlv(Tag::BOOLEAN, &types::encode_boolean(self.0))
    }
}

pub struct NullEncoder;

impl DerEncoder for NullEncoder {
    fn encode(&self) -> Vec<u8> {
        encode_tlv(Tag::NULL, &[])
    }
}

pub struct OctetStringEncoder(Vec<u8>);

impl OctetStringEncoder {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self(value.into())
    }
}

impl From<&str> for OctetStringEncoder {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for OctetStringEncoder {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl DerEncoder for OctetStringEncoder {
    fn encode(&self) -> Vec<u8> {
        encode_tlv(Tag::OCTET_STRING, &self.0)
    }
}

/// OBJECT IDENTIFIER; the dotted string is validated when the encoder is built.
pub struct OidEncoder(Vec<u8>);

impl OidEncoder {
    pub fn new(oid: &str) -> Result<Self> {
        Ok(Self(types::encode_oid(oid)?))
    }
}

impl DerEncoder for OidEncoder {
    fn encode(&self) -> Vec<u8> {
        encode_tlv(Tag::OID, &self.0)
    }
}

/// Primitive element with caller-supplied tag and content, typically `[n] IMPLICIT OCTET STRING`.
pub struct TaggedEncoder {
    tag: Tag,
    content: Vec<u8>,
}

impl TaggedEncoder {
    pub fn new(tag: Tag, content: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            content: content.into(),
        }
    }

    pub fn context(number: u32, content: impl Into<Vec<u8>>) -> Self {
        Self::new(Tag::context(number, false), content)
    }
}

impl DerEncoder for TaggedEncoder {
    fn encode(&self) -> Vec<u8> {
        encode_tlv(self.tag, &self.content)
    }
}

/// Already-encoded element bytes, passed through untouched.
pub struct RawEncoder(pub Vec<u8>);

impl DerEncoder for RawEncoder {
    fn encode(&self) -> Vec<u8> {
        self.0.clone()
    }
}

/// Constructed element whose content is the concatenation of its children.
pub struct ConstructedEncoder {
    tag: Tag,
    children: Vec<Box<dyn DerEncoder>>,
}

impl ConstructedEncoder {
    pub fn new(tag: Tag, children: Vec<Box<dyn DerEncoder>>) -> Self {
        Self {
            tag: tag.with_constructed(true),
            children,
        }
    }

    pub fn sequence(children: Vec<Box<dyn DerEncoder>>) -> Self {
        Self::new(Tag::SEQUENCE, children)
    }

    pub fn push(&mut self, child: impl DerEncoder + 'static) {
        self.children.push(Box::new(child));
    }

    pub fn push_boxed(&mut self, child: Box<dyn DerEncoder>) {
        self.children.push(child);
    }
}

impl DerEncoder for ConstructedEncoder {
    fn encode(&self) -> Vec<u8> {
        let mut content = Vec::new();
        for child in &self.children {
            content.extend(child.encode());
        }
        encode_tlv(self.tag, &content)
    }
}
