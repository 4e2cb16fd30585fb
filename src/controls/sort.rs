// Server side sorting controls (RFC 2891)

use crate::controls::{RequestControl, ResponseControl};
use crate::der::encode::{ConstructedEncoder, DerEncoder, EnumeratedEncoder, OctetStringEncoder, TaggedEncoder};
use crate::der::parser::DerParser;
use crate::der::types;
use crate::error::Result;
use crate::protocol::ResultCode;

pub const SORT_REQUEST_OID: &str = "1.2.840.113556.1.4.473";
pub const SORT_RESPONSE_OID: &str = "1.2.840.113556.1.4.474";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub attribute: String,
    pub ordering_rule: Option<String>,
    pub reverse: bool,
}

impl SortKey {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ordering_rule: None,
            reverse: false,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    fn encoder(&self) -> ConstructedEncoder {
        let mut seq = ConstructedEncoder::sequence(vec![Box::new(OctetStringEncoder::from(self.attribute.as_str()))]);
        if let Some(ref rule) = self.ordering_rule {
            seq.push(TaggedEncoder::context(0, rule.as_bytes()));
        }
        // reverseOrder [1] BOOLEAN DEFAULT FALSE
        if self.reverse {
            seq.push(TaggedEncoder::context(1, types::encode_boolean(true)));
        }
        seq
    }
}

/// `SortKeyList ::= SEQUENCE OF SEQUENCE { attributeType, orderingRule [0] OPTIONAL, reverseOrder [1] }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortRequestControl {
    pub keys: Vec<SortKey>,
    pub critical: bool,
}

impl SortRequestControl {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys, critical: true }
    }
}

impl RequestControl for SortRequestControl {
    const OID: &'static str = SORT_REQUEST_OID;

    fn critical(&self) -> bool {
        self.critical
    }

    fn encode_value(&self) -> Option<Vec<u8>> {
        let mut list = ConstructedEncoder::sequence(Vec::new());
        for key in &self.keys {
            list.push(key.encoder());
        }
        Some(list.encode())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortResponseControl {
    pub result: ResultCode,
    pub attribute: Option<String>,
}

impl Default for SortResponseControl {
    fn default() -> Self {
        Self {
            result: ResultCode::SUCCESS,
            attribute: None,
        }
    }
}

impl SortResponseControl {
    pub fn encode_value(&self) -> Vec<u8> {
        let mut seq = ConstructedEncoder::sequence(vec![Box::new(EnumeratedEncoder(self.result.0 as i64))]);
        if let Some(ref attr) = self.attribute {
            seq.push(TaggedEncoder::context(0, attr.as_bytes()));
        }
        seq.encode()
    }
}

impl ResponseControl for SortResponseControl {
    const OID: &'static str = SORT_RESPONSE_OID;

    fn decode_value(value: &[u8]) -> Result<Self> {
        let parser = DerParser::<SortResponseControl>::new()
            .on("/SEQ/ENUM", |c, buf| {
                c.result = ResultCode(types::decode_unsigned_primitive(buf.read_remaining())?);
                Ok(())
            })?
            .on("/SEQ/CTX(0)", |c, buf| {
                c.attribute = Some(types::decode_string(buf.read_remaining())?);
                Ok(())
            })?;
        let mut control = SortResponseControl::default();
        parser.parse(&mut control, value)?;
        Ok(control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_value() {
        let control = SortRequestControl::new(vec![SortKey::new("cn"), SortKey::new("sn").reversed()]);
        assert_eq!(
            control.encode_value().unwrap(),
            vec![
                0x30, 0x0F, 0x30, 0x04, 0x04, 0x02, b'c', b'n', 0x30, 0x07, 0x04, 0x02, b's', b'n', 0x81, 0x01,
                0xFF
            ]
        );
        assert!(control.to_control().critical);
    }

    #[test]
    fn test_response_decode() {
        let value = [0x30, 0x07, 0x0A, 0x01, 0x10, 0x80, 0x02, b'c', b'n'];
        let control = SortResponseControl::decode_value(&value).unwrap();
        assert_eq!(control.result, ResultCode(16));
        assert_eq!(control.attribute.as_deref(), Some("cn"));
        assert_eq!(control.encode_value(), value.to_vec());
    }
}
