// Simple paged results control (RFC 2696)

use crate::controls::{RequestControl, ResponseControl};
use crate::der::encode::{ConstructedEncoder, DerEncoder, IntegerEncoder, OctetStringEncoder};
use crate::der::parser::DerParser;
use crate::der::types;
use crate::error::{Error, Result};

pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// `realSearchControlValue ::= SEQUENCE { size INTEGER, cookie OCTET STRING }`.
///
/// The same shape is used in both directions: on a request `size` is the page
/// size, on a response it is the server's estimate of the total result count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagedResultsControl {
    pub size: i32,
    pub cookie: Vec<u8>,
    pub critical: bool,
}

impl PagedResultsControl {
    pub fn new(size: i32, cookie: Vec<u8>) -> Self {
        Self {
            size,
            cookie,
            critical: false,
        }
    }

    /// An empty cookie on a response means the last page has been delivered.
    pub fn has_more(&self) -> bool {
        !self.cookie.is_empty()
    }
}

impl RequestControl for PagedResultsControl {
    const OID: &'static str = PAGED_RESULTS_OID;

    fn critical(&self) -> bool {
        self.critical
    }

    fn encode_value(&self) -> Option<Vec<u8>> {
        Some(
            ConstructedEncoder::sequence(vec![
                Box::new(IntegerEncoder::new(self.size as i64)),
                Box::new(OctetStringEncoder::new(self.cookie.clone())),
            ])
            .encode(),
        )
    }
}

impl ResponseControl for PagedResultsControl {
    const OID: &'static str = PAGED_RESULTS_OID;

    fn decode_value(value: &[u8]) -> Result<Self> {
        let parser = DerParser::<(Option<i32>, Option<Vec<u8>>)>::new()
            .on("/SEQ/INT", |fields, buf| {
                fields.0 = Some(types::decode_integer(buf.read_remaining())? as i32);
                Ok(())
            })?
            .on("/SEQ/OCTSTR", |fields, buf| {
                fields.1 = Some(buf.read_remaining().to_vec());
                Ok(())
            })?;
        let mut fields = (None, None);
        parser.parse(&mut fields, value)?;
        match fields {
            (Some(size), Some(cookie)) => Ok(PagedResultsControl::new(size, cookie)),
            _ => Err(Error::decode("paged results value needs a size and a cookie")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_value() {
        let value = PagedResultsControl::new(100, Vec::new()).encode_value().unwrap();
        assert_eq!(value, vec![0x30, 0x05, 0x02, 0x01, 0x64, 0x04, 0x00]);
    }

    #[test]
    fn test_incomplete_value_rejected() {
        for value in [&[][..], &[0x30, 0x00], &[0x30, 0x03, 0x02, 0x01, 0x05], &[0x31, 0x02, 0x04, 0x00]] {
            assert!(matches!(PagedResultsControl::decode_value(value), Err(Error::Decode(_))));
        }
    }

    #[test]
    fn test_response_decode() {
        let value = [0x30, 0x08, 0x02, 0x02, 0x01, 0x00, 0x04, 0x02, 0xAB, 0xCD];
        let control = PagedResultsControl::decode_value(&value).unwrap();
        assert_eq!(control.size, 256);
        assert_eq!(control.cookie, vec![0xAB, 0xCD]);
        assert!(control.has_more());
    }

    #[test]
    fn test_find_in_controls() {
        let ctrl = PagedResultsControl::new(0, Vec::new()).to_control();
        assert_eq!(ctrl.oid, PAGED_RESULTS_OID);
        let found = PagedResultsControl::find(&[ctrl]).unwrap().unwrap();
        assert!(!found.has_more());
        assert!(PagedResultsControl::find(&[]).unwrap().is_none());
    }

    #[test]
    fn test_truncated_value_fails() {
        assert!(PagedResultsControl::decode_value(&[0x30, 0x05, 0x02, 0x01]).is_err());
    }
}
