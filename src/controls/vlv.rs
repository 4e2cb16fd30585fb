// Virtual list view controls (draft-ietf-ldapext-ldapv3-vlv)

use crate::controls::{RequestControl, ResponseControl};
use crate::der::encode::{ConstructedEncoder, DerEncoder, EnumeratedEncoder, IntegerEncoder, OctetStringEncoder, TaggedEncoder};
use crate::der::parser::DerParser;
use crate::der::tag::Tag;
use crate::der::types;
use crate::error::Result;
use crate::protocol::ResultCode;

pub const VLV_REQUEST_OID: &str = "2.16.840.1.113730.3.4.9";
pub const VLV_RESPONSE_OID: &str = "2.16.840.1.113730.3.4.10";

/// Where the requested window is anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VlvTarget {
    /// Zero-based offset into the sorted list; sent one-based.
    ByOffset { offset: u32, content_count: i32 },
    /// First entry whose sort key is greater than or equal to the value.
    GreaterOrEqual(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlvRequestControl {
    pub before_count: i32,
    pub after_count: i32,
    pub target: VlvTarget,
    pub context_id: Option<Vec<u8>>,
    pub critical: bool,
}

impl VlvRequestControl {
    pub fn new(before_count: i32, after_count: i32, target: VlvTarget) -> Self {
        Self {
            before_count,
            after_count,
            target,
            context_id: None,
            critical: true,
        }
    }
}

impl RequestControl for VlvRequestControl {
    const OID: &'static str = VLV_REQUEST_OID;

    fn critical(&self) -> bool {
        self.critical
    }

    fn encode_value(&self) -> Option<Vec<u8>> {
        let target: Box<dyn DerEncoder> = match self.target {
            VlvTarget::ByOffset { offset, content_count } => Box::new(ConstructedEncoder::new(
                Tag::context(0, true),
                vec![
                    Box::new(IntegerEncoder::new(offset as i64 + 1)),
                    Box::new(IntegerEncoder::new(content_count as i64)),
                ],
            )),
            VlvTarget::GreaterOrEqual(ref value) => Box::new(TaggedEncoder::context(1, value.clone())),
        };
        let mut seq = ConstructedEncoder::sequence(vec![
            Box::new(IntegerEncoder::new(self.before_count as i64)),
            Box::new(IntegerEncoder::new(self.after_count as i64)),
        ]);
        seq.push_boxed(target);
        if let Some(ref id) = self.context_id {
            seq.push(OctetStringEncoder::new(id.clone()));
        }
        Some(seq.encode())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlvResponseControl {
    /// One-based position of the target entry, as reported by the server.
    pub target_position: i32,
    pub content_count: i32,
    pub result: ResultCode,
    pub context_id: Option<Vec<u8>>,
}

impl Default for VlvResponseControl {
    fn default() -> Self {
        Self {
            target_position: 0,
            content_count: 0,
            result: ResultCode::SUCCESS,
            context_id: None,
        }
    }
}

impl VlvResponseControl {
    pub fn encode_value(&self) -> Vec<u8> {
        let mut seq = ConstructedEncoder::sequence(vec![
            Box::new(IntegerEncoder::new(self.target_position as i64)),
            Box::new(IntegerEncoder::new(self.content_count as i64)),
            Box::new(EnumeratedEncoder(self.result.0 as i64)),
        ]);
        if let Some(ref id) = self.context_id {
            seq.push(OctetStringEncoder::new(id.clone()));
        }
        seq.encode()
    }
}

impl ResponseControl for VlvResponseControl {
    const OID: &'static str = VLV_RESPONSE_OID;

    fn decode_value(value: &[u8]) -> Result<Self> {
        let parser = DerParser::<VlvResponseControl>::new()
            .on("/SEQ/INT[0]", |c, buf| {
                c.target_position = types::decode_integer(buf.read_remaining())? as i32;
                Ok(())
            })?
            .on("/SEQ/INT[1]", |c, buf| {
                c.content_count = types::decode_integer(buf.read_remaining())? as i32;
                Ok(())
            })?
            .on("/SEQ/ENUM", |c, buf| {
                c.result = ResultCode(types::decode_unsigned_primitive(buf.read_remaining())?);
                Ok(())
            })?
            .on("/SEQ/OCTSTR", |c, buf| {
                c.context_id = Some(buf.read_remaining().to_vec());
                Ok(())
            })?;
        let mut control = VlvResponseControl::default();
        parser.parse(&mut control, value)?;
        Ok(control)
    }
}
