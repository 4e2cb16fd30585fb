// Persistent search and entry change notification controls (draft-ietf-ldapext-psearch)

use crate::controls::{RequestControl, ResponseControl};
use crate::der::encode::{BooleanEncoder, ConstructedEncoder, DerEncoder, EnumeratedEncoder, IntegerEncoder, OctetStringEncoder};
use crate::der::parser::DerParser;
use crate::der::types;
use crate::error::{Error, Result};

pub const PERSISTENT_SEARCH_OID: &str = "2.16.840.1.113730.3.4.3";
pub const ENTRY_CHANGE_NOTIFICATION_OID: &str = "2.16.840.1.113730.3.4.7";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Add = 1,
    Delete = 2,
    Modify = 4,
    ModDn = 8,
}

impl ChangeType {
    pub const ALL: [ChangeType; 4] = [ChangeType::Add, ChangeType::Delete, ChangeType::Modify, ChangeType::ModDn];

    pub fn from_value(value: i64) -> Result<Self> {
        ChangeType::ALL
            .into_iter()
            .find(|t| *t as i64 == value)
            .ok_or_else(|| Error::decode(format!("unknown change type {}", value)))
    }

    /// Bitwise OR of the given types, as carried by the request control.
    pub fn mask(types: &[ChangeType]) -> i64 {
        types.iter().fold(0, |acc, t| acc | *t as i64)
    }
}

/// `PersistentSearch ::= SEQUENCE { changeTypes INTEGER, changesOnly BOOLEAN, returnECs BOOLEAN }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentSearchControl {
    pub change_types: Vec<ChangeType>,
    pub changes_only: bool,
    pub return_ecs: bool,
    pub critical: bool,
}

impl PersistentSearchControl {
    pub fn new(change_types: Vec<ChangeType>, changes_only: bool, return_ecs: bool) -> Self {
        Self {
            change_types,
            changes_only,
            return_ecs,
            critical: true,
        }
    }
}

impl RequestControl for PersistentSearchControl {
    const OID: &'static str = PERSISTENT_SEARCH_OID;

    fn critical(&self) -> bool {
        self.critical
    }

    fn encode_value(&self) -> Option<Vec<u8>> {
        Some(
            ConstructedEncoder::sequence(vec![
                Box::new(IntegerEncoder::new(ChangeType::mask(&self.change_types))),
                Box::new(BooleanEncoder(self.changes_only)),
                Box::new(BooleanEncoder(self.return_ecs)),
            ])
            .encode(),
        )
    }
}

/// Attached by the server to each entry a persistent search returns when `returnECs` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryChangeNotificationControl {
    pub change_type: ChangeType,
    /// Only present for `ModDn`.
    pub previous_dn: Option<String>,
    pub change_number: Option<i64>,
}

impl EntryChangeNotificationControl {
    pub fn encode_value(&self) -> Vec<u8> {
        let mut seq = ConstructedEncoder::sequence(vec![Box::new(EnumeratedEncoder(self.change_type as i64))]);
        if let Some(ref dn) = self.previous_dn {
            seq.push(OctetStringEncoder::from(dn.as_str()));
        }
        if let Some(number) = self.change_number {
            seq.push(IntegerEncoder::new(number));
        }
        seq.encode()
    }
}

#[derive(Default)]
struct EcnState {
    change_type: Option<ChangeType>,
    previous_dn: Option<String>,
    change_number: Option<i64>,
}

impl ResponseControl for EntryChangeNotificationControl {
    const OID: &'static str = ENTRY_CHANGE_NOTIFICATION_OID;

    fn decode_value(value: &[u8]) -> Result<Self> {
        let parser = DerParser::<EcnState>::new()
            .on("/SEQ/ENUM", |s, buf| {
                s.change_type = Some(ChangeType::from_value(types::decode_integer(buf.read_remaining())?)?);
                Ok(())
            })?
            .on("/SEQ/OCTSTR", |s, buf| {
                s.previous_dn = Some(types::decode_string(buf.read_remaining())?);
                Ok(())
            })?
            .on("/SEQ/INT", |s, buf| {
                s.change_number = Some(types::decode_integer(buf.read_remaining())?);
                Ok(())
            })?;
        let mut state = EcnState::default();
        parser.parse(&mut state, value)?;
        Ok(Self {
            change_type: state
                .change_type
                .ok_or_else(|| Error::decode("entry change notification without changeType"))?,
            previous_dn: state.previous_dn,
            change_number: state.change_number,
        })
    }
}
