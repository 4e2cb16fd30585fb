// Content synchronization controls and the sync info message (RFC 4533)

use crate::controls::{RequestControl, ResponseControl};
use crate::der::encode::{BooleanEncoder, ConstructedEncoder, DerEncoder, EnumeratedEncoder, OctetStringEncoder, TaggedEncoder};
use crate::der::parser::DerParser;
use crate::der::tag::Tag;
use crate::der::types;
use crate::error::{Error, Result};
use uuid::Uuid;

pub const SYNC_REQUEST_OID: &str = "1.3.6.1.4.1.4203.1.9.1.1";
pub const SYNC_STATE_OID: &str = "1.3.6.1.4.1.4203.1.9.1.2";
pub const SYNC_DONE_OID: &str = "1.3.6.1.4.1.4203.1.9.1.3";
pub const SYNC_INFO_OID: &str = "1.3.6.1.4.1.4203.1.9.1.4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    RefreshOnly = 1,
    RefreshAndPersist = 3,
}

/// `syncRequestValue ::= SEQUENCE { mode ENUMERATED, cookie syncCookie OPTIONAL, reloadHint BOOLEAN DEFAULT FALSE }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequestControl {
    pub mode: SyncMode,
    pub cookie: Option<Vec<u8>>,
    pub reload_hint: bool,
    pub critical: bool,
}

impl SyncRequestControl {
    pub fn new(mode: SyncMode, cookie: Option<Vec<u8>>) -> Self {
        Self {
            mode,
            cookie,
            reload_hint: false,
            critical: true,
        }
    }
}

impl RequestControl for SyncRequestControl {
    const OID: &'static str = SYNC_REQUEST_OID;

    fn critical(&self) -> bool {
        self.critical
    }

    fn encode_value(&self) -> Option<Vec<u8>> {
        let mut seq = ConstructedEncoder::sequence(vec![Box::new(EnumeratedEncoder(self.mode as i64))]);
        if let Some(ref cookie) = self.cookie {
            seq.push(OctetStringEncoder::new(cookie.clone()));
        }
        if self.reload_hint {
            seq.push(BooleanEncoder(true));
        }
        Some(seq.encode())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Present = 0,
    Add = 1,
    Modify = 2,
    Delete = 3,
}

impl SyncState {
    fn from_value(value: u32) -> Result<Self> {
        match value {
            0 => Ok(SyncState::Present),
            1 => Ok(SyncState::Add),
            2 => Ok(SyncState::Modify),
            3 => Ok(SyncState::Delete),
            other => Err(Error::decode(format!("unknown sync state {}", other))),
        }
    }
}

/// Attached to every entry returned by a sync search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStateControl {
    pub state: SyncState,
    pub entry_uuid: Uuid,
    pub cookie: Option<Vec<u8>>,
}

impl SyncStateControl {
    pub fn encode_value(&self) -> Vec<u8> {
        let mut seq = ConstructedEncoder::sequence(vec![
            Box::new(EnumeratedEncoder(self.state as i64)),
            Box::new(OctetStringEncoder::new(types::encode_uuid(&self.entry_uuid))),
        ]);
        if let Some(ref cookie) = self.cookie {
            seq.push(OctetStringEncoder::new(cookie.clone()));
        }
        seq.encode()
    }
}

#[derive(Default)]
struct StateFields {
    state: Option<SyncState>,
    uuid: Option<Uuid>,
    cookie: Option<Vec<u8>>,
}

impl ResponseControl for SyncStateControl {
    const OID: &'static str = SYNC_STATE_OID;

    fn decode_value(value: &[u8]) -> Result<Self> {
        let parser = DerParser::<StateFields>::new()
            .on("/SEQ/ENUM", |s, buf| {
                s.state = Some(SyncState::from_value(types::decode_unsigned_primitive(buf.read_remaining())?)?);
                Ok(())
            })?
            .on("/SEQ/OCTSTR[0]", |s, buf| {
                s.uuid = Some(types::decode_uuid(buf.read_remaining())?);
                Ok(())
            })?
            .on("/SEQ/OCTSTR[1]", |s, buf| {
                s.cookie = Some(buf.read_remaining().to_vec());
                Ok(())
            })?;
        let mut fields = StateFields::default();
        parser.parse(&mut fields, value)?;
        match (fields.state, fields.uuid) {
            (Some(state), Some(entry_uuid)) => Ok(Self {
                state,
                entry_uuid,
                cookie: fields.cookie,
            }),
            _ => Err(Error::decode("sync state control needs state and entryUUID")),
        }
    }
}

/// Attached to the SearchResultDone of a sync search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDoneControl {
    pub cookie: Option<Vec<u8>>,
    pub refresh_deletes: bool,
}

impl SyncDoneControl {
    pub fn encode_value(&self) -> Vec<u8> {
        let mut seq = ConstructedEncoder::sequence(Vec::new());
        if let Some(ref cookie) = self.cookie {
            seq.push(OctetStringEncoder::new(cookie.clone()));
        }
        if self.refresh_deletes {
            seq.push(BooleanEncoder(true));
        }
        seq.encode()
    }
}

impl ResponseControl for SyncDoneControl {
    const OID: &'static str = SYNC_DONE_OID;

    fn decode_value(value: &[u8]) -> Result<Self> {
        let parser = DerParser::<SyncDoneControl>::new()
            .on("/SEQ/OCTSTR", |c, buf| {
                c.cookie = Some(buf.read_remaining().to_vec());
                Ok(())
            })?
            .on("/SEQ/BOOL", |c, buf| {
                c.refresh_deletes = types::decode_boolean(buf.read_remaining())?;
                Ok(())
            })?;
        let mut control = SyncDoneControl::default();
        parser.parse(&mut control, value)?;
        Ok(control)
    }
}

/// Value of the sync info intermediate response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncInfo {
    NewCookie(Vec<u8>),
    RefreshDelete {
        cookie: Option<Vec<u8>>,
        done: bool,
    },
    RefreshPresent {
        cookie: Option<Vec<u8>>,
        done: bool,
    },
    SyncIdSet {
        cookie: Option<Vec<u8>>,
        deletes: bool,
        uuids: Vec<Uuid>,
    },
}

// CHOICE alternatives of syncInfoValue
const NEW_COOKIE: u32 = 0;
const REFRESH_DELETE: u32 = 1;
const REFRESH_PRESENT: u32 = 2;
const SYNC_ID_SET: u32 = 3;

#[derive(Default)]
struct InfoFields {
    choice: Option<u32>,
    cookie: Option<Vec<u8>>,
    flag: Option<bool>,
    uuids: Vec<Uuid>,
}

impl InfoFields {
    fn choose(&mut self, choice: u32) -> Result<()> {
        if self.choice.replace(choice).is_some() {
            return Err(Error::decode("sync info value carries more than one alternative"));
        }
        Ok(())
    }
}

impl SyncInfo {
    pub fn cookie(&self) -> Option<&[u8]> {
        match self {
            SyncInfo::NewCookie(cookie) => Some(cookie.as_slice()),
            SyncInfo::RefreshDelete { cookie, .. }
            | SyncInfo::RefreshPresent { cookie, .. }
            | SyncInfo::SyncIdSet { cookie, .. } => cookie.as_deref(),
        }
    }

    pub fn decode(value: &[u8]) -> Result<Self> {
        let mut parser = DerParser::<InfoFields>::new().on("/CTX(0)", |s, buf| {
            s.choose(NEW_COOKIE)?;
            s.cookie = Some(buf.read_remaining().to_vec());
            Ok(())
        })?;
        for choice in [REFRESH_DELETE, REFRESH_PRESENT, SYNC_ID_SET] {
            parser = parser
                .on(&format!("/CTX({})", choice), move |s, _| s.choose(choice))?
                .on(&format!("/CTX({})/OCTSTR", choice), |s, buf| {
                    s.cookie = Some(buf.read_remaining().to_vec());
                    Ok(())
                })?
                .on(&format!("/CTX({})/BOOL", choice), |s, buf| {
                    s.flag = Some(types::decode_boolean(buf.read_remaining())?);
                    Ok(())
                })?;
        }
        parser = parser.on("/CTX(3)/SET/OCTSTR", |s, buf| {
            s.uuids.push(types::decode_uuid(buf.read_remaining())?);
            Ok(())
        })?;

        let mut fields = InfoFields::default();
        parser.parse(&mut fields, value)?;
        let info = match fields.choice {
            Some(NEW_COOKIE) => SyncInfo::NewCookie(fields.cookie.unwrap_or_default()),
            Some(REFRESH_DELETE) => SyncInfo::RefreshDelete {
                cookie: fields.cookie,
                done: fields.flag.unwrap_or(true),
            },
            Some(REFRESH_PRESENT) => SyncInfo::RefreshPresent {
                cookie: fields.cookie,
                done: fields.flag.unwrap_or(true),
            },
            Some(SYNC_ID_SET) => SyncInfo::SyncIdSet {
                cookie: fields.cookie,
                deletes: fields.flag.unwrap_or(false),
                uuids: fields.uuids,
            },
            _ => return Err(Error::decode("empty sync info value")),
        };
        Ok(info)
    }

    pub fn encode(&self) -> Vec<u8> {
        let refresh = |number: u32, cookie: &Option<Vec<u8>>, done: bool| {
            let mut seq = ConstructedEncoder::new(Tag::context(number, true), Vec::new());
            if let Some(cookie) = cookie {
                seq.push(OctetStringEncoder::new(cookie.clone()));
            }
            // refreshDone DEFAULT TRUE
            if !done {
                seq.push(BooleanEncoder(false));
            }
            seq.encode()
        };
        match self {
            SyncInfo::NewCookie(cookie) => TaggedEncoder::context(NEW_COOKIE, cookie.clone()).encode(),
            SyncInfo::RefreshDelete { cookie, done } => refresh(REFRESH_DELETE, cookie, *done),
            SyncInfo::RefreshPresent { cookie, done } => refresh(REFRESH_PRESENT, cookie, *done),
            SyncInfo::SyncIdSet { cookie, deletes, uuids } => {
                let mut seq = ConstructedEncoder::new(Tag::context(SYNC_ID_SET, true), Vec::new());
                if let Some(cookie) = cookie {
                    seq.push(OctetStringEncoder::new(cookie.clone()));
                }
                if *deletes {
                    seq.push(BooleanEncoder(true));
                }
                let mut set = ConstructedEncoder::new(Tag::SET, Vec::new());
                for uuid in uuids {
                    set.push(OctetStringEncoder::new(types::encode_uuid(uuid)));
                }
                seq.push(set);
                seq.encode()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID_A: &str = "0b7c2b4e-1a5e-4d2c-9a4b-3f1e2d3c4b5a";
    const UUID_B: &str = "6f9619ff-8b86-d011-b42d-00c04fc964ff";

    #[test]
    fn test_request_value() {
        let control = SyncRequestControl::new(SyncMode::RefreshOnly, None);
        assert_eq!(control.encode_value().unwrap(), vec![0x30, 0x03, 0x0A, 0x01, 0x01]);

        let mut control = SyncRequestControl::new(SyncMode::RefreshAndPersist, Some(b"c".to_vec()));
        control.reload_hint = true;
        assert_eq!(
            control.encode_value().unwrap(),
            vec![0x30, 0x09, 0x0A, 0x01, 0x03, 0x04, 0x01, b'c', 0x01, 0x01, 0xFF]
        );
    }

    #[test]
    fn test_state_control() {
        let control = SyncStateControl {
            state: SyncState::Modify,
            entry_uuid: Uuid::parse_str(UUID_A).unwrap(),
            cookie: Some(b"rid=001,csn=1#2#3#4".to_vec()),
        };
        let decoded = SyncStateControl::decode_value(&control.encode_value()).unwrap();
        assert_eq!(decoded, control);

        let no_cookie = SyncStateControl { cookie: None, ..control };
        assert_eq!(SyncStateControl::decode_value(&no_cookie.encode_value()).unwrap().cookie, None);
    }

    #[test]
    fn test_state_control_requires_uuid() {
        assert!(SyncStateControl::decode_value(&[0x30, 0x03, 0x0A, 0x01, 0x01]).is_err());
        // entryUUID must be 16 bytes
        assert!(SyncStateControl::decode_value(&[0x30, 0x06, 0x0A, 0x01, 0x01, 0x04, 0x01, 0x00]).is_err());
    }

    #[test]
    fn test_done_control() {
        let done = SyncDoneControl::decode_value(&[0x30, 0x00]).unwrap();
        assert_eq!(done, SyncDoneControl::default());
        let done = SyncDoneControl {
            cookie: Some(b"abc".to_vec()),
            refresh_deletes: true,
        };
        assert_eq!(SyncDoneControl::decode_value(&done.encode_value()).unwrap(), done);
    }

    #[test]
    fn test_sync_info_new_cookie() {
        let info = SyncInfo::decode(&[0x80, 0x02, b'c', b'1']).unwrap();
        assert_eq!(info, SyncInfo::NewCookie(b"c1".to_vec()));
        assert_eq!(info.cookie(), Some(&b"c1"[..]));
    }

    #[test]
    fn test_sync_info_refresh_done_defaults_true() {
        let info = SyncInfo::decode(&[0xA1, 0x03, 0x04, 0x01, b'x']).unwrap();
        assert_eq!(
            info,
            SyncInfo::RefreshDelete {
                cookie: Some(b"x".to_vec()),
                done: true
            }
        );
        let info = SyncInfo::decode(&[0xA2, 0x03, 0x01, 0x01, 0x00]).unwrap();
        assert_eq!(
            info,
            SyncInfo::RefreshPresent {
                cookie: None,
                done: false
            }
        );
        assert_eq!(SyncInfo::decode(&info.encode()).unwrap(), info);
    }

    #[test]
    fn test_sync_id_set() {
        let info = SyncInfo::SyncIdSet {
            cookie: Some(b"k".to_vec()),
            deletes: true,
            uuids: vec![Uuid::parse_str(UUID_A).unwrap(), Uuid::parse_str(UUID_B).unwrap()],
        };
        let bytes = info.encode();
        assert_eq!(bytes[0], 0xA3);
        assert_eq!(SyncInfo::decode(&bytes).unwrap(), info);

        // refreshDeletes DEFAULT FALSE
        let bare = SyncInfo::decode(&[0xA3, 0x02, 0x31, 0x00]).unwrap();
        assert_eq!(
            bare,
            SyncInfo::SyncIdSet {
                cookie: None,
                deletes: false,
                uuids: Vec::new()
            }
        );
    }

    #[test]
    fn test_sync_info_rejects_garbage() {
        assert!(SyncInfo::decode(&[]).is_err());
        assert!(SyncInfo::decode(&[0x80, 0x00, 0xA1, 0x00]).is_err());
        assert!(SyncInfo::decode(&[0xA1, 0x05, 0x04, 0x01]).is_err());
    }
}
