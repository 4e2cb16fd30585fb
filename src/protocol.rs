// LDAP v3 message layer (RFC 4511): request encoding and response decoding

use crate::der::encode::{
    BooleanEncoder, ConstructedEncoder, DerEncoder, EnumeratedEncoder, IntegerEncoder, OctetStringEncoder,
    RawEncoder, TaggedEncoder,
};
use crate::der::tag::{Tag, TagClass};
use crate::der::types;
use crate::der::Buffer;
use crate::error::{Error, Result};
use crate::filter;
use std::fmt;

/// LDAP result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    pub const OPERATIONS_ERROR: ResultCode = ResultCode(1);
    pub const PROTOCOL_ERROR: ResultCode = ResultCode(2);
    pub const TIME_LIMIT_EXCEEDED: ResultCode = ResultCode(3);
    pub const SIZE_LIMIT_EXCEEDED: ResultCode = ResultCode(4);
    pub const COMPARE_FALSE: ResultCode = ResultCode(5);
    pub const COMPARE_TRUE: ResultCode = ResultCode(6);
    pub const REFERRAL: ResultCode = ResultCode(10);
    pub const UNAVAILABLE_CRITICAL_EXTENSION: ResultCode = ResultCode(12);
    pub const NO_SUCH_OBJECT: ResultCode = ResultCode(32);
    pub const INVALID_CREDENTIALS: ResultCode = ResultCode(49);
    pub const INSUFFICIENT_ACCESS_RIGHTS: ResultCode = ResultCode(50);
    pub const BUSY: ResultCode = ResultCode(51);
    pub const UNAVAILABLE: ResultCode = ResultCode(52);
    pub const UNWILLING_TO_PERFORM: ResultCode = ResultCode(53);
    pub const OTHER: ResultCode = ResultCode(80);
    pub const CANCELED: ResultCode = ResultCode(118);
    pub const NO_SUCH_OPERATION: ResultCode = ResultCode(119);
    pub const TOO_LATE: ResultCode = ResultCode(120);
    pub const CANNOT_CANCEL: ResultCode = ResultCode(121);
    /// RFC 4533: the server cannot resume from the supplied cookie.
    pub const E_SYNC_REFRESH_REQUIRED: ResultCode = ResultCode(4096);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    fn name(&self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "success",
            1 => "operationsError",
            2 => "protocolError",
            3 => "timeLimitExceeded",
            4 => "sizeLimitExceeded",
            5 => "compareFalse",
            6 => "compareTrue",
            10 => "referral",
            12 => "unavailableCriticalExtension",
            32 => "noSuchObject",
            49 => "invalidCredentials",
            50 => "insufficientAccessRights",
            51 => "busy",
            52 => "unavailable",
            53 => "unwillingToPerform",
            80 => "other",
            118 => "canceled",
            119 => "noSuchOperation",
            120 => "tooLate",
            121 => "cannotCancel",
            4096 => "e-syncRefreshRequired",
            _ => return None,
        })
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "result code {}", self.0),
        }
    }
}

// LDAP Control (request or response)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>, critical: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value,
        }
    }

    fn encoder(&self) -> ConstructedEncoder {
        let mut seq = ConstructedEncoder::sequence(vec![Box::new(OctetStringEncoder::from(self.oid.as_str()))]);
        // criticality DEFAULT FALSE
        if self.critical {
            seq.push(BooleanEncoder(true));
        }
        if let Some(ref value) = self.value {
            seq.push(OctetStringEncoder::new(value.clone()));
        }
        seq
    }

    fn decode(buf: &mut Buffer<'_>) -> Result<Self> {
        let oid = types::decode_string(buf.read_expected(Tag::OCTET_STRING)?)?;
        let mut critical = false;
        let mut value = None;
        while buf.has_remaining() {
            let (tag, mut content) = buf.read_tlv()?;
            match tag {
                Tag::BOOLEAN => critical = types::decode_boolean(content.read_remaining())?,
                Tag::OCTET_STRING => value = Some(content.read_remaining().to_vec()),
                other => return Err(Error::decode(format!("unexpected {} in control {}", other, oid))),
            }
        }
        Ok(Self { oid, critical, value })
    }
}

/// Find a control by OID.
pub fn find_control<'a>(controls: &'a [Control], oid: &str) -> Option<&'a Control> {
    controls.iter().find(|c| c.oid == oid)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: String,
    pub attr_values: Vec<Vec<u8>>,
}

impl Attribute {
    pub fn new(attr_type: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            attr_type: attr_type.into(),
            attr_values: values,
        }
    }

    fn encoder(&self) -> ConstructedEncoder {
        let mut vals = ConstructedEncoder::new(Tag::SET, Vec::new());
        for value in &self.attr_values {
            vals.push(OctetStringEncoder::new(value.clone()));
        }
        ConstructedEncoder::sequence(vec![
            Box::new(OctetStringEncoder::from(self.attr_type.as_str())),
            Box::new(vals),
        ])
    }

    fn decode(buf: &mut Buffer<'_>) -> Result<Self> {
        let attr_type = types::decode_string(buf.read_expected(Tag::OCTET_STRING)?)?;
        let mut vals = Buffer::new(buf.read_expected(Tag::SET)?);
        let mut attr_values = Vec::new();
        while vals.has_remaining() {
            attr_values.push(vals.read_expected(Tag::OCTET_STRING)?.to_vec());
        }
        Ok(Self { attr_type, attr_values })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    BaseObject = 0,
    SingleLevel = 1,
    WholeSubtree = 2,
}

impl TryFrom<u8> for SearchScope {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SearchScope::BaseObject),
            1 => Ok(SearchScope::SingleLevel),
            2 => Ok(SearchScope::WholeSubtree),
            _ => Err(Error::InvalidArgument(format!("invalid search scope: {}", value))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BindAuthentication {
    Simple(String),
    Sasl { mechanism: String, credentials: Option<Vec<u8>> },
}

#[derive(Debug, Clone)]
pub struct BindRequest {
    pub name: String,
    pub authentication: BindAuthentication,
}

impl BindRequest {
    pub fn simple(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authentication: BindAuthentication::Simple(password.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base_object: String,
    pub scope: SearchScope,
    pub deref_aliases: i32,
    pub size_limit: i32,
    pub time_limit: i32,
    pub types_only: bool,
    /// RFC 4515 string form; compiled when the request is encoded.
    pub filter: String,
    pub attributes: Vec<String>,
}

impl SearchRequest {
    pub fn new(base_object: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base_object: base_object.into(),
            scope,
            deref_aliases: 0,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: filter.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attributes<S: Into<String>>(mut self, attributes: impl IntoIterator<Item = S>) -> Self {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOperation {
    Add = 0,
    Delete = 1,
    Replace = 2,
}

#[derive(Debug, Clone)]
pub struct ModifyChange {
    pub operation: ModifyOperation,
    pub modification: Attribute,
}

#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub object: String,
    pub changes: Vec<ModifyChange>,
}

#[derive(Debug, Clone)]
pub struct AddRequest {
    pub entry: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct DelRequest {
    pub entry: String,
}

#[derive(Debug, Clone)]
pub struct ModifyDNRequest {
    pub entry: String,
    pub newrdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub entry: String,
    pub attr: String,
    pub assertion_value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ExtendedRequest {
    pub request_name: String,
    pub request_value: Option<Vec<u8>>,
}

/// A client request. Every variant except `Abandon` and `Unbind` expects a response.
#[derive(Debug, Clone)]
pub enum Request {
    Bind(BindRequest),
    Search(SearchRequest),
    Modify(ModifyRequest),
    Add(AddRequest),
    Delete(DelRequest),
    ModifyDN(ModifyDNRequest),
    Compare(CompareRequest),
    Extended(ExtendedRequest),
    Abandon(i32),
    Unbind,
}

impl Request {
    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::Abandon(_) | Request::Unbind)
    }

    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Bind(_) => "bind",
            Request::Search(_) => "search",
            Request::Modify(_) => "modify",
            Request::Add(_) => "add",
            Request::Delete(_) => "delete",
            Request::ModifyDN(_) => "modifyDN",
            Request::Compare(_) => "compare",
            Request::Extended(_) => "extended",
            Request::Abandon(_) => "abandon",
            Request::Unbind => "unbind",
        }
    }

    fn encoder(&self) -> Result<Box<dyn DerEncoder>> {
        let encoder: Box<dyn DerEncoder> = match self {
            Request::Bind(req) => {
                let auth: Box<dyn DerEncoder> = match &req.authentication {
                    BindAuthentication::Simple(password) => {
                        Box::new(TaggedEncoder::context(0, password.as_bytes()))
                    }
                    BindAuthentication::Sasl { mechanism, credentials } => {
                        let mut sasl = ConstructedEncoder::new(
                            Tag::context(3, true),
                            vec![Box::new(OctetStringEncoder::from(mechanism.as_str()))],
                        );
                        if let Some(creds) = credentials {
                            sasl.push(OctetStringEncoder::new(creds.clone()));
                        }
                        Box::new(sasl)
                    }
                };
                Box::new(ConstructedEncoder::new(
                    Tag::application(LDAP_OP_BIND_REQUEST, true),
                    vec![
                        Box::new(IntegerEncoder::new(3)),
                        Box::new(OctetStringEncoder::from(req.name.as_str())),
                        auth,
                    ],
                ))
            }
            Request::Search(req) => {
                let mut attrs = ConstructedEncoder::sequence(Vec::new());
                for attr in &req.attributes {
                    attrs.push(OctetStringEncoder::from(attr.as_str()));
                }
                Box::new(ConstructedEncoder::new(
                    Tag::application(LDAP_OP_SEARCH_REQUEST, true),
                    vec![
                        Box::new(OctetStringEncoder::from(req.base_object.as_str())),
                        Box::new(EnumeratedEncoder(req.scope as i64)),
                        Box::new(EnumeratedEncoder(req.deref_aliases as i64)),
                        Box::new(IntegerEncoder::new(req.size_limit as i64)),
                        Box::new(IntegerEncoder::new(req.time_limit as i64)),
                        Box::new(BooleanEncoder(req.types_only)),
                        Box::new(RawEncoder(filter::compile(&req.filter)?)),
                        Box::new(attrs),
                    ],
                ))
            }
            Request::Modify(req) => {
                let mut changes = ConstructedEncoder::sequence(Vec::new());
                for change in &req.changes {
                    changes.push(ConstructedEncoder::sequence(vec![
                        Box::new(EnumeratedEncoder(change.operation as i64)),
                        Box::new(change.modification.encoder()),
                    ]));
                }
                Box::new(ConstructedEncoder::new(
                    Tag::application(LDAP_OP_MODIFY_REQUEST, true),
                    vec![Box::new(OctetStringEncoder::from(req.object.as_str())), Box::new(changes)],
                ))
            }
            Request::Add(req) => {
                let mut attrs = ConstructedEncoder::sequence(Vec::new());
                for attr in &req.attributes {
                    attrs.push(attr.encoder());
                }
                Box::new(ConstructedEncoder::new(
                    Tag::application(LDAP_OP_ADD_REQUEST, true),
                    vec![Box::new(OctetStringEncoder::from(req.entry.as_str())), Box::new(attrs)],
                ))
            }
            Request::Delete(req) => Box::new(TaggedEncoder::new(
                Tag::application(LDAP_OP_DEL_REQUEST, false),
                req.entry.as_bytes(),
            )),
            Request::ModifyDN(req) => {
                let mut seq = ConstructedEncoder::new(
                    Tag::application(LDAP_OP_MODIFY_DN_REQUEST, true),
                    vec![
                        Box::new(OctetStringEncoder::from(req.entry.as_str())),
                        Box::new(OctetStringEncoder::from(req.newrdn.as_str())),
                        Box::new(BooleanEncoder(req.delete_old_rdn)),
                    ],
                );
                if let Some(ref sup) = req.new_superior {
                    seq.push(TaggedEncoder::context(0, sup.as_bytes()));
                }
                Box::new(seq)
            }
            Request::Compare(req) => Box::new(ConstructedEncoder::new(
                Tag::application(LDAP_OP_COMPARE_REQUEST, true),
                vec![
                    Box::new(OctetStringEncoder::from(req.entry.as_str())),
                    Box::new(ConstructedEncoder::sequence(vec![
                        Box::new(OctetStringEncoder::from(req.attr.as_str())),
                        Box::new(OctetStringEncoder::new(req.assertion_value.clone())),
                    ])),
                ],
            )),
            Request::Extended(req) => {
                let mut seq = ConstructedEncoder::new(
                    Tag::application(LDAP_OP_EXTENDED_REQUEST, true),
                    vec![Box::new(TaggedEncoder::context(0, req.request_name.as_bytes()))],
                );
                if let Some(ref value) = req.request_value {
                    seq.push(TaggedEncoder::context(1, value.clone()));
                }
                Box::new(seq)
            }
            Request::Abandon(id) => Box::new(IntegerEncoder::with_tag(
                Tag::application(LDAP_OP_ABANDON_REQUEST, false),
                *id as i64,
            )),
            Request::Unbind => Box::new(TaggedEncoder::new(Tag::application(LDAP_OP_UNBIND_REQUEST, false), Vec::new())),
        };
        Ok(encoder)
    }
}

/// Result of a finished operation: the LDAPResult fields, message controls and,
/// for extended operations, the response name and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub message: String,
    pub referrals: Vec<String>,
    pub controls: Vec<Control>,
    pub extended_name: Option<String>,
    pub extended_value: Option<Vec<u8>>,
}

impl LdapResult {
    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            message: String::new(),
            referrals: Vec::new(),
            controls: Vec::new(),
            extended_name: None,
            extended_value: None,
        }
    }

    pub fn control(&self, oid: &str) -> Option<&Control> {
        find_control(&self.controls, oid)
    }

    /// `Ok(self)` for success, otherwise `Error::Operation`.
    pub fn success(self) -> Result<Self> {
        if self.code.is_success() {
            Ok(self)
        } else {
            Err(Error::Operation {
                code: self.code,
                message: self.message,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEntry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
    pub controls: Vec<Control>,
}

impl SearchEntry {
    /// Attribute by case-insensitive description.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type.eq_ignore_ascii_case(name))
    }

    pub fn control(&self, oid: &str) -> Option<&Control> {
        find_control(&self.controls, oid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReference {
    pub urls: Vec<String>,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateResponse {
    pub response_name: Option<String>,
    pub response_value: Option<Vec<u8>>,
    pub controls: Vec<Control>,
}

/// One server message belonging to an operation, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Entry(SearchEntry),
    Reference(SearchReference),
    Intermediate(IntermediateResponse),
    Done(LdapResult),
}

/// Aggregate of a whole search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    pub entries: Vec<SearchEntry>,
    pub references: Vec<SearchReference>,
    pub result: LdapResult,
}

impl SearchResponse {
    pub fn new(result: LdapResult) -> Self {
        Self {
            entries: Vec::new(),
            references: Vec::new(),
            result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LdapMessage {
    pub message_id: i32,
    pub response: Response,
}

// LDAP protocol operation numbers ([APPLICATION n])
pub const LDAP_OP_BIND_REQUEST: u32 = 0;
pub const LDAP_OP_BIND_RESPONSE: u32 = 1;
pub const LDAP_OP_UNBIND_REQUEST: u32 = 2;
pub const LDAP_OP_SEARCH_REQUEST: u32 = 3;
pub const LDAP_OP_SEARCH_RESULT_ENTRY: u32 = 4;
pub const LDAP_OP_SEARCH_RESULT_DONE: u32 = 5;
pub const LDAP_OP_MODIFY_REQUEST: u32 = 6;
pub const LDAP_OP_MODIFY_RESPONSE: u32 = 7;
pub const LDAP_OP_ADD_REQUEST: u32 = 8;
pub const LDAP_OP_ADD_RESPONSE: u32 = 9;
pub const LDAP_OP_DEL_REQUEST: u32 = 10;
pub const LDAP_OP_DEL_RESPONSE: u32 = 11;
pub const LDAP_OP_MODIFY_DN_REQUEST: u32 = 12;
pub const LDAP_OP_MODIFY_DN_RESPONSE: u32 = 13;
pub const LDAP_OP_COMPARE_REQUEST: u32 = 14;
pub const LDAP_OP_COMPARE_RESPONSE: u32 = 15;
pub const LDAP_OP_ABANDON_REQUEST: u32 = 16;
pub const LDAP_OP_SEARCH_RESULT_REFERENCE: u32 = 19;
pub const LDAP_OP_EXTENDED_REQUEST: u32 = 23;
pub const LDAP_OP_EXTENDED_RESPONSE: u32 = 24;
pub const LDAP_OP_INTERMEDIATE_RESPONSE: u32 = 25;

/// Context [0] IMPLICIT SEQUENCE OF control
const LDAP_CONTEXT_CONTROLS: Tag = Tag::context(0, true);
/// Context [3] referral inside LDAPResult
const LDAP_CONTEXT_REFERRAL: Tag = Tag::context(3, true);

/// Encode `LDAPMessage ::= SEQUENCE { messageID, protocolOp, controls [0] OPTIONAL }`.
pub fn encode_ldap_message(message_id: i32, request: &Request, controls: &[Control]) -> Result<Vec<u8>> {
    let mut seq = ConstructedEncoder::sequence(vec![Box::new(IntegerEncoder::new(message_id as i64))]);
    seq.push(RawEncoder(request.encoder()?.encode()));
    if !controls.is_empty() {
        let mut ctrls = ConstructedEncoder::new(LDAP_CONTEXT_CONTROLS, Vec::new());
        for control in controls {
            ctrls.push(control.encoder());
        }
        seq.push(ctrls);
    }
    Ok(seq.encode())
}

/// Decode one complete server message.
pub fn parse_ldap_message(data: &[u8]) -> Result<LdapMessage> {
    let mut outer = Buffer::new(data);
    let mut reader = Buffer::new(outer.read_expected(Tag::SEQUENCE)?);
    if outer.has_remaining() {
        return Err(Error::decode("trailing bytes after LDAPMessage"));
    }

    let message_id = i32::try_from(types::decode_integer(reader.read_expected(Tag::INTEGER)?)?)
        .map_err(|_| Error::decode("messageID out of range"))?;
    let (tag, mut op) = reader.read_tlv()?;

    let controls = if reader.has_remaining() {
        let (ctag, mut ctrls) = reader.read_tlv()?;
        if ctag != LDAP_CONTEXT_CONTROLS {
            return Err(Error::decode(format!("expected controls, got {}", ctag)));
        }
        parse_controls(&mut ctrls)?
    } else {
        Vec::new()
    };
    if reader.has_remaining() {
        return Err(Error::decode("trailing data in LDAPMessage"));
    }

    if tag.class() != TagClass::Application {
        return Err(Error::decode(format!("expected protocolOp, got {}", tag)));
    }
    let response = match tag.number() {
        LDAP_OP_SEARCH_RESULT_ENTRY => Response::Entry(parse_search_entry(&mut op, controls)?),
        LDAP_OP_SEARCH_RESULT_REFERENCE => {
            let mut urls = Vec::new();
            while op.has_remaining() {
                urls.push(types::decode_string(op.read_expected(Tag::OCTET_STRING)?)?);
            }
            Response::Reference(SearchReference { urls, controls })
        }
        LDAP_OP_INTERMEDIATE_RESPONSE => {
            let mut resp = IntermediateResponse {
                response_name: None,
                response_value: None,
                controls,
            };
            while op.has_remaining() {
                let (t, mut content) = op.read_tlv()?;
                match (t.class(), t.number()) {
                    (TagClass::Context, 0) => {
                        resp.response_name = Some(types::decode_string(content.read_remaining())?)
                    }
                    (TagClass::Context, 1) => resp.response_value = Some(content.read_remaining().to_vec()),
                    _ => return Err(Error::decode(format!("unexpected {} in IntermediateResponse", t))),
                }
            }
            Response::Intermediate(resp)
        }
        LDAP_OP_BIND_RESPONSE
        | LDAP_OP_SEARCH_RESULT_DONE
        | LDAP_OP_MODIFY_RESPONSE
        | LDAP_OP_ADD_RESPONSE
        | LDAP_OP_DEL_RESPONSE
        | LDAP_OP_MODIFY_DN_RESPONSE
        | LDAP_OP_COMPARE_RESPONSE
        | LDAP_OP_EXTENDED_RESPONSE => {
            let mut result = parse_ldap_result(&mut op)?;
            result.controls = controls;
            while op.has_remaining() {
                let (t, mut content) = op.read_tlv()?;
                match (t.class(), t.number()) {
                    (TagClass::Context, 10) => {
                        result.extended_name = Some(types::decode_string(content.read_remaining())?)
                    }
                    (TagClass::Context, 11) => result.extended_value = Some(content.read_remaining().to_vec()),
                    // serverSaslCreds [7] on BindResponse
                    (TagClass::Context, 7) => {}
                    _ => return Err(Error::decode(format!("unexpected {} after LDAPResult", t))),
                }
            }
            Response::Done(result)
        }
        other => return Err(Error::decode(format!("unsupported LDAP operation APP({})", other))),
    };

    Ok(LdapMessage { message_id, response })
}

fn parse_controls(reader: &mut Buffer<'_>) -> Result<Vec<Control>> {
    let mut controls = Vec::new();
    while reader.has_remaining() {
        let mut ctrl = Buffer::new(reader.read_expected(Tag::SEQUENCE)?);
        controls.push(Control::decode(&mut ctrl)?);
    }
    Ok(controls)
}

fn parse_ldap_result(reader: &mut Buffer<'_>) -> Result<LdapResult> {
    let code = types::decode_integer(reader.read_expected(Tag::ENUMERATED)?)?;
    let code = u32::try_from(code).map_err(|_| Error::decode(format!("invalid result code {}", code)))?;
    let matched_dn = types::decode_string(reader.read_expected(Tag::OCTET_STRING)?)?;
    let message = types::decode_string(reader.read_expected(Tag::OCTET_STRING)?)?;
    let mut result = LdapResult::new(ResultCode(code));
    result.matched_dn = matched_dn;
    result.message = message;
    if reader.peek_u8() == Some(0xA3) {
        let mut refs = Buffer::new(reader.read_expected(LDAP_CONTEXT_REFERRAL)?);
        while refs.has_remaining() {
            result
                .referrals
                .push(types::decode_string(refs.read_expected(Tag::OCTET_STRING)?)?);
        }
    }
    Ok(result)
}

fn parse_search_entry(reader: &mut Buffer<'_>, controls: Vec<Control>) -> Result<SearchEntry> {
    let dn = types::decode_string(reader.read_expected(Tag::OCTET_STRING)?)?;
    let mut attrs = Buffer::new(reader.read_expected(Tag::SEQUENCE)?);
    let mut attributes = Vec::new();
    while attrs.has_remaining() {
        let mut attr = Buffer::new(attrs.read_expected(Tag::SEQUENCE)?);
        attributes.push(Attribute::decode(&mut attr)?);
    }
    Ok(SearchEntry {
        dn,
        attributes,
        controls,
    })
}

/// Server-side encoders used by the mock connections in tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    fn result_children(result: &LdapResult) -> Vec<Box<dyn DerEncoder>> {
        let mut children: Vec<Box<dyn DerEncoder>> = vec![
            Box::new(EnumeratedEncoder(result.code.0 as i64)),
            Box::new(OctetStringEncoder::from(result.matched_dn.as_str())),
            Box::new(OctetStringEncoder::from(result.message.as_str())),
        ];
        if !result.referrals.is_empty() {
            let mut refs = ConstructedEncoder::new(LDAP_CONTEXT_REFERRAL, Vec::new());
            for url in &result.referrals {
                refs.push(OctetStringEncoder::from(url.as_str()));
            }
            children.push(Box::new(refs));
        }
        if let Some(ref name) = result.extended_name {
            children.push(Box::new(TaggedEncoder::context(10, name.as_bytes())));
        }
        if let Some(ref value) = result.extended_value {
            children.push(Box::new(TaggedEncoder::context(11, value.clone())));
        }
        children
    }

    pub(crate) fn encode_response(message_id: i32, response: &Response) -> Vec<u8> {
        let (op, controls): (Box<dyn DerEncoder>, &[Control]) = match response {
            Response::Entry(entry) => {
                let mut attrs = ConstructedEncoder::sequence(Vec::new());
                for attr in &entry.attributes {
                    attrs.push(attr.encoder());
                }
                (
                    Box::new(ConstructedEncoder::new(
                        Tag::application(LDAP_OP_SEARCH_RESULT_ENTRY, true),
                        vec![Box::new(OctetStringEncoder::from(entry.dn.as_str())), Box::new(attrs)],
                    )) as Box<dyn DerEncoder>,
                    entry.controls.as_slice(),
                )
            }
            Response::Reference(reference) => {
                let mut refs =
                    ConstructedEncoder::new(Tag::application(LDAP_OP_SEARCH_RESULT_REFERENCE, true), Vec::new());
                for url in &reference.urls {
                    refs.push(OctetStringEncoder::from(url.as_str()));
                }
                (Box::new(refs) as Box<dyn DerEncoder>, reference.controls.as_slice())
            }
            Response::Intermediate(resp) => {
                let mut seq =
                    ConstructedEncoder::new(Tag::application(LDAP_OP_INTERMEDIATE_RESPONSE, true), Vec::new());
                if let Some(ref name) = resp.response_name {
                    seq.push(TaggedEncoder::context(0, name.as_bytes()));
                }
                if let Some(ref value) = resp.response_value {
                    seq.push(TaggedEncoder::context(1, value.clone()));
                }
                (Box::new(seq) as Box<dyn DerEncoder>, resp.controls.as_slice())
            }
            Response::Done(result) => {
                let op = if result.extended_name.is_some() || result.extended_value.is_some() {
                    LDAP_OP_EXTENDED_RESPONSE
                } else {
                    LDAP_OP_SEARCH_RESULT_DONE
                };
                (
                    Box::new(ConstructedEncoder::new(Tag::application(op, true), result_children(result)))
                        as Box<dyn DerEncoder>,
                    result.controls.as_slice(),
                )
            }
        };
        let mut seq = ConstructedEncoder::sequence(vec![Box::new(IntegerEncoder::new(message_id as i64)), op]);
        if !controls.is_empty() {
            let mut ctrls = ConstructedEncoder::new(LDAP_CONTEXT_CONTROLS, Vec::new());
            for control in controls {
                ctrls.push(control.encoder());
            }
            seq.push(ctrls);
        }
        seq.encode()
    }

    /// Read messageID and protocolOp tag from a client request.
    pub(crate) fn parse_request_header(data: &[u8]) -> Result<(i32, Tag)> {
        let mut outer = Buffer::new(data);
        let mut reader = Buffer::new(outer.read_expected(Tag::SEQUENCE)?);
        let message_id = types::decode_integer(reader.read_expected(Tag::INTEGER)?)? as i32;
        let (tag, _) = reader.read_tlv()?;
        Ok((message_id, tag))
    }

    pub(crate) fn entry(dn: &str) -> SearchEntry {
        SearchEntry {
            dn: dn.to_string(),
            attributes: vec![Attribute::new("cn", vec![b"test".to_vec()])],
            controls: Vec::new(),
        }
    }
}
