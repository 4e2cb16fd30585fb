// Extended operations: Cancel (RFC 3909), WhoAmI (RFC 4532) and Password Modify (RFC 3062)

use crate::connection::{Connection, OperationHandle};
use crate::der::encode::{ConstructedEncoder, DerEncoder, IntegerEncoder, TaggedEncoder};
use crate::der::parser::DerParser;
use crate::der::types;
use crate::error::Result;
use crate::protocol::{ExtendedRequest, Request};
use tracing::debug;

pub const CANCEL_OID: &str = "1.3.6.1.1.8";
pub const WHO_AM_I_OID: &str = "1.3.6.1.4.1.4203.1.11.3";
pub const PASSWORD_MODIFY_OID: &str = "1.3.6.1.4.1.4203.1.11.1";

/// `cancelRequestValue ::= SEQUENCE { cancelID MessageID }`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest {
    pub message_id: i32,
}

impl CancelRequest {
    pub fn new(message_id: i32) -> Self {
        Self { message_id }
    }

    pub fn to_request(&self) -> Request {
        let value = ConstructedEncoder::sequence(vec![Box::new(IntegerEncoder::new(self.message_id as i64))]).encode();
        Request::Extended(ExtendedRequest {
            request_name: CANCEL_OID.to_string(),
            request_value: Some(value),
        })
    }
}

/// Send a Cancel for `message_id`. The cancelled operation ends with `CANCELED`;
/// the returned handle carries the Cancel's own result.
pub async fn cancel<C: Connection>(conn: &C, message_id: i32) -> Result<OperationHandle> {
    debug!("Cancelling operation {}", message_id);
    conn.submit(CancelRequest::new(message_id).to_request(), Vec::new()).await
}

pub fn who_am_i_request() -> Request {
    Request::Extended(ExtendedRequest {
        request_name: WHO_AM_I_OID.to_string(),
        request_value: None,
    })
}

/// Authorization identity of the session, e.g. `dn:cn=admin,dc=example,dc=com`; empty when anonymous.
pub async fn who_am_i<C: Connection>(conn: &C) -> Result<String> {
    let result = conn.submit(who_am_i_request(), Vec::new()).await?.result().await?.success()?;
    match result.extended_value {
        Some(value) => types::decode_string(&value),
        None => Ok(String::new()),
    }
}

/// `PasswdModifyRequestValue ::= SEQUENCE { userIdentity [0] OPTIONAL, oldPasswd [1] OPTIONAL, newPasswd [2] OPTIONAL }`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordModifyRequest {
    pub user_identity: Option<String>,
    pub old_password: Option<Vec<u8>>,
    pub new_password: Option<Vec<u8>>,
}

impl PasswordModifyRequest {
    pub fn encode_value(&self) -> Vec<u8> {
        let mut seq = ConstructedEncoder::sequence(Vec::new());
        if let Some(ref user) = self.user_identity {
            seq.push(TaggedEncoder::context(0, user.as_bytes()));
        }
        if let Some(ref old) = self.old_password {
            seq.push(TaggedEncoder::context(1, old.clone()));
        }
        if let Some(ref new) = self.new_password {
            seq.push(TaggedEncoder::context(2, new.clone()));
        }
        seq.encode()
    }

    pub fn to_request(&self) -> Request {
        Request::Extended(ExtendedRequest {
            request_name: PASSWORD_MODIFY_OID.to_string(),
            request_value: Some(self.encode_value()),
        })
    }
}

/// `PasswdModifyResponseValue ::= SEQUENCE { genPasswd [0] OPTIONAL }`
pub fn decode_generated_password(value: &[u8]) -> Result<Option<Vec<u8>>> {
    let parser = DerParser::<Option<Vec<u8>>>::new().on("/SEQ/CTX(0)", |generated, buf| {
        *generated = Some(buf.read_remaining().to_vec());
        Ok(())
    })?;
    let mut generated = None;
    parser.parse(&mut generated, value)?;
    Ok(generated)
}

/// Change a password; returns the server-generated one when no new password was supplied.
pub async fn password_modify<C: Connection>(conn: &C, request: &PasswordModifyRequest) -> Result<Option<Vec<u8>>> {
    let result = conn.submit(request.to_request(), Vec::new()).await?.result().await?.success()?;
    match result.extended_value {
        Some(value) => decode_generated_password(&value),
        None => Ok(None),
    }
}
