use crate::protocol::ResultCode;
use thiserror::Error;

/// Errors raised by the codec, the control protocols and the transport.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed BER: bad tag or length, truncated input, unknown universal tag, nesting cap.
    #[error("DER decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed OID string, sync cookie or CSN.
    #[error("invalid format: {0}")]
    Format(String),

    #[error("referral limit exceeded (limit {0})")]
    ReferralLimitExceeded(u32),

    #[error("failed to follow referral to {url}: {source}")]
    ReferralFailed {
        url: String,
        #[source]
        source: Box<Error>,
    },

    /// Lifecycle misuse (double start, stop before start, restart while stopped).
    #[error("illegal state: {0}")]
    State(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("operation failed with {code}: {message}")]
    Operation { code: ResultCode, message: String },
}

impl Error {
    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
