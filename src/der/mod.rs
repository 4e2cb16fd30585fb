//! ASN.1 BER/DER codec with path-addressed decoding.

pub mod buffer;
pub mod dn;
pub mod encode;
pub mod parser;
pub mod path;
pub mod tag;
pub mod types;

pub use buffer::Buffer;
pub use dn::{AttributeValueAssertion, DistinguishedName, Rdn};
pub use encode::{
    encode_tlv, BooleanEncoder, ConstructedEncoder, DerEncoder, EnumeratedEncoder, IntegerEncoder,
    NullEncoder, OctetStringEncoder, OidEncoder, RawEncoder, TaggedEncoder,
};
pub use parser::{DerParser, MAX_PERMUTATIONS};
pub use path::{NodeKind, Path, PathNode};
pub use tag::{Tag, TagClass, UniversalType};
