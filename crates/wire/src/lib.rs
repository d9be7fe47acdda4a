//! Wire primitives shared by every serialized request and response of the
//! shard transport: variable-length integers, length-prefixed strings and
//! byte blobs, and the ordered protocol versions which gate layout changes.
//!
//! Encoders are infallible and append onto a growable buffer. Decoders
//! borrow from the input and return typed errors for truncated, malformed,
//! or trailing input.

mod codec;
pub use codec::{Decoder, Encoder};

mod version;
pub use version::ProtocolVersion;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("unexpected end of input ({remaining} bytes remain, {needed} needed)")]
    Truncated { needed: usize, remaining: usize },
    #[error("variable-length integer overflows 64 bits")]
    VarintOverflow,
    #[error("length prefix {length} exceeds remaining input ({remaining} bytes)")]
    LengthOverrun { length: u64, remaining: usize },
    #[error("wire string is not UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("unknown discriminant {value} for {kind}")]
    UnknownDiscriminant { kind: &'static str, value: u64 },
    #[error("{trailing} bytes of trailing input after a complete decode")]
    TrailingInput { trailing: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
