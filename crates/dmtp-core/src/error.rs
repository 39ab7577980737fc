//! Error types for the DMTP core codec

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// DMTP codec error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid magic in a packet header
    #[error("invalid magic: expected \"DIM\\0\", got {0:02x?}")]
    InvalidMagic([u8; 4]),

    /// Unknown protocol version
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Buffer shorter than the structure it should contain
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Invalid packet type code
    #[error("unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    /// Header field violates a packet invariant
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// Value does not fit the length field of its TLV shape
    #[error("value too long: {0} bytes")]
    ValueTooLong(usize),

    /// Fragment set cannot be assembled
    #[error("fragment set error: {0}")]
    FragmentSet(&'static str),

    /// A required field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field value failed to decode
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// Malformed address structure
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
