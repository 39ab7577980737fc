//! STUN codec error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StunError>;

#[derive(Error, Debug)]
pub enum StunError {
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("message length field disagrees with datagram: {0}")]
    LengthMismatch(usize),

    #[error("attribute error: {0}")]
    Attribute(&'static str),

    #[error(transparent)]
    Core(#[from] dmtp_core::Error),
}
