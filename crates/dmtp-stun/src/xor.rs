//! XOR address masking
//!
//! XOR-MAPPED-ADDRESS hides the reflexive address from NATs that rewrite
//! literal addresses in payloads. The port is XORed with the high 16 bits
//! of the magic cookie and each address byte with the corresponding byte
//! of `magic_cookie ‖ transaction_id`. The transform is an involution, so
//! encode and decode are this one function.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, StunError};

/// Apply the XOR mask to a MAPPED-ADDRESS-shaped structure.
///
/// `factor` is `magic_cookie ‖ transaction_id` for RFC-5389 messages and
/// the bare 16-byte transaction ID for legacy RFC-3489 `0x8020` values.
/// Reserved and family bytes pass through untouched.
pub fn transform(value: &[u8], factor: &[u8]) -> Result<Bytes> {
    if value.len() < 8 {
        return Err(StunError::BufferTooSmall {
            needed: 8,
            have: value.len(),
        });
    }
    if factor.len() < 16 {
        return Err(StunError::BufferTooSmall {
            needed: 16,
            have: factor.len(),
        });
    }
    let mut masked = BytesMut::with_capacity(value.len());
    masked.put_u8(value[0]);
    masked.put_u8(value[1]);
    masked.put_u8(value[2] ^ factor[0]);
    masked.put_u8(value[3] ^ factor[1]);
    for (index, &byte) in value[4..].iter().enumerate() {
        masked.put_u8(byte ^ factor[index % factor.len()]);
    }
    Ok(masked.freeze())
}
