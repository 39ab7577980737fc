//! STUN message encoding/decoding
//!
//! Both header generations share a 20-byte layout:
//! ```text
//! ┌─────────────┬──────────────┬────────────────────────────────────┐
//! │ type (2)    │ length (2)   │ RFC-3489: transaction id (16)      │
//! │             │              │ RFC-5389: cookie (4) + txn id (12) │
//! └─────────────┴──────────────┴────────────────────────────────────┘
//! ```
//! The magic cookie `0x2112A442` in bytes 4-8 distinguishes a modern
//! message from a legacy one. Attributes follow as STUN-shaped TLV.

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;

use dmtp_core::{addr, tlv};

use crate::attribute::{self, Attribute, Value};
use crate::error::{Result, StunError};
use crate::xor;

/// The RFC-5389 magic cookie
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// Header size in bytes (both generations)
pub const HEADER_LEN: usize = 20;

/// Message type codes
pub mod kind {
    pub const BINDING_REQUEST: u16 = 0x0001;
    pub const BINDING_RESPONSE: u16 = 0x0101;
    pub const BINDING_ERROR_RESPONSE: u16 = 0x0111;

    // [RFC-5766]
    pub const ALLOCATE_REQUEST: u16 = 0x0003;
    pub const ALLOCATE_RESPONSE: u16 = 0x0103;
    pub const ALLOCATE_ERROR_RESPONSE: u16 = 0x0113;
    pub const SEND_INDICATION: u16 = 0x0016;
    pub const DATA_INDICATION: u16 = 0x0017;
}

/// An opaque request correlator: 12 bytes under RFC-5389, 16 under
/// RFC-3489
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionId {
    bytes: [u8; 16],
    len: usize,
}

impl TransactionId {
    /// A fresh random 12-byte (RFC-5389) transaction ID
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes[..12]);
        Self { bytes, len: 12 }
    }

    pub fn modern(bytes: [u8; 12]) -> Self {
        let mut buf = [0u8; 16];
        buf[..12].copy_from_slice(&bytes);
        Self {
            bytes: buf,
            len: 12,
        }
    }

    pub fn legacy(bytes: [u8; 16]) -> Self {
        Self { bytes, len: 16 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn is_legacy(&self) -> bool {
        self.len == 16
    }
}

/// A STUN/TURN message: type, transaction ID, attributes
#[derive(Debug, Clone)]
pub struct StunMessage {
    pub kind: u16,
    pub transaction_id: TransactionId,
    pub attributes: Vec<Attribute>,
    /// Count of trailing bytes that did not parse as attributes
    pub residual: usize,
}

impl StunMessage {
    pub fn new(kind: u16, transaction_id: TransactionId) -> Self {
        Self {
            kind,
            transaction_id,
            attributes: Vec::new(),
            residual: 0,
        }
    }

    /// A binding request with a fresh transaction ID
    pub fn binding_request() -> Self {
        Self::new(kind::BINDING_REQUEST, TransactionId::random())
    }

    /// The XOR factor for this message: `cookie ‖ txn id` under
    /// RFC-5389, the bare transaction ID under RFC-3489
    pub fn xor_factor(&self) -> Vec<u8> {
        if self.transaction_id.is_legacy() {
            self.transaction_id.as_bytes().to_vec()
        } else {
            let mut factor = MAGIC_COOKIE.to_be_bytes().to_vec();
            factor.extend_from_slice(self.transaction_id.as_bytes());
            factor
        }
    }

    /// Append a raw attribute
    pub fn push_raw(&mut self, code: u16, raw: Bytes) {
        let value = attribute::decode_value(code, &raw);
        self.attributes.push(Attribute { code, value, raw });
    }

    /// Append a plain address attribute (MAPPED-ADDRESS shape)
    pub fn push_address(&mut self, code: u16, address: SocketAddr) {
        self.push_raw(code, addr::encode(address));
    }

    /// Append an XOR-masked address attribute
    pub fn push_xor_address(&mut self, code: u16, address: SocketAddr) -> Result<()> {
        let masked = xor::transform(&addr::encode(address), &self.xor_factor())?;
        self.push_raw(code, masked);
        Ok(())
    }

    /// Append a SOFTWARE attribute
    pub fn push_software(&mut self, description: &str) {
        self.push_raw(
            attribute::kind::SOFTWARE,
            Bytes::copy_from_slice(description.as_bytes()),
        );
    }

    /// First attribute carrying `code`, if any
    pub fn get(&self, code: u16) -> Option<&Attribute> {
        self.attributes.iter().find(|item| item.code == code)
    }

    /// The reflexive address this message reports, preferring the XOR
    /// forms and falling back to plain MAPPED-ADDRESS
    pub fn mapped_address(&self) -> Option<SocketAddr> {
        for code in [
            attribute::kind::XOR_MAPPED_ADDRESS,
            attribute::kind::XOR_MAPPED_ADDRESS_8020,
        ] {
            if let Some(address) = self.xor_address(code) {
                return Some(address);
            }
        }
        match self.get(attribute::kind::MAPPED_ADDRESS).map(|a| &a.value) {
            Some(Value::Address(address)) => Some(*address),
            _ => None,
        }
    }

    /// Unmask an XOR address attribute against this message's factor
    pub fn xor_address(&self, code: u16) -> Option<SocketAddr> {
        match self.get(code).map(|item| &item.value) {
            Some(Value::XorAddress(masked)) => {
                let unmasked = xor::transform(masked, &self.xor_factor()).ok()?;
                addr::decode(&unmasked).ok()
            }
            _ => None,
        }
    }

    /// The relayed address a TURN allocation reports
    pub fn relayed_address(&self) -> Option<SocketAddr> {
        self.xor_address(attribute::kind::XOR_RELAYED_ADDRESS)
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        for item in &self.attributes {
            // attribute values are bounded well below the u16 length cap
            tlv::encode_into(&mut body, item.code, &item.raw, tlv::STUN)
                .expect("attribute value exceeds length field");
        }
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
        buf.put_u16(self.kind);
        buf.put_u16(body.len() as u16);
        if !self.transaction_id.is_legacy() {
            buf.put_u32(MAGIC_COOKIE);
        }
        buf.extend_from_slice(self.transaction_id.as_bytes());
        buf.extend_from_slice(&body);
        buf.freeze()
    }

    /// Parse a datagram as a STUN message
    pub fn parse(data: &Bytes) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(StunError::BufferTooSmall {
                needed: HEADER_LEN,
                have: data.len(),
            });
        }
        let kind = u16::from_be_bytes([data[0], data[1]]);
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if data.len() < HEADER_LEN + length {
            return Err(StunError::LengthMismatch(length));
        }
        let cookie = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let transaction_id = if cookie == MAGIC_COOKIE {
            TransactionId::modern(data[8..20].try_into().unwrap())
        } else {
            TransactionId::legacy(data[4..20].try_into().unwrap())
        };
        let body = data.slice(HEADER_LEN..HEADER_LEN + length);
        let (attributes, residual) = attribute::parse(&body);
        Ok(Self {
            kind,
            transaction_id,
            attributes,
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_request_wire_shape() {
        let request = StunMessage::binding_request();
        let wire = request.encode();

        assert_eq!(wire.len(), HEADER_LEN);
        assert_eq!(&wire[0..2], &[0x00, 0x01]);
        assert_eq!(&wire[2..4], &[0x00, 0x00]);
        assert_eq!(&wire[4..8], &MAGIC_COOKIE.to_be_bytes());
    }

    #[test]
    fn test_legacy_header_detected() {
        let txn = TransactionId::legacy([7u8; 16]);
        let message = StunMessage::new(kind::BINDING_REQUEST, txn);
        let parsed = StunMessage::parse(&message.encode()).unwrap();

        assert!(parsed.transaction_id.is_legacy());
        assert_eq!(parsed.transaction_id.as_bytes(), &[7u8; 16]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut wire = StunMessage::binding_request().encode().to_vec();
        wire[3] = 8; // claims 8 attribute bytes that are not there
        assert!(StunMessage::parse(&Bytes::from(wire)).is_err());
    }
}
