//! STUN/TURN attributes
//!
//! Attributes are STUN-shaped TLV items (2-byte type, 2-byte length,
//! value padded to a 4-byte boundary). A process-wide registry maps type
//! codes to value decoders; it is populated once at startup and never
//! mutated afterwards. An unknown code decodes as a raw value — it never
//! fails, so comprehension-optional attributes pass through untouched.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

use bytes::{Buf, Bytes};

use dmtp_core::{addr, tlv};

/// Attribute type codes
pub mod kind {
    // [RFC-3489]
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    pub const RESPONSE_ADDRESS: u16 = 0x0002;
    pub const CHANGE_REQUEST: u16 = 0x0003;
    pub const SOURCE_ADDRESS: u16 = 0x0004;
    pub const CHANGED_ADDRESS: u16 = 0x0005;
    pub const USERNAME: u16 = 0x0006;
    pub const PASSWORD: u16 = 0x0007;
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;
    pub const ERROR_CODE: u16 = 0x0009;
    pub const UNKNOWN_ATTRIBUTES: u16 = 0x000A;
    pub const REFLECTED_FROM: u16 = 0x000B;

    // [RFC-5389]
    pub const REALM: u16 = 0x0014;
    pub const NONCE: u16 = 0x0015;
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    pub const XOR_MAPPED_ADDRESS_8020: u16 = 0x8020;
    pub const XOR_ONLY: u16 = 0x8021;
    pub const SOFTWARE: u16 = 0x8022;
    pub const ALTERNATE_SERVER: u16 = 0x8023;
    pub const FINGERPRINT: u16 = 0x8028;

    // [RFC-5766]
    pub const LIFETIME: u16 = 0x000D;
    pub const XOR_PEER_ADDRESS: u16 = 0x0012;
    pub const DATA: u16 = 0x0013;
    pub const XOR_RELAYED_ADDRESS: u16 = 0x0016;
}

/// Comprehension-required range is 0x0000-0x7FFF; the rest is optional
pub fn comprehension_required(code: u16) -> bool {
    code < 0x8000
}

/// Symbolic name of an attribute type, for logs
pub fn name(code: u16) -> &'static str {
    match code {
        kind::MAPPED_ADDRESS => "MAPPED-ADDRESS",
        kind::RESPONSE_ADDRESS => "RESPONSE-ADDRESS",
        kind::CHANGE_REQUEST => "CHANGE-REQUEST",
        kind::SOURCE_ADDRESS => "SOURCE-ADDRESS",
        kind::CHANGED_ADDRESS => "CHANGED-ADDRESS",
        kind::USERNAME => "USERNAME",
        kind::PASSWORD => "PASSWORD",
        kind::MESSAGE_INTEGRITY => "MESSAGE-INTEGRITY",
        kind::ERROR_CODE => "ERROR-CODE",
        kind::UNKNOWN_ATTRIBUTES => "UNKNOWN-ATTRIBUTES",
        kind::REFLECTED_FROM => "REFLECTED-FROM",
        kind::REALM => "REALM",
        kind::NONCE => "NONCE",
        kind::XOR_MAPPED_ADDRESS => "XOR-MAPPED-ADDRESS(0020)",
        kind::XOR_MAPPED_ADDRESS_8020 => "XOR-MAPPED-ADDRESS(8020)",
        kind::XOR_ONLY => "XOR-ONLY",
        kind::SOFTWARE => "SOFTWARE",
        kind::ALTERNATE_SERVER => "ALTERNATE-SERVER",
        kind::FINGERPRINT => "FINGERPRINT",
        kind::LIFETIME => "LIFETIME",
        kind::XOR_PEER_ADDRESS => "XOR-PEER-ADDRESS",
        kind::DATA => "DATA",
        kind::XOR_RELAYED_ADDRESS => "XOR-RELAYED-ADDRESS",
        _ => "ATTRIBUTE-?",
    }
}

/// A decoded attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A plain MAPPED-ADDRESS-shaped address
    Address(SocketAddr),
    /// An XOR-masked address, still carrying its mask; unmasking needs
    /// the transaction ID, which lives on the message
    XorAddress(Bytes),
    ChangeRequest {
        change_ip: bool,
        change_port: bool,
    },
    ErrorCode {
        code: u16,
        reason: String,
    },
    UnknownAttributes(Vec<u16>),
    Software(String),
    Lifetime(u32),
    Data(Bytes),
    /// Unregistered or malformed: the untouched value slice
    Raw(Bytes),
}

/// One attribute: its type code, decoded value, and raw value slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub code: u16,
    pub value: Value,
    pub raw: Bytes,
}

/// A pure decoder over a value slice
pub type Decoder = fn(&Bytes) -> Option<Value>;

static REGISTRY: OnceLock<HashMap<u16, Decoder>> = OnceLock::new();

/// The process-wide attribute registry, built on first use
fn registry() -> &'static HashMap<u16, Decoder> {
    REGISTRY.get_or_init(|| {
        let mut table: HashMap<u16, Decoder> = HashMap::new();
        for code in [
            kind::MAPPED_ADDRESS,
            kind::RESPONSE_ADDRESS,
            kind::SOURCE_ADDRESS,
            kind::CHANGED_ADDRESS,
            kind::REFLECTED_FROM,
            kind::ALTERNATE_SERVER,
        ] {
            table.insert(code, decode_address);
        }
        for code in [
            kind::XOR_MAPPED_ADDRESS,
            kind::XOR_MAPPED_ADDRESS_8020,
            kind::XOR_PEER_ADDRESS,
            kind::XOR_RELAYED_ADDRESS,
        ] {
            table.insert(code, decode_xor_address);
        }
        table.insert(kind::CHANGE_REQUEST, decode_change_request);
        table.insert(kind::ERROR_CODE, decode_error_code);
        table.insert(kind::UNKNOWN_ATTRIBUTES, decode_unknown_attributes);
        table.insert(kind::SOFTWARE, decode_software);
        table.insert(kind::LIFETIME, decode_lifetime);
        table.insert(kind::DATA, decode_data);
        table
    })
}

/// Decode one value; unregistered codes and malformed values come back
/// as [`Value::Raw`]
pub fn decode_value(code: u16, value: &Bytes) -> Value {
    match registry().get(&code) {
        Some(decoder) => decoder(value).unwrap_or_else(|| Value::Raw(value.clone())),
        None => Value::Raw(value.clone()),
    }
}

/// Parse an attribute sequence; the well-formed prefix is returned along
/// with the residual byte count of a truncated tail
pub fn parse(buf: &Bytes) -> (Vec<Attribute>, usize) {
    let seq = tlv::parse(buf, tlv::STUN);
    let attributes = seq
        .items
        .into_iter()
        .map(|item| Attribute {
            code: item.tag,
            value: decode_value(item.tag, &item.value),
            raw: item.value,
        })
        .collect();
    (attributes, seq.residual)
}

fn decode_address(value: &Bytes) -> Option<Value> {
    addr::decode(value).ok().map(Value::Address)
}

fn decode_xor_address(value: &Bytes) -> Option<Value> {
    (value.len() >= 8).then(|| Value::XorAddress(value.clone()))
}

/// CHANGE-REQUEST flags: change-IP at bit 2, change-port at bit 1
fn decode_change_request(value: &Bytes) -> Option<Value> {
    let flags = tlv::read_u32(value)?;
    Some(Value::ChangeRequest {
        change_ip: flags & 0x0000_0004 != 0,
        change_port: flags & 0x0000_0002 != 0,
    })
}

/// ERROR-CODE: class in the low 3 bits of byte 2, number in byte 3
fn decode_error_code(value: &Bytes) -> Option<Value> {
    if value.len() < 4 {
        return None;
    }
    let class = (value[2] & 0x07) as u16;
    let number = value[3] as u16;
    let reason = std::str::from_utf8(&value[4..]).ok()?;
    Some(Value::ErrorCode {
        code: class * 100 + number,
        reason: reason.to_owned(),
    })
}

fn decode_unknown_attributes(value: &Bytes) -> Option<Value> {
    if value.len() % 2 != 0 {
        return None;
    }
    let mut buf = value.clone();
    let mut codes = Vec::with_capacity(value.len() / 2);
    while buf.remaining() >= 2 {
        codes.push(buf.get_u16());
    }
    Some(Value::UnknownAttributes(codes))
}

fn decode_software(value: &Bytes) -> Option<Value> {
    std::str::from_utf8(value)
        .ok()
        .map(|text| Value::Software(text.trim_end_matches('\0').to_owned()))
}

fn decode_lifetime(value: &Bytes) -> Option<Value> {
    tlv::read_u32(value).map(Value::Lifetime)
}

fn decode_data(value: &Bytes) -> Option<Value> {
    Some(Value::Data(value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_code_never_fails() {
        let value = Bytes::from_static(&[0xDE, 0xAD]);
        assert_eq!(decode_value(0x7F00, &value), Value::Raw(value));
    }

    #[test]
    fn test_change_request_flags() {
        let both = Bytes::from_static(&[0, 0, 0, 0x06]);
        assert_eq!(
            decode_value(kind::CHANGE_REQUEST, &both),
            Value::ChangeRequest {
                change_ip: true,
                change_port: true
            }
        );
        let ip_only = Bytes::from_static(&[0, 0, 0, 0x04]);
        assert_eq!(
            decode_value(kind::CHANGE_REQUEST, &ip_only),
            Value::ChangeRequest {
                change_ip: true,
                change_port: false
            }
        );
    }

    #[test]
    fn test_error_code_420() {
        let mut wire = vec![0, 0, 4, 20];
        wire.extend_from_slice(b"Unknown Attribute");
        match decode_value(kind::ERROR_CODE, &Bytes::from(wire)) {
            Value::ErrorCode { code, reason } => {
                assert_eq!(code, 420);
                assert_eq!(reason, "Unknown Attribute");
            }
            other => panic!("expected ErrorCode, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_known_value_degrades_to_raw() {
        let short = Bytes::from_static(&[1]);
        assert_eq!(
            decode_value(kind::MAPPED_ADDRESS, &short),
            Value::Raw(short.clone())
        );
    }

    #[test]
    fn test_comprehension_ranges() {
        assert!(comprehension_required(kind::MAPPED_ADDRESS));
        assert!(!comprehension_required(kind::SOFTWARE));
    }
}
