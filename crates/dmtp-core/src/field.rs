//! DMTP named fields
//!
//! Inside an MTP body, DMTP carries a sequence of 1-byte-tag TLV triples
//! (the [`crate::tlv::FIELD`] shape). Tag codes are deployment-internal;
//! only their meaning is fixed.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};

use crate::addr;
use crate::time::Timestamp;
use crate::tlv;

/// Field tag codes
pub mod tag {
    /// User identifier (UTF-8)
    pub const ID: u8 = 0x01;
    /// Source address (as seen by the sender itself)
    pub const SRC: u8 = 0x02;
    /// Mapped address (reflexive, as seen by the server)
    pub const MAP: u8 = 0x03;
    /// Relayed address (TURN allocation)
    pub const RLY: u8 = 0x04;
    /// Timestamp (4-byte big-endian seconds)
    pub const TIME: u8 = 0x05;
    /// Signature over the location addresses and time
    pub const SIGN: u8 = 0x06;
    /// NAT type label (UTF-8)
    pub const NAT: u8 = 0x07;

    /// Message sender identifier
    pub const SENDER: u8 = 0x10;
    /// Message receiver identifier
    pub const RECEIVER: u8 = 0x11;
    /// Message content (raw bytes)
    pub const CONTENT: u8 = 0x12;
    /// Symmetric key material for the content
    pub const KEY: u8 = 0x13;
    /// Attachment (raw bytes)
    pub const FILE: u8 = 0x14;
}

/// Symbolic name of a field tag, for logs
pub fn name(tag_code: u8) -> &'static str {
    match tag_code {
        tag::ID => "ID",
        tag::SRC => "SRC",
        tag::MAP => "MAP",
        tag::RLY => "RLY",
        tag::TIME => "TIME",
        tag::SIGN => "SIGN",
        tag::NAT => "NAT",
        tag::SENDER => "SENDER",
        tag::RECEIVER => "RECEIVER",
        tag::CONTENT => "CONTENT",
        tag::KEY => "KEY",
        tag::FILE => "FILE",
        _ => "FIELD-?",
    }
}

/// One named field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub tag: u8,
    pub value: Bytes,
}

/// An ordered field sequence with typed accessors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<Field>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a field sequence; a truncated tail is dropped
    pub fn parse(body: &Bytes) -> Self {
        let seq = tlv::parse(body, tlv::FIELD);
        Self {
            fields: seq
                .items
                .into_iter()
                .map(|item| Field {
                    tag: item.tag as u8,
                    value: item.value,
                })
                .collect(),
        }
    }

    /// Encode back to wire bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for field in &self.fields {
            // field values are capped at 255 bytes by construction
            tlv::encode_into(&mut buf, field.tag as u16, &field.value, tlv::FIELD)
                .expect("field value exceeds tag-length-value capacity");
        }
        buf.freeze()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First value carrying `tag_code`, if any
    pub fn get(&self, tag_code: u8) -> Option<&Bytes> {
        self.fields
            .iter()
            .find(|field| field.tag == tag_code)
            .map(|field| &field.value)
    }

    pub fn push(&mut self, tag_code: u8, value: Bytes) {
        self.fields.push(Field {
            tag: tag_code,
            value,
        });
    }

    /// Push a value of any size, splitting it into 255-byte fields that
    /// share the tag; [`Self::concat`] is the matching reader
    pub fn push_chunked(&mut self, tag_code: u8, value: &Bytes) {
        if value.is_empty() {
            self.push(tag_code, Bytes::new());
            return;
        }
        let mut start = 0;
        while start < value.len() {
            let end = (start + u8::MAX as usize).min(value.len());
            self.push(tag_code, value.slice(start..end));
            start = end;
        }
    }

    pub fn push_text(&mut self, tag_code: u8, text: &str) {
        self.push(tag_code, Bytes::copy_from_slice(text.as_bytes()));
    }

    pub fn push_addr(&mut self, tag_code: u8, address: SocketAddr) {
        self.push(tag_code, addr::encode(address));
    }

    pub fn push_timestamp(&mut self, tag_code: u8, timestamp: Timestamp) {
        self.push(tag_code, Bytes::copy_from_slice(&timestamp.to_be_bytes()));
    }

    /// Every value carrying `tag_code`, joined in field order; `None`
    /// when the tag is absent
    pub fn concat(&self, tag_code: u8) -> Option<Bytes> {
        let mut joined = BytesMut::new();
        let mut found = false;
        for field in self.fields.iter().filter(|field| field.tag == tag_code) {
            joined.extend_from_slice(&field.value);
            found = true;
        }
        found.then(|| joined.freeze())
    }

    /// UTF-8 view of a field; absent or malformed yields `None`
    pub fn text(&self, tag_code: u8) -> Option<String> {
        let value = self.get(tag_code)?;
        std::str::from_utf8(value).ok().map(str::to_owned)
    }

    /// Address view of a field; absent or malformed yields `None`
    pub fn addr(&self, tag_code: u8) -> Option<SocketAddr> {
        addr::decode(self.get(tag_code)?).ok()
    }

    /// Timestamp view of a field; absent or malformed yields `None`
    pub fn timestamp(&self, tag_code: u8) -> Option<Timestamp> {
        tlv::read_u32(self.get(tag_code)?)
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let mut fields = FieldSet::new();
        fields.push_text(tag::ID, "alice");
        fields.push_addr(tag::MAP, "203.0.113.7:4444".parse().unwrap());
        fields.push_timestamp(tag::TIME, 1_700_000_000);

        let parsed = FieldSet::parse(&fields.encode());
        assert_eq!(parsed.text(tag::ID).as_deref(), Some("alice"));
        assert_eq!(
            parsed.addr(tag::MAP),
            Some("203.0.113.7:4444".parse().unwrap())
        );
        assert_eq!(parsed.timestamp(tag::TIME), Some(1_700_000_000));
        assert_eq!(parsed.text(tag::NAT), None);
    }

    #[test]
    fn test_chunked_values_concatenate() {
        let value = Bytes::from((0..700u32).map(|i| i as u8).collect::<Vec<u8>>());
        let mut fields = FieldSet::new();
        fields.push_chunked(tag::CONTENT, &value);

        let parsed = FieldSet::parse(&fields.encode());
        assert_eq!(parsed.iter().count(), 3);
        assert_eq!(parsed.concat(tag::CONTENT).unwrap(), value);
        // the empty value still marks presence
        let mut empty = FieldSet::new();
        empty.push_chunked(tag::CONTENT, &Bytes::new());
        let parsed = FieldSet::parse(&empty.encode());
        assert_eq!(parsed.concat(tag::CONTENT).unwrap(), Bytes::new());
    }

    #[test]
    fn test_first_value_wins_on_duplicates() {
        let mut fields = FieldSet::new();
        fields.push_text(tag::ID, "first");
        fields.push_text(tag::ID, "second");

        let parsed = FieldSet::parse(&fields.encode());
        assert_eq!(parsed.text(tag::ID).as_deref(), Some("first"));
    }
}
