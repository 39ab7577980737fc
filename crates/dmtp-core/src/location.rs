//! Signed location records
//!
//! A location binds a user identifier to the addresses it is reachable
//! at: the socket it bound locally (`source`), the reflexive address a
//! STUN exchange discovered (`mapped`), and optionally a TURN relay
//! (`relayed`). The record carries the signing time and a signature over
//! the canonical byte layout; signing itself is an external concern.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};

use crate::addr;
use crate::error::{Error, Result};
use crate::field::{tag, FieldSet};
use crate::time::Timestamp;

/// A user's (possibly signed) location record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub identifier: String,
    pub source: Option<SocketAddr>,
    pub mapped: Option<SocketAddr>,
    pub relayed: Option<SocketAddr>,
    /// Signing time; zero when the record was never timestamped
    pub timestamp: Timestamp,
    pub signature: Option<Bytes>,
    /// NAT type label reported by the owner
    pub nat: Option<String>,
}

impl Location {
    /// A bare record carrying only the identifier
    pub fn for_id(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_owned(),
            source: None,
            mapped: None,
            relayed: None,
            timestamp: 0,
            signature: None,
            nat: None,
        }
    }

    /// Read a location out of a field sequence.
    ///
    /// Only the identifier is mandatory at the codec level; which other
    /// fields must be present depends on the command carrying the record.
    pub fn from_fields(fields: &FieldSet) -> Result<Self> {
        let identifier = fields.text(tag::ID).ok_or(Error::MissingField("ID"))?;
        Ok(Self {
            identifier,
            source: fields.addr(tag::SRC),
            mapped: fields.addr(tag::MAP),
            relayed: fields.addr(tag::RLY),
            timestamp: fields.timestamp(tag::TIME).unwrap_or(0),
            signature: fields.get(tag::SIGN).cloned(),
            nat: fields.text(tag::NAT),
        })
    }

    /// Append this location's fields to a sequence
    pub fn write_fields(&self, fields: &mut FieldSet) {
        fields.push_text(tag::ID, &self.identifier);
        if let Some(source) = self.source {
            fields.push_addr(tag::SRC, source);
        }
        if let Some(mapped) = self.mapped {
            fields.push_addr(tag::MAP, mapped);
        }
        if let Some(relayed) = self.relayed {
            fields.push_addr(tag::RLY, relayed);
        }
        if self.timestamp != 0 {
            fields.push_timestamp(tag::TIME, self.timestamp);
        }
        if let Some(signature) = &self.signature {
            fields.push(tag::SIGN, signature.clone());
        }
        if let Some(nat) = &self.nat {
            fields.push_text(tag::NAT, nat);
        }
    }

    /// Canonical bytes covered by the signature:
    /// `source ‖ mapped ‖ relayed ‖ timestamp`, each address in its wire
    /// structure, absent optional addresses skipped. A record without a
    /// mapped address has nothing worth signing.
    pub fn sign_bytes(&self) -> Option<Bytes> {
        let mapped = self.mapped?;
        let mut buf = BytesMut::new();
        if let Some(source) = self.source {
            addr::encode_into(&mut buf, source);
        }
        addr::encode_into(&mut buf, mapped);
        if let Some(relayed) = self.relayed {
            addr::encode_into(&mut buf, relayed);
        }
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        Some(buf.freeze())
    }
}
