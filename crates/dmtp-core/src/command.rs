//! DMTP commands
//!
//! A command travels as one DMTP-shaped TLV whose tag names the command
//! and whose value is a nested field sequence. One MTP `Command` body may
//! carry several commands back to back.
//!
//! - `HI`   — client announces its (signed) location
//! - `SIGN` — server hands back the mapped address for the client to sign
//! - `CALL` — client asks the server where a peer is
//! - `FROM` — server advises a peer's location (sent to both parties)
//! - `BYE`  — client retracts a signed location

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::field::{tag as field_tag, FieldSet};
use crate::location::Location;
use crate::time;
use crate::tlv;

/// Command tag codes
pub mod tag {
    pub const HELLO: u8 = 0x20;
    pub const SIGN: u8 = 0x21;
    pub const CALL: u8 = 0x22;
    pub const FROM: u8 = 0x23;
    pub const BYE: u8 = 0x24;
}

/// A decoded DMTP command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hello(Location),
    Sign(Location),
    Call { identifier: String },
    From(Location),
    Bye(Location),
}

impl Command {
    /// A minimal `HI` for a client that has no signed location yet
    pub fn hello(identifier: &str) -> Self {
        let mut location = Location::for_id(identifier);
        location.timestamp = time::now();
        Command::Hello(location)
    }

    pub fn call(identifier: &str) -> Self {
        Command::Call {
            identifier: identifier.to_owned(),
        }
    }

    /// Decode every recognized command in an MTP `Command` body.
    ///
    /// Unknown command tags and malformed values are skipped; they never
    /// abort the walk.
    pub fn decode_all(body: &Bytes) -> Vec<Command> {
        let seq = tlv::parse(body, tlv::FIELD);
        seq.items
            .iter()
            .filter_map(|item| Self::decode_one(item.tag as u8, &item.value).ok())
            .collect()
    }

    fn decode_one(tag_code: u8, value: &Bytes) -> Result<Command> {
        let fields = FieldSet::parse(value);
        match tag_code {
            tag::HELLO => Ok(Command::Hello(Location::from_fields(&fields)?)),
            tag::SIGN => Ok(Command::Sign(Location::from_fields(&fields)?)),
            tag::CALL => Ok(Command::Call {
                identifier: fields
                    .text(field_tag::ID)
                    .ok_or(Error::MissingField("ID"))?,
            }),
            tag::FROM => Ok(Command::From(Location::from_fields(&fields)?)),
            tag::BYE => Ok(Command::Bye(Location::from_fields(&fields)?)),
            _ => Err(Error::InvalidField("unknown command tag")),
        }
    }

    /// Encode as one command TLV
    pub fn encode(&self) -> Bytes {
        let (tag_code, fields) = match self {
            Command::Hello(location) => (tag::HELLO, location_fields(location)),
            Command::Sign(location) => (tag::SIGN, location_fields(location)),
            Command::Call { identifier } => {
                let mut fields = FieldSet::new();
                fields.push_text(field_tag::ID, identifier);
                (tag::CALL, fields)
            }
            Command::From(location) => (tag::FROM, location_fields(location)),
            Command::Bye(location) => (tag::BYE, location_fields(location)),
        };
        let value = fields.encode();
        let mut buf = BytesMut::new();
        // nested field sequences stay far below the 255-byte value cap
        tlv::encode_into(&mut buf, tag_code as u16, &value, tlv::FIELD)
            .expect("command value exceeds tag-length-value capacity");
        buf.freeze()
    }
}

fn location_fields(location: &Location) -> FieldSet {
    let mut fields = FieldSet::new();
    location.write_fields(&mut fields);
    fields
}
