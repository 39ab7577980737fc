//! DMTP Core
//!
//! Core types, wire codec, and protocol primitives for the DMTP stack.
//!
//! This crate provides:
//! - Tag-length-value primitives shared by STUN attributes and DMTP
//!   fields ([`tlv`])
//! - The MTP packet layer: header codec, fragmentation, reassembly
//!   ([`packet`])
//! - DMTP named fields, commands, and messages ([`field`], [`command`],
//!   [`message`])
//! - Socket address wire structures and signed location records
//!   ([`addr`], [`location`])

pub mod addr;
pub mod command;
pub mod error;
pub mod field;
pub mod location;
pub mod message;
pub mod packet;
pub mod time;
pub mod tlv;

pub use command::Command;
pub use error::{Error, Result};
pub use field::{Field, FieldSet};
pub use location::Location;
pub use message::Message;
pub use packet::{next_sn, Header, Packet, PacketType, HEADER_LEN, MAX_BODY_LEN};
pub use time::Timestamp;
