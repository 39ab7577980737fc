//! MTP packet encoding/decoding
//!
//! MTP packet format (header is 24 bytes, all integers big-endian):
//! ```text
//! ┌──────────────┬─────────────┬──────────┬────────────┐
//! │ magic "DIM\0"│ version (1) │ type (1) │ sn (4)     │
//! ├──────────────┼─────────────┼──────────┼────────────┤
//! │ pages (4)    │ offset (4)  │ body_len (4) │ rsv (2)│
//! ├──────────────┴─────────────┴──────────┴────────────┤
//! │ body (body_len bytes)                              │
//! └────────────────────────────────────────────────────┘
//! ```
//! A message whose body exceeds [`MAX_BODY_LEN`] is split into
//! `MessageFragment` packets sharing one sequence number, with
//! `pages = N` and `offset = 0..N-1`. The recommended body cap keeps a
//! whole datagram within 576 bytes so it crosses IPv4 paths unfragmented.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Packet magic
pub const MAGIC: [u8; 4] = *b"DIM\0";

/// Protocol version
pub const VERSION: u8 = 1;

/// Header size in bytes
pub const HEADER_LEN: usize = 24;

/// Maximum body length of one datagram (total packet ≤ 576 bytes)
pub const MAX_BODY_LEN: usize = 512;

/// Packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Command = 1,
    CommandRespond = 2,
    Message = 3,
    MessageRespond = 4,
    MessageFragment = 5,
}

impl PacketType {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(PacketType::Command),
            2 => Some(PacketType::CommandRespond),
            3 => Some(PacketType::Message),
            4 => Some(PacketType::MessageRespond),
            5 => Some(PacketType::MessageFragment),
            _ => None,
        }
    }

    /// The response type acknowledging this type, if any
    pub fn respond(self) -> Option<PacketType> {
        match self {
            PacketType::Command => Some(PacketType::CommandRespond),
            PacketType::Message | PacketType::MessageFragment => Some(PacketType::MessageRespond),
            _ => None,
        }
    }

    /// True for `CommandRespond` and `MessageRespond`
    pub fn is_respond(self) -> bool {
        matches!(self, PacketType::CommandRespond | PacketType::MessageRespond)
    }
}

/// Parsed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketType,
    pub sn: u32,
    pub pages: u32,
    pub offset: u32,
    pub body_len: u32,
}

impl Header {
    /// Header for an unfragmented packet
    pub fn single(kind: PacketType, sn: u32, body_len: u32) -> Self {
        Self {
            kind,
            sn,
            pages: 1,
            offset: 0,
            body_len,
        }
    }

    pub fn is_fragment(&self) -> bool {
        self.kind == PacketType::MessageFragment
    }

    /// Decode a header, validating magic, version and field invariants
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::BufferTooSmall {
                needed: HEADER_LEN,
                have: buf.len(),
            });
        }
        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }
        if buf[4] != VERSION {
            return Err(Error::UnsupportedVersion(buf[4]));
        }
        let kind = PacketType::from_u8(buf[5]).ok_or(Error::UnknownPacketType(buf[5]))?;
        let sn = u32::from_be_bytes(buf[6..10].try_into().unwrap());
        let pages = u32::from_be_bytes(buf[10..14].try_into().unwrap());
        let offset = u32::from_be_bytes(buf[14..18].try_into().unwrap());
        let body_len = u32::from_be_bytes(buf[18..22].try_into().unwrap());
        if pages < 1 {
            return Err(Error::InvalidHeader("pages must be >= 1"));
        }
        if offset >= pages {
            return Err(Error::InvalidHeader("offset must be < pages"));
        }
        if kind != PacketType::MessageFragment && pages != 1 {
            return Err(Error::InvalidHeader("unfragmented packet with pages > 1"));
        }
        Ok(Self {
            kind,
            sn,
            pages,
            offset,
            body_len,
        })
    }

    /// Encode the header into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.kind as u8);
        buf.put_u32(self.sn);
        buf.put_u32(self.pages);
        buf.put_u32(self.offset);
        buf.put_u32(self.body_len);
        buf.put_u16(0); // reserved
    }
}

/// An MTP packet: header plus body slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub head: Header,
    pub body: Bytes,
}

impl Packet {
    /// Build a packet from explicit header fields
    pub fn new(kind: PacketType, sn: u32, pages: u32, offset: u32, body: Bytes) -> Self {
        Self {
            head: Header {
                kind,
                sn,
                pages,
                offset,
                body_len: body.len() as u32,
            },
            body,
        }
    }

    /// Build packets for a payload, allocating a fresh sequence number
    /// when `sn` is `None`.
    ///
    /// A `Message` larger than [`MAX_BODY_LEN`] yields its fragments;
    /// anything else yields a single packet.
    pub fn create(kind: PacketType, sn: Option<u32>, body: Bytes) -> Vec<Packet> {
        let sn = sn.unwrap_or_else(next_sn);
        let pack = Packet::new(kind, sn, 1, 0, body);
        if kind == PacketType::Message && pack.body.len() > MAX_BODY_LEN {
            pack.split()
        } else {
            vec![pack]
        }
    }

    /// Parse a datagram; the body is a zero-copy slice of the input
    pub fn parse(data: &Bytes) -> Result<Packet> {
        let head = Header::decode(data)?;
        let total = HEADER_LEN + head.body_len as usize;
        if data.len() < total {
            return Err(Error::BufferTooSmall {
                needed: total,
                have: data.len(),
            });
        }
        Ok(Packet {
            head,
            body: data.slice(HEADER_LEN..total),
        })
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        self.head.encode_into(&mut buf);
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }

    /// Split a `Message` body into `MessageFragment` packets.
    ///
    /// Fragments share the sequence number; each carries `pages = N` and
    /// its own offset. Bodies within the cap come back unchanged.
    pub fn split(&self) -> Vec<Packet> {
        debug_assert_eq!(self.head.kind, PacketType::Message);
        if self.body.len() <= MAX_BODY_LEN {
            return vec![self.clone()];
        }
        let pages = self.body.len().div_ceil(MAX_BODY_LEN);
        let mut fragments = Vec::with_capacity(pages);
        for index in 0..pages {
            let start = index * MAX_BODY_LEN;
            let end = (start + MAX_BODY_LEN).min(self.body.len());
            fragments.push(Packet::new(
                PacketType::MessageFragment,
                self.head.sn,
                pages as u32,
                index as u32,
                self.body.slice(start..end),
            ));
        }
        fragments
    }

    /// Join a complete fragment set back into one `Message`.
    ///
    /// All fragments must share one sequence number, agree on `pages`,
    /// and cover every offset exactly once; arrival order is irrelevant.
    pub fn assemble(fragments: &[Packet]) -> Result<Packet> {
        let first = fragments.first().ok_or(Error::FragmentSet("empty set"))?;
        let sn = first.head.sn;
        let pages = first.head.pages as usize;
        if pages != fragments.len() {
            return Err(Error::FragmentSet("page count mismatch"));
        }
        let mut ordered: Vec<Option<&Packet>> = vec![None; pages];
        for pack in fragments {
            if pack.head.kind != PacketType::MessageFragment {
                return Err(Error::FragmentSet("not a fragment"));
            }
            if pack.head.sn != sn || pack.head.pages as usize != pages {
                return Err(Error::FragmentSet("foreign fragment"));
            }
            if pack.head.offset as usize >= pages {
                return Err(Error::FragmentSet("offset out of range"));
            }
            let slot = &mut ordered[pack.head.offset as usize];
            if slot.is_some() {
                return Err(Error::FragmentSet("duplicate offset"));
            }
            *slot = Some(pack);
        }
        let mut body = BytesMut::new();
        for slot in ordered {
            // every offset is present once pages == fragments.len()
            body.extend_from_slice(&slot.unwrap().body);
        }
        Ok(Packet::new(PacketType::Message, sn, 1, 0, body.freeze()))
    }
}

static NEXT_SN: AtomicU32 = AtomicU32::new(1);

/// Allocate the next sequence number: monotonic, wrapping, never zero
pub fn next_sn() -> u32 {
    loop {
        let sn = NEXT_SN.fetch_add(1, Ordering::Relaxed);
        if sn != 0 {
            return sn;
        }
    }
}
