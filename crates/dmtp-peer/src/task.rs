//! Peer engine tasks
//!
//! Three task shapes flow through the pool: an [`Arrival`] is one
//! received datagram awaiting dispatch, a [`Departure`] is an outbound
//! packet bundle awaiting acknowledgement, and an [`Assemble`] slot
//! collects the fragments of one sequence number until the set is
//! complete or goes stale.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use dmtp_core::packet::{Packet, PacketType};
use dmtp_core::Result;

/// Retries after the first transmission before a departure gives up
pub const MAX_RETRIES: u32 = 5;

/// Gap between transmission attempts
pub const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Age at which an incomplete fragment set is discarded
pub const ASSEMBLE_EXPIRES: Duration = Duration::from_secs(600);

/// One received datagram awaiting dispatch
#[derive(Debug, Clone)]
pub struct Arrival {
    pub payload: Bytes,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// An outbound task: every packet of one send, with its retry budget
#[derive(Debug, Clone)]
pub struct Departure {
    pub sn: u32,
    /// Original packet type (`Command` or `Message`; fragments count as
    /// `Message`)
    pub kind: PacketType,
    pub destination: SocketAddr,
    pub source: SocketAddr,
    pub packets: Vec<Packet>,
    pub last_try: Instant,
    pub tries_left: u32,
    pub retry_interval: Duration,
}

impl Departure {
    /// Bundle packets for one destination; `packets` must be non-empty
    /// and share one sequence number.
    pub fn new(packets: Vec<Packet>, destination: SocketAddr, source: SocketAddr) -> Self {
        assert!(!packets.is_empty(), "departure without packets");
        let head = packets[0].head;
        let kind = match head.kind {
            PacketType::MessageFragment => PacketType::Message,
            other => other,
        };
        Self {
            sn: head.sn,
            kind,
            destination,
            source,
            packets,
            last_try: Instant::now(),
            // first transmission plus MAX_RETRIES redos
            tries_left: MAX_RETRIES + 1,
            retry_interval: RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Take one transmission attempt; `false` when the budget is spent
    pub fn consume_try(&mut self, now: Instant) -> bool {
        if self.tries_left == 0 {
            return false;
        }
        self.tries_left -= 1;
        self.last_try = now;
        true
    }

    /// The retry timer has elapsed
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_try) >= self.retry_interval
    }

    /// Moment this departure becomes due again
    pub fn next_try(&self) -> Instant {
        self.last_try + self.retry_interval
    }

    /// Retire one fragment after a per-fragment acknowledgement; `true`
    /// when something was removed
    pub fn remove_page(&mut self, pages: u32, offset: u32) -> bool {
        let before = self.packets.len();
        self.packets
            .retain(|pack| !(pack.head.pages == pages && pack.head.offset == offset));
        before != self.packets.len()
    }
}

/// A fragment reassembly slot for one `(sn, source)` pair
#[derive(Debug)]
pub struct Assemble {
    pub sn: u32,
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub pages: u32,
    pub first_seen: Instant,
    fragments: BTreeMap<u32, Packet>,
}

impl Assemble {
    pub fn new(pack: Packet, source: SocketAddr, destination: SocketAddr) -> Self {
        let mut fragments = BTreeMap::new();
        let head = pack.head;
        fragments.insert(head.offset, pack);
        Self {
            sn: head.sn,
            source,
            destination,
            pages: head.pages,
            first_seen: Instant::now(),
            fragments,
        }
    }

    /// Insert one fragment; duplicates are discarded (first wins) and
    /// reported as `false`
    pub fn insert(&mut self, pack: Packet) -> bool {
        debug_assert_eq!(pack.head.sn, self.sn);
        let offset = pack.head.offset;
        if self.fragments.contains_key(&offset) {
            return false;
        }
        self.fragments.insert(offset, pack);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.fragments.len() as u32 >= self.pages
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.first_seen) >= timeout
    }

    /// Fragments collected so far, in offset order
    pub fn take_fragments(self) -> Vec<Packet> {
        self.fragments.into_values().collect()
    }

    /// Join a complete set back into one `Message` packet
    pub fn assemble(self) -> Result<Packet> {
        let fragments: Vec<Packet> = self.fragments.into_values().collect();
        Packet::assemble(&fragments)
    }
}
