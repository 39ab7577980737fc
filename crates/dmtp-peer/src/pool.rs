//! Task pools
//!
//! The dispatch loop is the sole consumer of all three queues; callers
//! and the socket loop only produce. [`MemPool`] is the in-memory
//! implementation; the [`Pool`] trait is the seam the engine depends on.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use dmtp_core::packet::{Packet, PacketType};

use crate::task::{Arrival, Assemble, Departure, ASSEMBLE_EXPIRES};

/// Queue operations the peer engine depends on
pub trait Pool: Send + Sync {
    /// Queue one received datagram
    fn append_arrival(&self, arrival: Arrival);

    /// Pop the oldest arrival, FIFO
    fn shift_first_arrival(&self) -> Option<Arrival>;

    fn count_arrivals(&self) -> usize;

    /// Store a departure, consuming one transmission attempt; `false`
    /// when the retry budget is already spent (the task is dropped)
    fn append_departure(&self, task: Departure) -> bool;

    /// Remove and return the departure whose retry timer expired
    /// longest ago
    fn shift_expired_departure(&self) -> Option<Departure>;

    /// Process an acknowledgement; `true` when it finished a departure
    fn delete_departure(&self, pack: &Packet, source: SocketAddr, destination: SocketAddr)
        -> bool;

    /// Add a fragment to its reassembly slot; returns the whole message
    /// once every page is present
    fn insert_fragment(
        &self,
        pack: Packet,
        source: SocketAddr,
        destination: SocketAddr,
    ) -> Option<Packet>;

    /// Remove and return the reassembly slots that went stale
    fn discard_fragments(&self) -> Vec<Assemble>;
}

/// In-memory pool
pub struct MemPool {
    arrivals: Mutex<VecDeque<Arrival>>,
    departures: Mutex<Vec<Departure>>,
    assembling: Mutex<HashMap<(u32, SocketAddr), Assemble>>,
    assemble_expires: Duration,
}

impl Default for MemPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemPool {
    pub fn new() -> Self {
        Self::with_assemble_expires(ASSEMBLE_EXPIRES)
    }

    pub fn with_assemble_expires(assemble_expires: Duration) -> Self {
        Self {
            arrivals: Mutex::new(VecDeque::new()),
            departures: Mutex::new(Vec::new()),
            assembling: Mutex::new(HashMap::new()),
            assemble_expires,
        }
    }
}

impl Pool for MemPool {
    fn append_arrival(&self, arrival: Arrival) {
        self.arrivals.lock().push_back(arrival);
    }

    fn shift_first_arrival(&self) -> Option<Arrival> {
        self.arrivals.lock().pop_front()
    }

    fn count_arrivals(&self) -> usize {
        self.arrivals.lock().len()
    }

    fn append_departure(&self, mut task: Departure) -> bool {
        if !task.consume_try(Instant::now()) {
            return false;
        }
        self.departures.lock().push(task);
        true
    }

    fn shift_expired_departure(&self) -> Option<Departure> {
        let now = Instant::now();
        let mut departures = self.departures.lock();
        let index = departures
            .iter()
            .enumerate()
            .filter(|(_, task)| task.is_expired(now))
            .min_by_key(|(_, task)| task.next_try())
            .map(|(index, _)| index)?;
        Some(departures.swap_remove(index))
    }

    fn delete_departure(&self, pack: &Packet, source: SocketAddr, _destination: SocketAddr) -> bool {
        let head = pack.head;
        let wanted = match head.kind {
            PacketType::CommandRespond => PacketType::Command,
            PacketType::MessageRespond => PacketType::Message,
            _ => return false,
        };
        let mut departures = self.departures.lock();
        let index = match departures
            .iter()
            .position(|task| task.sn == head.sn && task.kind == wanted && task.destination == source)
        {
            Some(index) => index,
            None => return false,
        };
        // a fragment acknowledgement carries pages ‖ offset ‖ "OK" and
        // retires one page; a plain "OK" finishes the whole task
        if head.kind == PacketType::MessageRespond && pack.body.len() >= 10 {
            let pages = u32::from_be_bytes(pack.body[0..4].try_into().unwrap());
            let offset = u32::from_be_bytes(pack.body[4..8].try_into().unwrap());
            let task = &mut departures[index];
            task.remove_page(pages, offset);
            if !task.packets.is_empty() {
                return false;
            }
        }
        departures.swap_remove(index);
        true
    }

    fn insert_fragment(
        &self,
        pack: Packet,
        source: SocketAddr,
        destination: SocketAddr,
    ) -> Option<Packet> {
        let key = (pack.head.sn, source);
        let mut assembling = self.assembling.lock();
        let slot = assembling
            .entry(key)
            .or_insert_with(|| Assemble::new(pack.clone(), source, destination));
        // the entry call may have consumed the first fragment; a repeat
        // insert of the same offset is a no-op (first wins)
        slot.insert(pack);
        if !slot.is_complete() {
            return None;
        }
        let slot = assembling.remove(&key).unwrap();
        match slot.assemble() {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("failed to assemble fragment set: {}", e);
                None
            }
        }
    }

    fn discard_fragments(&self) -> Vec<Assemble> {
        let now = Instant::now();
        let mut assembling = self.assembling.lock();
        let stale: Vec<(u32, SocketAddr)> = assembling
            .iter()
            .filter(|(_, slot)| slot.is_expired(now, self.assemble_expires))
            .map(|(key, _)| *key)
            .collect();
        stale
            .into_iter()
            .filter_map(|key| assembling.remove(&key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn respond(kind: PacketType, sn: u32, body: &[u8]) -> Packet {
        Packet::new(kind, sn, 1, 0, Bytes::copy_from_slice(body))
    }

    #[test]
    fn test_arrivals_are_fifo() {
        let pool = MemPool::new();
        for index in 0..3u8 {
            pool.append_arrival(Arrival {
                payload: Bytes::copy_from_slice(&[index]),
                source: addr(1),
                destination: addr(2),
            });
        }
        assert_eq!(pool.count_arrivals(), 3);
        for index in 0..3u8 {
            assert_eq!(pool.shift_first_arrival().unwrap().payload[0], index);
        }
        assert!(pool.shift_first_arrival().is_none());
    }

    #[test]
    fn test_departure_not_expired_before_interval() {
        let pool = MemPool::new();
        let packets = Packet::create(PacketType::Command, Some(42), Bytes::from_static(b"hi"));
        assert!(pool.append_departure(Departure::new(packets, addr(1), addr(2))));
        // the 2-second retry gap has not elapsed
        assert!(pool.shift_expired_departure().is_none());
    }

    #[test]
    fn test_delete_departure_by_respond_sn() {
        let pool = MemPool::new();
        let remote = addr(1);
        let packets = Packet::create(PacketType::Command, Some(42), Bytes::from_static(b"hi"));
        pool.append_departure(Departure::new(packets, remote, addr(2)));

        // response from the wrong peer does not match
        let ack = respond(PacketType::CommandRespond, 42, b"OK");
        assert!(!pool.delete_departure(&ack, addr(9), addr(2)));
        // matching response finishes the task exactly once
        assert!(pool.delete_departure(&ack, remote, addr(2)));
        assert!(!pool.delete_departure(&ack, remote, addr(2)));
    }

    #[test]
    fn test_fragment_responses_retire_pages_one_by_one() {
        let pool = MemPool::new();
        let remote = addr(1);
        let fragments = Packet::create(PacketType::Message, Some(7), Bytes::from(vec![1u8; 1500]));
        assert_eq!(fragments.len(), 3);
        pool.append_departure(Departure::new(fragments, remote, addr(2)));

        for offset in 0..3u32 {
            let mut body = Vec::new();
            body.extend_from_slice(&3u32.to_be_bytes());
            body.extend_from_slice(&offset.to_be_bytes());
            body.extend_from_slice(b"OK");
            let ack = respond(PacketType::MessageRespond, 7, &body);
            let finished = pool.delete_departure(&ack, remote, addr(2));
            assert_eq!(finished, offset == 2, "offset {offset}");
        }
    }

    #[test]
    fn test_insert_fragments_any_order() {
        let pool = MemPool::new();
        let body = Bytes::from((0..1400u32).map(|i| i as u8).collect::<Vec<u8>>());
        let fragments = Packet::create(PacketType::Message, Some(5), body.clone());

        assert!(pool.insert_fragment(fragments[2].clone(), addr(1), addr(2)).is_none());
        assert!(pool.insert_fragment(fragments[0].clone(), addr(1), addr(2)).is_none());
        // duplicate is idempotent
        assert!(pool.insert_fragment(fragments[0].clone(), addr(1), addr(2)).is_none());

        let whole = pool
            .insert_fragment(fragments[1].clone(), addr(1), addr(2))
            .expect("set is complete");
        assert_eq!(whole.body, body);

        // slot is gone: a late duplicate starts a fresh slot
        assert!(pool.insert_fragment(fragments[0].clone(), addr(1), addr(2)).is_none());
    }

    #[test]
    fn test_fragments_from_different_sources_do_not_mix() {
        let pool = MemPool::new();
        let fragments = Packet::create(PacketType::Message, Some(5), Bytes::from(vec![0u8; 1100]));

        assert!(pool.insert_fragment(fragments[0].clone(), addr(1), addr(2)).is_none());
        assert!(pool.insert_fragment(fragments[1].clone(), addr(3), addr(2)).is_none());
        // source addr(1) still lacks offset 1
        assert!(pool.insert_fragment(fragments[0].clone(), addr(1), addr(2)).is_none());
    }

    #[test]
    fn test_discard_stale_slots() {
        let pool = MemPool::with_assemble_expires(Duration::from_millis(0));
        let fragments = Packet::create(PacketType::Message, Some(5), Bytes::from(vec![0u8; 1100]));
        pool.insert_fragment(fragments[0].clone(), addr(1), addr(2));

        let discarded = pool.discard_fragments();
        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].sn, 5);
        assert!(pool.discard_fragments().is_empty());
    }
}
