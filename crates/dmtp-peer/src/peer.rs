//! Peer dispatch engine
//!
//! One worker loop drains the pool in a fixed order: process every
//! queued arrival, then redo one expired departure, then (only when no
//! departure fired) discard stale fragment sets, and finally rest for
//! 100 ms when nothing at all happened.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use dmtp_core::packet::{Packet, PacketType};

use crate::pool::{MemPool, Pool};
use crate::task::{Arrival, Departure, RETRY_INTERVAL};
use crate::traits::PeerDelegate;

const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Peer engine configuration
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Gap between transmission attempts of one departure
    pub retry_interval: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            retry_interval: RETRY_INTERVAL,
        }
    }
}

/// The MTP peer engine
pub struct Peer {
    pool: Arc<dyn Pool>,
    config: PeerConfig,
    delegate: Mutex<Weak<dyn PeerDelegate>>,
    running: AtomicBool,
}

impl Peer {
    /// A peer over a fresh in-memory pool
    pub fn new() -> Arc<Self> {
        Self::with_pool(Arc::new(MemPool::new()), PeerConfig::default())
    }

    pub fn with_config(config: PeerConfig) -> Arc<Self> {
        Self::with_pool(Arc::new(MemPool::new()), config)
    }

    pub fn with_pool(pool: Arc<dyn Pool>, config: PeerConfig) -> Arc<Self> {
        Arc::new(Self {
            pool,
            config,
            delegate: Mutex::new(Weak::<NullDelegate>::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn pool(&self) -> &Arc<dyn Pool> {
        &self.pool
    }

    /// Replace the delegate; the peer keeps only a weak back-reference
    pub fn set_delegate(&self, delegate: &Arc<dyn PeerDelegate>) {
        *self.delegate.lock() = Arc::downgrade(delegate);
    }

    fn delegate(&self) -> Option<Arc<dyn PeerDelegate>> {
        self.delegate.lock().upgrade()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the dispatch loop
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let peer = self.clone();
        tokio::spawn(async move {
            peer.run_loop().await;
            debug!("peer dispatch loop finished");
        });
    }

    /// Ask the dispatch loop to exit; departures in flight are dropped
    /// without timeout callbacks
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
    }

    async fn run_loop(&self) {
        while self.is_running() {
            let done = self.clean_arrivals().await;
            if let Some(task) = self.pool.shift_expired_departure() {
                // redo this departure
                self.dispatch(task).await;
            } else {
                for slot in self.pool.discard_fragments() {
                    let (source, destination) = (slot.source, slot.destination);
                    if let Some(delegate) = self.delegate() {
                        delegate
                            .recycle_fragments(slot.take_fragments(), source, destination)
                            .await;
                    }
                }
                if done == 0 {
                    // all jobs done, have a rest
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
            }
        }
    }

    /// Dispatch every arrival queued at entry; later enqueues wait for
    /// the next round
    async fn clean_arrivals(&self) -> usize {
        let total = self.pool.count_arrivals();
        let mut done = 0;
        while done < total {
            match self.pool.shift_first_arrival() {
                Some(arrival) => self.handle(arrival).await,
                None => break,
            }
            done += 1;
        }
        done
    }

    /// Feed one received datagram into the engine
    pub fn append_arrival(&self, payload: Bytes, source: SocketAddr, destination: SocketAddr) {
        self.pool.append_arrival(Arrival {
            payload,
            source,
            destination,
        });
    }

    async fn handle(&self, task: Arrival) {
        let pack = match Packet::parse(&task.payload) {
            Ok(pack) => pack,
            Err(e) => {
                // not an MTP datagram; drop silently
                debug!("ignoring malformed datagram from {}: {}", task.source, e);
                return;
            }
        };
        let delegate = match self.delegate() {
            Some(delegate) => delegate,
            None => return,
        };
        let head = pack.head;
        let ok = match head.kind {
            PacketType::CommandRespond => {
                if self
                    .pool
                    .delete_departure(&pack, task.source, task.destination)
                {
                    delegate
                        .on_send_command_success(head.sn, task.source, task.destination)
                        .await;
                }
                return;
            }
            PacketType::MessageRespond => {
                if self
                    .pool
                    .delete_departure(&pack, task.source, task.destination)
                {
                    delegate
                        .on_send_message_success(head.sn, task.source, task.destination)
                        .await;
                }
                return;
            }
            PacketType::Command => {
                delegate
                    .on_received_command(pack.body.clone(), task.source, task.destination)
                    .await
            }
            PacketType::Message => {
                delegate
                    .on_received_message(pack.body.clone(), task.source, task.destination)
                    .await
            }
            PacketType::MessageFragment => {
                let ok = delegate
                    .check_fragment(&pack, task.source, task.destination)
                    .await;
                if ok {
                    if let Some(message) =
                        self.pool
                            .insert_fragment(pack.clone(), task.source, task.destination)
                    {
                        // all fragments received
                        delegate
                            .on_received_message(message.body, task.source, task.destination)
                            .await;
                    }
                }
                ok
            }
        };
        if ok {
            self.respond(&pack, task.source, task.destination).await;
        }
    }

    /// Acknowledge a handled packet straight through the delegate,
    /// bypassing the departure queue
    async fn respond(&self, pack: &Packet, remote: SocketAddr, local: SocketAddr) {
        let head = pack.head;
        let (kind, body) = match head.kind {
            PacketType::Command => (PacketType::CommandRespond, Bytes::from_static(b"OK")),
            PacketType::Message => (PacketType::MessageRespond, Bytes::from_static(b"OK")),
            PacketType::MessageFragment => {
                let mut body = Vec::with_capacity(10);
                body.extend_from_slice(&head.pages.to_be_bytes());
                body.extend_from_slice(&head.offset.to_be_bytes());
                body.extend_from_slice(b"OK");
                (PacketType::MessageRespond, Bytes::from(body))
            }
            // only request types reach here
            other => unreachable!("responding to packet type {other:?}"),
        };
        let response = Packet::new(kind, head.sn, 1, 0, body);
        if let Some(delegate) = self.delegate() {
            if let Err(e) = delegate.send_data(response.encode(), remote, local).await {
                warn!("failed to respond to {}: {}", remote, e);
            }
        }
    }

    /// Store a departure and transmit its packets, or report its death
    async fn dispatch(&self, task: Departure) {
        let delegate = self.delegate();
        let sn = task.sn;
        let kind = task.kind;
        let destination = task.destination;
        let source = task.source;
        let packets = task.packets.clone();
        if self.pool.append_departure(task) {
            let delegate = match delegate {
                Some(delegate) => delegate,
                None => return,
            };
            for pack in packets {
                let data = pack.encode();
                match delegate.send_data(data.clone(), destination, source).await {
                    Ok(sent) if sent == data.len() => {}
                    Ok(sent) => warn!(
                        "short send to {}: {} of {} bytes",
                        destination,
                        sent,
                        data.len()
                    ),
                    // the departure stays pooled; the retry timer covers it
                    Err(e) => warn!("send to {} failed: {}", destination, e),
                }
            }
        } else if let Some(delegate) = delegate {
            // mission failed
            match kind {
                PacketType::Command => {
                    delegate.on_send_command_timeout(sn, destination, source).await
                }
                PacketType::Message => {
                    delegate.on_send_message_timeout(sn, destination, source).await
                }
                other => unreachable!("departure of type {other:?}"),
            }
        }
    }

    //
    //  Sending
    //

    /// Send a command body; returns the allocated sequence number
    pub async fn send_command(
        &self,
        body: Bytes,
        destination: SocketAddr,
        source: SocketAddr,
    ) -> u32 {
        let packets = Packet::create(PacketType::Command, None, body);
        self.send_packets(packets, destination, source).await
    }

    /// Send a message body, fragmenting when it exceeds the datagram
    /// cap; returns the allocated sequence number
    pub async fn send_message(
        &self,
        body: Bytes,
        destination: SocketAddr,
        source: SocketAddr,
    ) -> u32 {
        let packets = Packet::create(PacketType::Message, None, body);
        self.send_packets(packets, destination, source).await
    }

    async fn send_packets(
        &self,
        packets: Vec<Packet>,
        destination: SocketAddr,
        source: SocketAddr,
    ) -> u32 {
        let task = Departure::new(packets, destination, source)
            .with_retry_interval(self.config.retry_interval);
        let sn = task.sn;
        self.dispatch(task).await;
        sn
    }
}

/// Placeholder for the initial empty weak delegate slot
struct NullDelegate;

#[async_trait::async_trait]
impl PeerDelegate for NullDelegate {
    async fn send_data(
        &self,
        _data: Bytes,
        _destination: SocketAddr,
        _source: SocketAddr,
    ) -> std::io::Result<usize> {
        Ok(0)
    }

    async fn on_received_command(
        &self,
        _body: Bytes,
        _source: SocketAddr,
        _destination: SocketAddr,
    ) -> bool {
        false
    }

    async fn on_received_message(
        &self,
        _body: Bytes,
        _source: SocketAddr,
        _destination: SocketAddr,
    ) -> bool {
        false
    }
}
