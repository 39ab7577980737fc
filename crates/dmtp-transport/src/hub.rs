//! UDP socket hub
//!
//! One datagram socket plus the set of tracked peer connections. A
//! background task reads datagrams with a short timeout, answers
//! `PING`/`PONG` heartbeats itself, and parks everything else in a
//! bounded FIFO cache for the peer engine to drain. Each cached datagram
//! is at most one UDP payload, so the default cap of ~2M entries bounds
//! the cache at roughly 1 GB.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use dmtp_core::time;

use crate::connection::{Connection, ConnectionStatus};
use crate::error::{Result, TransportError};
use crate::traits::ConnectionDelegate;

/// Max count of cached datagrams before the oldest is dropped
pub const MAX_CACHE_SPACES: usize = 1024 * 1024 * 2;

/// Receive buffer size per datagram
pub const BUFFER_SIZE: usize = 2048;

const PING: &[u8] = b"PING";
const PONG: &[u8] = b"PONG";

/// Blocking window of one receive attempt
const RECV_TIMEOUT: Duration = Duration::from_millis(2);

/// Rest between empty receive attempts
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Receive buffer size
    pub buffer_size: usize,
    /// Cache capacity before drop-oldest kicks in
    pub cache_limit: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer_size: BUFFER_SIZE,
            cache_limit: MAX_CACHE_SPACES,
        }
    }
}

/// One received datagram awaiting dispatch
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Bytes,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// UDP socket wrapper with connection tracking
pub struct UdpHub {
    socket: UdpSocket,
    local_address: SocketAddr,
    config: HubConfig,
    connections: RwLock<Vec<Arc<Connection>>>,
    cache: Mutex<VecDeque<Datagram>>,
    delegate: Mutex<Weak<dyn ConnectionDelegate>>,
    running: AtomicBool,
}

impl UdpHub {
    /// Bind to a local address
    pub async fn bind(addr: &str) -> Result<Arc<Self>> {
        Self::bind_with_config(addr, HubConfig::default()).await
    }

    /// Bind with explicit configuration
    pub async fn bind_with_config(addr: &str, config: HubConfig) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        let local_address = socket.local_addr()?;
        info!("UDP hub bound to {}", local_address);
        Ok(Arc::new(Self {
            socket,
            local_address,
            config,
            connections: RwLock::new(Vec::new()),
            cache: Mutex::new(VecDeque::new()),
            delegate: Mutex::new(Weak::<NullDelegate>::new()),
            running: AtomicBool::new(false),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_address
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Replace the delegate; the hub keeps only a weak back-reference
    pub fn set_delegate(&self, delegate: &Arc<dyn ConnectionDelegate>) {
        *self.delegate.lock() = Arc::downgrade(delegate);
    }

    fn delegate(&self) -> Option<Arc<dyn ConnectionDelegate>> {
        self.delegate.lock().upgrade()
    }

    //
    //  Connections
    //

    /// Look up the tracked connection for a remote address
    pub fn connection(&self, remote: SocketAddr) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .find(|conn| conn.remote_address == remote)
            .cloned()
    }

    /// Track a remote address, keeping it alive with heartbeats
    pub fn connect(&self, remote: SocketAddr) -> Arc<Connection> {
        let mut connections = self.connections.write();
        if let Some(conn) = connections.iter().find(|conn| conn.remote_address == remote) {
            return conn.clone();
        }
        let conn = Arc::new(Connection::new(remote, self.local_address));
        connections.push(conn.clone());
        conn
    }

    /// Stop tracking a remote address
    pub fn disconnect(&self, remote: SocketAddr) -> bool {
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|conn| conn.remote_address != remote);
        before != connections.len()
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().clone()
    }

    /// Recompute the status of one connection and surface the transition
    async fn refresh_status(&self, conn: &Arc<Connection>) {
        if let Some((old, new)) = conn.take_transition(time::now()) {
            debug!(
                "connection {} status: {:?} -> {:?}",
                conn.remote_address, old, new
            );
            if let Some(delegate) = self.delegate() {
                delegate.on_connection_status_changed(conn, old, new).await;
            }
        }
    }

    //
    //  Input/Output
    //

    /// Send data to a remote address; a success refreshes the sent time
    /// of its tracked connection
    pub async fn send(&self, data: &[u8], remote: SocketAddr) -> std::io::Result<usize> {
        let sent = self.socket.send_to(data, remote).await?;
        if let Some(conn) = self.connection(remote) {
            conn.update_sent_time(time::now());
            self.refresh_status(&conn).await;
        }
        Ok(sent)
    }

    /// Pop the oldest cached datagram, non-blocking
    pub fn receive(&self) -> Option<Datagram> {
        self.cache.lock().pop_front()
    }

    /// Count of cached datagrams
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    fn cache_datagram(&self, cargo: Datagram) {
        {
            let mut cache = self.cache.lock();
            if cache.len() >= self.config.cache_limit {
                // backpressure: drop the oldest
                cache.pop_front();
                warn!("receive cache full, dropping oldest datagram");
            }
            cache.push_back(cargo);
        }
    }

    //
    //  Worker
    //

    /// Start the background receive loop
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let hub = self.clone();
        tokio::spawn(async move {
            hub.run_loop().await;
            debug!("receive loop for {} finished", hub.local_address);
        });
    }

    /// Ask the receive loop to exit
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
    }

    async fn run_loop(self: &Arc<Self>) {
        let mut buf = vec![0u8; self.config.buffer_size];
        while self.is_running() {
            let received = tokio::time::timeout(RECV_TIMEOUT, self.socket.recv_from(&mut buf)).await;
            let (len, source) = match received {
                Err(_) => {
                    // received nothing
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                }
                Ok(Err(e)) => {
                    // treat a receive error as silence
                    error!("UDP receive error: {}", e);
                    tokio::time::sleep(IDLE_SLEEP).await;
                    continue;
                }
                Ok(Ok(pair)) => pair,
            };
            if len == 0 {
                continue;
            }
            if let Some(conn) = self.connection(source) {
                conn.update_received_time(time::now());
                self.refresh_status(&conn).await;
            }
            // heartbeats never reach the cache
            if len == 4 {
                if &buf[..4] == PING {
                    if let Err(e) = self.send(PONG, source).await {
                        debug!("failed to answer PING from {}: {}", source, e);
                    }
                    continue;
                }
                if &buf[..4] == PONG {
                    continue;
                }
            }
            self.cache_datagram(Datagram {
                data: Bytes::copy_from_slice(&buf[..len]),
                source,
                destination: self.local_address,
            });
            if let Some(delegate) = self.delegate() {
                if let Some(conn) = self.connection(source) {
                    delegate.on_connection_received_data(&conn).await;
                }
            }
        }
    }

    //
    //  Heartbeat
    //

    /// Refresh every tracked status and `PING` the connections that need
    /// keeping alive
    pub async fn ping(&self) {
        for conn in self.snapshot() {
            self.refresh_status(&conn).await;
            if conn.status().needs_ping() {
                if let Err(e) = self.send(PING, conn.remote_address).await {
                    debug!("heartbeat to {} failed: {}", conn.remote_address, e);
                }
            }
        }
    }

    /// Drop connections that have gone silent for too long
    pub fn purge(&self) -> usize {
        let errors: Vec<SocketAddr> = self
            .snapshot()
            .iter()
            .filter(|conn| conn.status() == ConnectionStatus::Error)
            .map(|conn| conn.remote_address)
            .collect();
        for remote in &errors {
            debug!("purging dead connection {}", remote);
            self.disconnect(*remote);
        }
        errors.len()
    }

    /// Spawn a periodic heartbeat driving [`Self::ping`] and
    /// [`Self::purge`]; it stops when the hub closes
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !hub.is_running() {
                    break;
                }
                hub.ping().await;
                hub.purge();
            }
        });
    }
}

/// Placeholder for the initial empty weak delegate slot
struct NullDelegate;

#[async_trait::async_trait]
impl ConnectionDelegate for NullDelegate {
    async fn on_connection_status_changed(
        &self,
        _conn: &Arc<Connection>,
        _old: ConnectionStatus,
        _new: ConnectionStatus,
    ) {
    }

    async fn on_connection_received_data(&self, _conn: &Arc<Connection>) {}
}
