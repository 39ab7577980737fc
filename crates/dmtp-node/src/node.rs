//! The DMTP node
//!
//! A node owns one UDP hub and one peer engine and speaks DMTP over
//! them. The same type serves both roles: a node that logs in against a
//! server acts as a client; a node that merely answers `HI`/`CALL`
//! traffic acts as a server. Received datagrams flow hub → pump → peer
//! pool → dispatch loop → this node's delegate implementations.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use dmtp_core::packet::Packet;
use dmtp_core::{time, Command, Location, Message};
use dmtp_peer::{Peer, PeerConfig, PeerDelegate};
use dmtp_stun::NatType;
use dmtp_transport::{Connection, ConnectionDelegate, ConnectionStatus, HubConfig, UdpHub};

use crate::directory::ContactManager;
use crate::error::{NodeError, Result};
use crate::session::Session;
use crate::traits::{LocationDelegate, NodeDelegate, SignatureProvider};

/// Pause between empty sweeps of the receive cache
const PUMP_INTERVAL: Duration = Duration::from_millis(20);

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub hub: HubConfig,
    pub peer: PeerConfig,
    /// Cadence of ping/purge sweeps over tracked connections
    pub heartbeat_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            peer: PeerConfig::default(),
            heartbeat_interval: Duration::from_secs(2),
        }
    }
}

/// One DMTP endpoint over one UDP socket
pub struct Node {
    hub: Arc<UdpHub>,
    peer: Arc<Peer>,
    directory: Arc<ContactManager>,
    provider: Arc<dyn SignatureProvider>,
    config: NodeConfig,
    identifier: RwLock<Option<String>>,
    server_address: RwLock<Option<SocketAddr>>,
    nat: RwLock<NatType>,
    delegate: Mutex<Weak<dyn NodeDelegate>>,
    running: AtomicBool,
}

impl Node {
    /// Bind a node with default configuration
    pub async fn open(bind: &str, provider: Arc<dyn SignatureProvider>) -> Result<Arc<Self>> {
        Self::open_with(bind, provider, NodeConfig::default()).await
    }

    /// Bind a node with explicit configuration
    pub async fn open_with(
        bind: &str,
        provider: Arc<dyn SignatureProvider>,
        config: NodeConfig,
    ) -> Result<Arc<Self>> {
        let hub = UdpHub::bind_with_config(bind, config.hub.clone()).await?;
        let peer = Peer::with_config(config.peer.clone());
        let directory = Arc::new(ContactManager::new(provider.clone()));
        Ok(Arc::new(Self {
            hub,
            peer,
            directory,
            provider,
            config,
            identifier: RwLock::new(None),
            server_address: RwLock::new(None),
            nat: RwLock::new(NatType::Unknown),
            delegate: Mutex::new(Weak::<NullNodeDelegate>::new()),
            running: AtomicBool::new(false),
        }))
    }

    pub fn hub(&self) -> &Arc<UdpHub> {
        &self.hub
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    pub fn directory(&self) -> &Arc<ContactManager> {
        &self.directory
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.hub.local_addr()
    }

    pub fn identifier(&self) -> Option<String> {
        self.identifier.read().clone()
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        *self.server_address.read()
    }

    pub fn nat(&self) -> NatType {
        *self.nat.read()
    }

    pub fn set_nat(&self, nat: NatType) {
        *self.nat.write() = nat;
    }

    /// Replace the application delegate; only a weak handle is kept
    pub fn set_delegate(&self, delegate: &Arc<dyn NodeDelegate>) {
        *self.delegate.lock() = Arc::downgrade(delegate);
    }

    fn delegate(&self) -> Option<Arc<dyn NodeDelegate>> {
        self.delegate.lock().upgrade()
    }

    //
    //  Lifecycle
    //

    /// Wire the delegates and start the workers: receive loop, pump,
    /// dispatch loop, heartbeat
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let peer_delegate: Arc<dyn PeerDelegate> = self.clone();
        self.peer.set_delegate(&peer_delegate);
        let conn_delegate: Arc<dyn ConnectionDelegate> = self.clone();
        self.hub.set_delegate(&conn_delegate);

        self.hub.start();
        self.peer.start();
        self.hub.start_heartbeat(self.config.heartbeat_interval);

        let node = self.clone();
        tokio::spawn(async move {
            node.pump_loop().await;
        });
        info!("node up on {}", self.local_addr());
    }

    /// Stop the workers in reverse construction order
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.peer.close();
        self.hub.close();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Move cached datagrams into the peer's arrival queue
    async fn pump_loop(&self) {
        while self.is_running() {
            let mut moved = false;
            while let Some(cargo) = self.hub.receive() {
                self.peer
                    .append_arrival(cargo.data, cargo.source, cargo.destination);
                moved = true;
            }
            if !moved {
                tokio::time::sleep(PUMP_INTERVAL).await;
            }
        }
    }

    //
    //  Client operations
    //

    /// Adopt an identity and greet a server
    pub async fn login(&self, identifier: &str, server: SocketAddr) {
        *self.identifier.write() = Some(identifier.to_owned());
        *self.server_address.write() = Some(server);
        self.hub.connect(server);
        self.say_hello(server).await;
    }

    /// Retract this node's signed location and forget the identity
    pub async fn logout(&self) -> Result<()> {
        let identifier = self.identifier().ok_or(NodeError::NotLoggedIn)?;
        let server = self.server_address().ok_or(NodeError::NotLoggedIn)?;
        if let Some(mine) = self.directory.contact(&identifier).any_location() {
            self.send_command(Command::Bye(mine), server).await;
        }
        *self.identifier.write() = None;
        Ok(())
    }

    /// Greet a destination with the freshest signed location we hold, or
    /// a bare `HI` while unsigned
    pub async fn say_hello(&self, destination: SocketAddr) -> bool {
        let identifier = match self.identifier() {
            Some(identifier) => identifier,
            None => return false,
        };
        let command = match self.directory.contact(&identifier).any_location() {
            Some(location) if location.signature.is_some() => Command::Hello(location),
            _ => Command::hello(&identifier),
        };
        self.send_command(command, destination).await;
        true
    }

    /// Ask the server where a peer is reachable
    pub async fn call(&self, identifier: &str) -> bool {
        let server = match self.server_address() {
            Some(server) => server,
            None => return false,
        };
        self.send_command(Command::call(identifier), server).await;
        true
    }

    /// Encode and send one command; returns the packet sequence number
    pub async fn send_command(&self, command: Command, destination: SocketAddr) -> u32 {
        self.peer
            .send_command(command.encode(), destination, self.local_addr())
            .await
    }

    /// Sessions of a receiver that are live right now: for each stored
    /// location, the source address wins over the mapped one
    pub fn sessions(&self, receiver: &str) -> Vec<Session> {
        let alive = |address: Option<SocketAddr>| {
            address.filter(|address| {
                self.hub
                    .connection(*address)
                    .map(|conn| conn.is_connected())
                    .unwrap_or(false)
            })
        };
        self.directory
            .get_locations(receiver)
            .into_iter()
            .filter_map(|location| {
                alive(location.source)
                    .or_else(|| alive(location.mapped))
                    .map(|address| Session::new(location, address))
            })
            .collect()
    }

    /// Send an application message to every live session of `receiver`.
    /// Without one, ask the server to introduce us and report `false`.
    pub async fn send_message(&self, receiver: &str, content: Bytes) -> bool {
        let sender = match self.identifier() {
            Some(sender) => sender,
            None => return false,
        };
        let sessions = self.sessions(receiver);
        if sessions.is_empty() {
            debug!("no live session for {}, calling", receiver);
            self.call(receiver).await;
            return false;
        }
        let message = Message::new(&sender, receiver, time::now(), content);
        let body = message.encode();
        for session in sessions {
            self.peer
                .send_message(body.clone(), session.address, self.local_addr())
                .await;
        }
        true
    }

    //
    //  Command processing
    //

    async fn process_command(&self, command: &Command, source: SocketAddr) -> bool {
        debug!("command from {}: {:?}", source, command);
        match command {
            Command::Hello(location) => self.process_hello(location, source).await,
            Command::Sign(location) => self.process_sign(location).await,
            Command::Call { identifier } => self.process_call(identifier, source).await,
            Command::From(location) => self.process_from(location).await,
            Command::Bye(location) => self.process_bye(location),
        }
    }

    /// A signed `HI` gets stored; an unsigned greeting gets a `SIGN`
    /// back, carrying the address we observed
    async fn process_hello(&self, location: &Location, source: SocketAddr) -> bool {
        if location.signature.is_some() && location.mapped.is_some() {
            return self.directory.store_location(location.clone());
        }
        let mut advised = Location::for_id(&location.identifier);
        advised.mapped = Some(source);
        advised.timestamp = time::now();
        self.send_command(Command::Sign(advised), source).await;
        true
    }

    /// The server reported our reflexive address: complete the record,
    /// sign it, store it, and repeat the greeting signed
    async fn process_sign(&self, location: &Location) -> bool {
        match self.identifier() {
            Some(identifier) if identifier == location.identifier => {}
            _ => return false,
        }
        let mut mine = location.clone();
        mine.source = Some(self.local_addr());
        if mine.timestamp == 0 {
            mine.timestamp = time::now();
        }
        mine.nat = Some(self.nat().to_string());
        let data = match mine.sign_bytes() {
            Some(data) => data,
            None => return false,
        };
        mine.signature = Some(self.provider.sign(&data));
        if !self.directory.store_location(mine) {
            return false;
        }
        if let Some(server) = self.server_address() {
            self.say_hello(server).await;
        }
        true
    }

    /// Introduce caller and callee to each other so both can punch
    async fn process_call(&self, identifier: &str, source: SocketAddr) -> bool {
        let locations = self.directory.get_locations(identifier);
        if locations.is_empty() {
            // receiver offline: a bare identifier says so
            self.send_command(Command::From(Location::for_id(identifier)), source)
                .await;
            return true;
        }
        let caller = self.directory.location_for(source);
        for location in locations {
            let callee_at = location.mapped.or(location.source);
            self.send_command(Command::From(location), source).await;
            if let (Some(caller), Some(address)) = (&caller, callee_at) {
                self.send_command(Command::From(caller.clone()), address).await;
            }
        }
        true
    }

    /// The server advised a peer's location: remember it and punch a
    /// hole by greeting every address on it
    async fn process_from(&self, location: &Location) -> bool {
        if location.source.is_none() && location.mapped.is_none() {
            debug!("{} is offline", location.identifier);
            return true;
        }
        let stored = self.directory.store_location(location.clone());
        let mut greeted = None;
        for address in [location.source, location.mapped].into_iter().flatten() {
            if greeted == Some(address) {
                continue;
            }
            self.hub.connect(address);
            self.say_hello(address).await;
            greeted = Some(address);
        }
        stored
    }

    fn process_bye(&self, location: &Location) -> bool {
        self.directory.clear_location(location)
    }
}

//
//  Peer delegate: the engine drives the node
//

#[async_trait]
impl PeerDelegate for Node {
    async fn send_data(
        &self,
        data: Bytes,
        destination: SocketAddr,
        _source: SocketAddr,
    ) -> std::io::Result<usize> {
        self.hub.send(&data, destination).await
    }

    async fn on_received_command(
        &self,
        body: Bytes,
        source: SocketAddr,
        _destination: SocketAddr,
    ) -> bool {
        let commands = Command::decode_all(&body);
        if commands.is_empty() {
            return false;
        }
        let mut ok = true;
        for command in &commands {
            ok &= self.process_command(command, source).await;
            if let Some(delegate) = self.delegate() {
                ok &= delegate.on_command(command, source).await;
            }
        }
        ok
    }

    async fn on_received_message(
        &self,
        body: Bytes,
        source: SocketAddr,
        _destination: SocketAddr,
    ) -> bool {
        let message = match Message::decode(&body) {
            Ok(message) => message,
            Err(e) => {
                debug!("undecodable message from {}: {}", source, e);
                return false;
            }
        };
        if let Some(delegate) = self.delegate() {
            delegate.on_message(message, source).await;
        }
        true
    }

    async fn check_fragment(
        &self,
        _pack: &Packet,
        _source: SocketAddr,
        _destination: SocketAddr,
    ) -> bool {
        true
    }

    async fn on_send_command_timeout(&self, sn: u32, remote: SocketAddr, _local: SocketAddr) {
        warn!("command {} to {} timed out", sn, remote);
    }

    async fn on_send_message_timeout(&self, sn: u32, remote: SocketAddr, _local: SocketAddr) {
        warn!("message {} to {} timed out", sn, remote);
    }

    async fn recycle_fragments(
        &self,
        fragments: Vec<Packet>,
        source: SocketAddr,
        _destination: SocketAddr,
    ) {
        debug!(
            "dropping {} stale fragments from {}",
            fragments.len(),
            source
        );
    }
}

//
//  Connection delegate: liveness bookkeeping
//

#[async_trait]
impl ConnectionDelegate for Node {
    async fn on_connection_status_changed(
        &self,
        conn: &Arc<Connection>,
        old: ConnectionStatus,
        new: ConnectionStatus,
    ) {
        debug!(
            "connection {}: {:?} -> {:?}",
            conn.remote_address, old, new
        );
        if new == ConnectionStatus::Error {
            // forget locations that only this connection vouched for
            self.directory.purge(Some(&self.hub));
        }
    }

    async fn on_connection_received_data(&self, _conn: &Arc<Connection>) {}
}

/// Placeholder for the initial empty weak delegate slot
struct NullNodeDelegate;

#[async_trait]
impl NodeDelegate for NullNodeDelegate {
    async fn on_message(&self, _message: Message, _source: SocketAddr) {}
}
