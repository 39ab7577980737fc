//! Peer delegate trait

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use dmtp_core::packet::Packet;

/// Callbacks and services the embedder provides to the peer engine.
///
/// The engine never touches a socket itself: [`send_data`] performs the
/// actual OS-level send. The engine holds only a weak back-reference to
/// its delegate.
///
/// [`send_data`]: PeerDelegate::send_data
#[async_trait]
pub trait PeerDelegate: Send + Sync {
    /// Send raw bytes from `source` to `destination`; returns how many
    /// bytes went out. An error leaves the departure pending for retry.
    async fn send_data(
        &self,
        data: Bytes,
        destination: SocketAddr,
        source: SocketAddr,
    ) -> std::io::Result<usize>;

    /// A `Command` body arrived; `true` acknowledges it with an `"OK"`
    /// response
    async fn on_received_command(
        &self,
        body: Bytes,
        source: SocketAddr,
        destination: SocketAddr,
    ) -> bool;

    /// A `Message` body arrived (assembled when it was fragmented);
    /// `true` acknowledges it
    async fn on_received_message(
        &self,
        body: Bytes,
        source: SocketAddr,
        destination: SocketAddr,
    ) -> bool;

    /// Fragment admission policy, e.g. a blacklist; rejected fragments
    /// are neither pooled nor acknowledged
    async fn check_fragment(
        &self,
        _pack: &Packet,
        _source: SocketAddr,
        _destination: SocketAddr,
    ) -> bool {
        true
    }

    /// The peer acknowledged a command departure
    async fn on_send_command_success(&self, _sn: u32, _remote: SocketAddr, _local: SocketAddr) {}

    /// A command departure spent its retry budget unacknowledged
    async fn on_send_command_timeout(&self, _sn: u32, _remote: SocketAddr, _local: SocketAddr) {}

    /// The peer acknowledged every packet of a message departure
    async fn on_send_message_success(&self, _sn: u32, _remote: SocketAddr, _local: SocketAddr) {}

    /// A message departure spent its retry budget unacknowledged
    async fn on_send_message_timeout(&self, _sn: u32, _remote: SocketAddr, _local: SocketAddr) {}

    /// An incomplete fragment set went stale; the embedder may archive
    /// or drop it
    async fn recycle_fragments(
        &self,
        _fragments: Vec<Packet>,
        _source: SocketAddr,
        _destination: SocketAddr,
    ) {
    }
}
