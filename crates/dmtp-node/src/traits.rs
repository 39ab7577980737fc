//! Node delegate traits

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use dmtp_core::{Command, Location, Message};

/// External signing seam for location records.
///
/// The node never interprets key material; it hands over the canonical
/// sign bytes (`source ‖ mapped ‖ relayed ‖ timestamp`) and stores
/// whatever comes back.
pub trait SignatureProvider: Send + Sync {
    fn sign(&self, data: &[u8]) -> Bytes;
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
}

/// A provider that accepts every signature, mirroring deployments that
/// have not wired a real key store yet. Fine for demos and tests, not
/// for production.
pub struct InsecureSigner;

impl SignatureProvider for InsecureSigner {
    fn sign(&self, _data: &[u8]) -> Bytes {
        Bytes::from_static(b"insecure")
    }

    fn verify(&self, _data: &[u8], _signature: &[u8]) -> bool {
        true
    }
}

/// Storage seam for signed locations
pub trait LocationDelegate: Send + Sync {
    /// Verify and store; `false` on a bad signature, missing required
    /// fields, or a stale timestamp
    fn store_location(&self, location: Location) -> bool;

    /// Verify and remove every record with the same source/mapped pair
    fn clear_location(&self, location: &Location) -> bool;

    /// All stored locations of an identifier, newest first
    fn get_locations(&self, identifier: &str) -> Vec<Location>;
}

/// Application-level callbacks of a node
#[async_trait]
pub trait NodeDelegate: Send + Sync {
    /// A fully assembled application message arrived
    async fn on_message(&self, message: Message, source: SocketAddr);

    /// A command arrived; the node's own handling already ran. Return
    /// `false` to suppress the `"OK"` acknowledgement.
    async fn on_command(&self, _command: &Command, _source: SocketAddr) -> bool {
        true
    }
}
