//! Reachable peer sessions
//!
//! A session pairs a stored location with the concrete address a live
//! connection exists for; messages go to sessions, not to raw locations.

use std::fmt;
use std::net::SocketAddr;

use dmtp_core::Location;

/// One reachable address of a peer
#[derive(Debug, Clone)]
pub struct Session {
    pub location: Location,
    pub address: SocketAddr,
}

impl Session {
    pub fn new(location: Location, address: SocketAddr) -> Self {
        Self { location, address }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.location.identifier, self.address)
    }
}
