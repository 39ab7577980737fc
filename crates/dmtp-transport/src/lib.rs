//! DMTP transport
//!
//! UDP socket hub and connection tracking for the DMTP stack.
//!
//! This crate provides:
//! - The datagram socket wrapper with its background receive loop and
//!   bounded receive cache ([`hub`])
//! - Tracked connections with derived liveness status ([`connection`])
//! - `PING`/`PONG` heartbeats and dead-connection purging
//! - The [`ConnectionDelegate`] seam for status callbacks

pub mod connection;
pub mod error;
pub mod hub;
pub mod traits;

pub use connection::{derive_status, Connection, ConnectionStatus, EXPIRES, LONG_EXPIRES};
pub use error::{Result, TransportError};
pub use hub::{Datagram, HubConfig, UdpHub, BUFFER_SIZE, MAX_CACHE_SPACES};
pub use traits::ConnectionDelegate;
