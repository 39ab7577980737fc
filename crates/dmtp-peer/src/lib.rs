//! DMTP peer engine
//!
//! The MTP reliability layer: per-packet acknowledgement, retransmission
//! on a fixed schedule, and fragment reassembly, driven by one dispatch
//! loop over a task pool.
//!
//! This crate provides:
//! - Arrival, departure, and reassembly tasks ([`task`])
//! - The pool seam and its in-memory implementation ([`pool`])
//! - The dispatch engine ([`peer`]) and its [`PeerDelegate`] callbacks

pub mod peer;
pub mod pool;
pub mod task;
pub mod traits;

pub use peer::{Peer, PeerConfig};
pub use pool::{MemPool, Pool};
pub use task::{Arrival, Assemble, Departure, ASSEMBLE_EXPIRES, MAX_RETRIES, RETRY_INTERVAL};
pub use traits::PeerDelegate;
