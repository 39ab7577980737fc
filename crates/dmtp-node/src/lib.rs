//! DMTP node
//!
//! The application layer of the stack: identity login against a server,
//! the contact directory of signed locations, hole-punch introductions,
//! and message routing over live sessions.
//!
//! This crate provides:
//! - The [`Node`] wiring one UDP hub and one peer engine into a DMTP
//!   endpoint ([`node`])
//! - Contacts and the in-memory directory ([`contact`], [`directory`])
//! - Reflexive address discovery over STUN ([`probe`])
//! - The delegate seams the embedder implements ([`traits`])

pub mod contact;
pub mod directory;
pub mod error;
pub mod node;
pub mod probe;
pub mod session;
pub mod traits;

pub use contact::{Contact, LOCATION_EXPIRES};
pub use directory::ContactManager;
pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig};
pub use probe::discover_mapped_address;
pub use session::Session;
pub use traits::{InsecureSigner, LocationDelegate, NodeDelegate, SignatureProvider};
