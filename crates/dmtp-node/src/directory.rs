//! In-memory contact directory
//!
//! Identifier → contact map answering `CALL`/`FROM` lookups. The map is
//! concurrent; each contact serializes its own restructuring.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use dmtp_core::Location;
use dmtp_transport::UdpHub;

use crate::contact::Contact;
use crate::traits::{LocationDelegate, SignatureProvider};

/// Directory of every known contact
pub struct ContactManager {
    contacts: DashMap<String, Arc<Contact>>,
    provider: Arc<dyn SignatureProvider>,
}

impl ContactManager {
    pub fn new(provider: Arc<dyn SignatureProvider>) -> Self {
        Self {
            contacts: DashMap::new(),
            provider,
        }
    }

    /// Fetch or create the contact for an identifier
    pub fn contact(&self, identifier: &str) -> Arc<Contact> {
        self.contacts
            .entry(identifier.to_owned())
            .or_insert_with(|| Arc::new(Contact::new(identifier)))
            .clone()
    }

    /// The newest location stored for any contact reachable at `address`
    pub fn location_for(&self, address: SocketAddr) -> Option<Location> {
        self.contacts
            .iter()
            .find_map(|entry| entry.location_for(address))
    }

    /// Purge every contact and drop the ones left empty
    pub fn purge(&self, hub: Option<&Arc<UdpHub>>) {
        let mut dropped = 0;
        for entry in self.contacts.iter() {
            dropped += entry.purge(hub);
        }
        self.contacts.retain(|_, contact| !contact.is_empty());
        if dropped > 0 {
            debug!("purged {} stale locations", dropped);
        }
    }
}

impl LocationDelegate for ContactManager {
    fn store_location(&self, location: Location) -> bool {
        let contact = self.contact(&location.identifier);
        contact.store_location(location, self.provider.as_ref())
    }

    fn clear_location(&self, location: &Location) -> bool {
        let contact = self.contact(&location.identifier);
        contact.clear_location(location, self.provider.as_ref())
    }

    fn get_locations(&self, identifier: &str) -> Vec<Location> {
        match self.contacts.get(identifier) {
            Some(contact) => contact.all_locations(),
            None => Vec::new(),
        }
    }
}
