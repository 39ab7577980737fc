//! Per-identifier location lists
//!
//! Each contact keeps its stored locations ordered by signing time,
//! oldest first. Writers restructure under an exclusive lock; readers
//! get snapshots.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use dmtp_core::time::{self, Timestamp};
use dmtp_core::Location;
use dmtp_transport::UdpHub;

use crate::traits::SignatureProvider;

/// Age after which an unrefreshed location stops being trusted
pub const LOCATION_EXPIRES: Timestamp = 60 * 60 * 24;

/// One contact and its signed locations
pub struct Contact {
    pub identifier: String,
    /// Ascending by timestamp
    locations: RwLock<Vec<Location>>,
}

impl Contact {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_owned(),
            locations: RwLock::new(Vec::new()),
        }
    }

    /// Required fields plus a verifiable signature
    fn verify(location: &Location, provider: &dyn SignatureProvider) -> bool {
        if location.source.is_none() || location.timestamp == 0 {
            return false;
        }
        let data = match location.sign_bytes() {
            Some(data) => data,
            None => return false,
        };
        match &location.signature {
            Some(signature) => provider.verify(&data, signature),
            None => false,
        }
    }

    /// Store a verified location, replacing older records for the same
    /// source/mapped pair. A record older than what is already stored
    /// for that pair is rejected.
    pub fn store_location(&self, location: Location, provider: &dyn SignatureProvider) -> bool {
        if !Self::verify(&location, provider) {
            return false;
        }
        let mut locations = self.locations.write();
        for index in (0..locations.len()).rev() {
            let item = &locations[index];
            if item.source != location.source || item.mapped != location.mapped {
                continue;
            }
            if location.timestamp < item.timestamp {
                return false;
            }
            // replace the older record for this address pair
            locations.remove(index);
        }
        let position = locations
            .iter()
            .rposition(|item| item.timestamp <= location.timestamp)
            .map(|index| index + 1)
            .unwrap_or(0);
        locations.insert(position, location);
        true
    }

    /// Remove every record matching the location's source/mapped pair
    pub fn clear_location(&self, location: &Location, provider: &dyn SignatureProvider) -> bool {
        if !Self::verify(location, provider) {
            return false;
        }
        let mut locations = self.locations.write();
        let before = locations.len();
        locations
            .retain(|item| item.source != location.source || item.mapped != location.mapped);
        before != locations.len()
    }

    /// The most recently signed location, if any
    pub fn any_location(&self) -> Option<Location> {
        self.locations.read().last().cloned()
    }

    /// All locations, newest first
    pub fn all_locations(&self) -> Vec<Location> {
        self.locations.read().iter().rev().cloned().collect()
    }

    /// The newest location reachable at `address` (source or mapped)
    pub fn location_for(&self, address: SocketAddr) -> Option<Location> {
        self.locations
            .read()
            .iter()
            .rev()
            .find(|item| item.source == Some(address) || item.mapped == Some(address))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.read().is_empty()
    }

    fn is_expired(location: &Location, hub: Option<&Arc<UdpHub>>) -> bool {
        let hub = match hub {
            // no connection tracker at hand: fall back to the clock
            None => {
                return location.timestamp == 0
                    || time::now() > location.timestamp + LOCATION_EXPIRES
            }
            Some(hub) => hub,
        };
        let alive = |address: Option<SocketAddr>| {
            address
                .and_then(|address| hub.connection(address))
                .map(|conn| !conn.is_error())
                .unwrap_or(false)
        };
        !alive(location.source) && !alive(location.mapped)
    }

    /// Drop locations that expired (server side) or whose connections
    /// died (client side); returns how many were removed
    pub fn purge(&self, hub: Option<&Arc<UdpHub>>) -> usize {
        let mut locations = self.locations.write();
        let before = locations.len();
        locations.retain(|item| !Self::is_expired(item, hub));
        before - locations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::InsecureSigner;
    use bytes::Bytes;

    fn location(source: &str, mapped: &str, timestamp: Timestamp) -> Location {
        Location {
            identifier: "alice".into(),
            source: Some(source.parse().unwrap()),
            mapped: Some(mapped.parse().unwrap()),
            relayed: None,
            timestamp,
            signature: Some(Bytes::from_static(b"sig")),
            nat: None,
        }
    }

    #[test]
    fn test_store_keeps_timestamps_ascending() {
        let contact = Contact::new("alice");
        let signer = InsecureSigner;
        assert!(contact.store_location(location("10.0.0.1:1", "1.2.3.4:1", 300), &signer));
        assert!(contact.store_location(location("10.0.0.2:2", "1.2.3.4:2", 100), &signer));
        assert!(contact.store_location(location("10.0.0.3:3", "1.2.3.4:3", 200), &signer));

        let stored: Vec<Timestamp> = contact
            .all_locations()
            .iter()
            .map(|item| item.timestamp)
            .collect();
        // newest first
        assert_eq!(stored, vec![300, 200, 100]);
    }

    #[test]
    fn test_stale_update_for_same_pair_rejected() {
        let contact = Contact::new("alice");
        let signer = InsecureSigner;
        assert!(contact.store_location(location("10.0.0.1:1", "1.2.3.4:1", 200), &signer));
        // same pair, older stamp
        assert!(!contact.store_location(location("10.0.0.1:1", "1.2.3.4:1", 100), &signer));
        // same pair, newer stamp replaces instead of duplicating
        assert!(contact.store_location(location("10.0.0.1:1", "1.2.3.4:1", 300), &signer));
        assert_eq!(contact.all_locations().len(), 1);
        assert_eq!(contact.any_location().unwrap().timestamp, 300);
    }

    #[test]
    fn test_unsigned_or_incomplete_records_rejected() {
        let contact = Contact::new("alice");
        let signer = InsecureSigner;

        let mut unsigned = location("10.0.0.1:1", "1.2.3.4:1", 100);
        unsigned.signature = None;
        assert!(!contact.store_location(unsigned, &signer));

        let mut sourceless = location("10.0.0.1:1", "1.2.3.4:1", 100);
        sourceless.source = None;
        assert!(!contact.store_location(sourceless, &signer));

        let mut stampless = location("10.0.0.1:1", "1.2.3.4:1", 100);
        stampless.timestamp = 0;
        assert!(!contact.store_location(stampless, &signer));
    }

    #[test]
    fn test_clear_removes_the_pair() {
        let contact = Contact::new("alice");
        let signer = InsecureSigner;
        contact.store_location(location("10.0.0.1:1", "1.2.3.4:1", 100), &signer);
        contact.store_location(location("10.0.0.2:2", "1.2.3.4:2", 200), &signer);

        assert!(contact.clear_location(&location("10.0.0.1:1", "1.2.3.4:1", 300), &signer));
        assert_eq!(contact.all_locations().len(), 1);
        assert!(!contact.clear_location(&location("10.0.0.1:1", "1.2.3.4:1", 300), &signer));
    }

    #[test]
    fn test_purge_by_clock_without_tracker() {
        let contact = Contact::new("alice");
        let signer = InsecureSigner;
        let now = time::now();
        contact.store_location(location("10.0.0.1:1", "1.2.3.4:1", now.saturating_sub(2 * LOCATION_EXPIRES)), &signer);
        contact.store_location(location("10.0.0.2:2", "1.2.3.4:2", now), &signer);

        assert_eq!(contact.purge(None), 1);
        assert_eq!(contact.all_locations().len(), 1);
        assert_eq!(contact.any_location().unwrap().timestamp, now);
    }

    #[test]
    fn test_location_for_address() {
        let contact = Contact::new("alice");
        let signer = InsecureSigner;
        contact.store_location(location("10.0.0.1:1", "1.2.3.4:1", 100), &signer);

        assert!(contact.location_for("10.0.0.1:1".parse().unwrap()).is_some());
        assert!(contact.location_for("1.2.3.4:1".parse().unwrap()).is_some());
        assert!(contact.location_for("9.9.9.9:9".parse().unwrap()).is_none());
    }
}
