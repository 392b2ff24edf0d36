use crate::{LocationHandler, SignatureProvider, connection::ConnectionStatus, hub::Hub};

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use ahash::{HashMap, HashMapExt};
use codec::dmtp::Location;
use parking_lot::RwLock;

/// Unsigned or unheard-from records fall out of the directory after a day.
pub const LOCATION_EXPIRES: u32 = 86_400;

/// Seconds since the Unix epoch, as the 4-byte wire timestamps count them.
pub fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

/// Per-identifier list of verified location records, kept ascending by
/// timestamp.
#[derive(Debug, Clone)]
pub struct Contact {
    pub identifier: String,
    pub locations: Vec<Location>,
}

/// The in-memory contact directory.
///
/// Every mutation verifies the record's signature through the provider
/// first; storage additionally requires identifier, source address and
/// timestamp, and refuses records older than what it already holds for the
/// same `(source, mapped)` pair.
pub struct Directory {
    contacts: RwLock<HashMap<String, Contact>>,
    provider: Arc<dyn SignatureProvider>,
}

impl Directory {
    pub fn new(provider: Arc<dyn SignatureProvider>) -> Self {
        Self {
            contacts: RwLock::new(HashMap::with_capacity(255)),
            provider,
        }
    }

    /// All stored contacts, for diagnostics.
    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.read().values().cloned().collect()
    }

    /// The freshest record reachable at an address, used to answer "who is
    /// calling from here".
    pub fn find_by_address(&self, addr: SocketAddr) -> Option<Location> {
        self.contacts
            .read()
            .values()
            .flat_map(|it| it.locations.iter())
            .filter(|it| it.source == Some(addr) || it.mapped == Some(addr))
            .max_by_key(|it| it.timestamp)
            .cloned()
    }

    /// Drop the records that can no longer be trusted to be reachable.
    ///
    /// Without a hub only the timestamp rule applies: a record older than
    /// [`LOCATION_EXPIRES`] goes away. With a hub a record survives iff its
    /// source or mapped address still maps to a connection that is not in
    /// error.
    pub fn purge(&self, hub: Option<&Hub>) {
        let now = unix_time();
        let mut lock = self.contacts.write();

        for contact in lock.values_mut() {
            contact.locations.retain(|location| match hub {
                None => now <= location.timestamp.saturating_add(LOCATION_EXPIRES),
                Some(hub) => {
                    alive(hub, &location.source) || alive(hub, &location.mapped)
                }
            });
        }

        lock.retain(|_, contact| !contact.locations.is_empty());
    }

    fn verify(&self, location: &Location) -> bool {
        match &location.signature {
            Some(signature) => self.provider.verify(&location.signable_bytes(), signature),
            None => false,
        }
    }
}

fn alive(hub: &Hub, addr: &Option<SocketAddr>) -> bool {
    addr.and_then(|it| hub.status_of(it))
        .map(|status| status != ConnectionStatus::Error)
        .unwrap_or(false)
}

fn same_pair(a: &Location, b: &Location) -> bool {
    a.source == b.source && a.mapped == b.mapped
}

impl LocationHandler for Directory {
    fn store_location(&self, location: Location) -> bool {
        if location.identifier.is_empty() || location.source.is_none() || location.timestamp == 0 {
            return false;
        }

        if !self.verify(&location) {
            return false;
        }

        let mut lock = self.contacts.write();
        let contact = lock
            .entry(location.identifier.clone())
            .or_insert_with(|| Contact {
                identifier: location.identifier.clone(),
                locations: Vec::with_capacity(4),
            });

        // A record older than what the pair already has is a replay.
        if contact
            .locations
            .iter()
            .filter(|it| same_pair(it, &location))
            .any(|it| it.timestamp > location.timestamp)
        {
            return false;
        }

        contact.locations.retain(|it| !same_pair(it, &location));

        let index = contact
            .locations
            .iter()
            .position(|it| it.timestamp > location.timestamp)
            .unwrap_or(contact.locations.len());

        contact.locations.insert(index, location);
        true
    }

    fn clear_location(&self, location: &Location) -> bool {
        if !self.verify(location) {
            return false;
        }

        let mut lock = self.contacts.write();
        if let Some(contact) = lock.get_mut(&location.identifier) {
            contact.locations.retain(|it| !same_pair(it, location));
            if contact.locations.is_empty() {
                lock.remove(&location.identifier);
            }
        }

        true
    }

    fn locations_of(&self, identifier: &str) -> Vec<Location> {
        self.contacts
            .read()
            .get(identifier)
            .map(|it| it.locations.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Signs by echoing the input; verification recomputes and compares.
    struct EchoSigner;

    impl SignatureProvider for EchoSigner {
        fn sign(&self, data: &[u8]) -> Vec<u8> {
            data.to_vec()
        }

        fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
            data == signature
        }
    }

    fn signed_location(identifier: &str, port: u16, timestamp: u32) -> Location {
        let mut location = Location::new(identifier, timestamp);
        location.source = Some(format!("192.168.0.5:{}", port).parse().unwrap());
        location.mapped = Some(format!("203.0.113.7:{}", port).parse().unwrap());
        location.signature = Some(EchoSigner.sign(&location.signable_bytes()).into());
        location
    }

    fn directory() -> Directory {
        Directory::new(Arc::new(EchoSigner))
    }

    #[test]
    fn test_store_keeps_timestamps_ascending() {
        let directory = directory();

        assert!(directory.store_location(signed_location("alice", 1000, 300)));
        assert!(directory.store_location(signed_location("alice", 2000, 100)));
        assert!(directory.store_location(signed_location("alice", 3000, 200)));

        let stored = directory.locations_of("alice");
        let stamps: Vec<u32> = stored.iter().map(|it| it.timestamp).collect();
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_store_replaces_same_pair_and_rejects_replays() {
        let directory = directory();

        assert!(directory.store_location(signed_location("alice", 1000, 200)));

        // A newer record for the same pair replaces the old one.
        assert!(directory.store_location(signed_location("alice", 1000, 300)));
        assert_eq!(directory.locations_of("alice").len(), 1);
        assert_eq!(directory.locations_of("alice")[0].timestamp, 300);

        // An older one for the same pair is a replay.
        assert!(!directory.store_location(signed_location("alice", 1000, 250)));
        assert_eq!(directory.locations_of("alice")[0].timestamp, 300);
    }

    #[test]
    fn test_store_requires_signature_and_fields() {
        let directory = directory();

        // Unsigned.
        let mut location = signed_location("alice", 1000, 200);
        location.signature = None;
        assert!(!directory.store_location(location));

        // A broken signature.
        let mut location = signed_location("alice", 1000, 200);
        location.signature = Some(vec![0u8; 4].into());
        assert!(!directory.store_location(location));

        // No source address.
        let mut location = signed_location("alice", 1000, 200);
        location.source = None;
        location.signature = Some(EchoSigner.sign(&location.signable_bytes()).into());
        assert!(!directory.store_location(location));

        assert!(directory.locations_of("alice").is_empty());
    }

    #[test]
    fn test_clear_removes_the_pair() {
        let directory = directory();

        assert!(directory.store_location(signed_location("alice", 1000, 200)));
        assert!(directory.store_location(signed_location("alice", 2000, 300)));

        let record = signed_location("alice", 1000, 400);
        assert!(directory.clear_location(&record));

        let stored = directory.locations_of("alice");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].timestamp, 300);

        // Verification gates removal too.
        let mut record = signed_location("alice", 2000, 500);
        record.signature = Some(vec![1u8; 4].into());
        assert!(!directory.clear_location(&record));
        assert_eq!(directory.locations_of("alice").len(), 1);
    }

    #[test]
    fn test_purge_by_timestamp() {
        let directory = directory();
        let now = unix_time();

        assert!(directory.store_location(signed_location("alice", 1000, now.saturating_sub(LOCATION_EXPIRES + 100))));
        assert!(directory.store_location(signed_location("alice", 2000, now)));

        directory.purge(None);

        let stored = directory.locations_of("alice");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].timestamp, now);
    }
}
