use crate::hub::Datagram;

use std::{
    collections::{BTreeMap, VecDeque},
    net::SocketAddr,
    time::{Duration, Instant},
};

use ahash::{HashMap, HashMapExt};
use codec::mtp::{Kind, Package, parse_fragment_respond};
use parking_lot::Mutex;

/// An outbound transfer awaiting acknowledgement.
///
/// `packages` is never empty. A fragmented message holds one package per
/// page, all sharing the sequence number; acknowledged fragments are
/// removed one by one and the departure finishes when the list empties.
#[derive(Debug, Clone)]
pub struct Departure {
    pub sn: u32,
    pub kind: Kind,
    pub destination: SocketAddr,
    pub source: SocketAddr,
    pub packages: Vec<Package>,
    pub last_attempt: Instant,
    pub tries: u8,
}

impl Departure {
    pub fn is_expired(&self, now: Instant, interval: Duration) -> bool {
        now.duration_since(self.last_attempt) >= interval
    }
}

/// A per-sequence-number reassembly slot.
///
/// Duplicate offsets are suppressed: the first copy wins and later ones are
/// discarded, so a retransmitted fragment can never re-deliver a message.
#[derive(Debug, Clone)]
pub struct Assemble {
    pub sn: u32,
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub pages: u32,
    pub first_seen: Instant,
    fragments: BTreeMap<u32, Package>,
}

impl Assemble {
    pub fn new(fragment: Package, source: SocketAddr, destination: SocketAddr, now: Instant) -> Self {
        let mut fragments = BTreeMap::new();
        let (sn, pages) = (fragment.head.sn, fragment.head.pages);
        fragments.insert(fragment.head.offset, fragment);

        Self {
            sn,
            source,
            destination,
            pages,
            first_seen: now,
            fragments,
        }
    }

    /// Insert one fragment; returns whether the slot accepted it.
    pub fn insert(&mut self, fragment: Package) -> bool {
        if fragment.head.sn != self.sn || fragment.head.pages != self.pages {
            return false;
        }

        match self.fragments.entry(fragment.head.offset) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(fragment);
                true
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.fragments.len() as u32 == self.pages
    }

    pub fn fragments(&self) -> Vec<Package> {
        self.fragments.values().cloned().collect()
    }

    /// Concatenate the fragments into the original message.
    pub fn assemble(&self) -> Option<Package> {
        Package::assemble(&self.fragments())
    }
}

/// The queues the dispatch loop works against. The engine depends only on
/// this seam; the in-memory [`MemoryPool`] is the default implementation
/// and tests may substitute their own.
pub trait Pool: Send + Sync {
    fn append_arrival(&self, arrival: Datagram);

    /// Arrivals pop in FIFO order of enqueue.
    fn shift_arrival(&self) -> Option<Datagram>;

    fn arrivals_len(&self) -> usize;

    fn append_departure(&self, departure: Departure);

    /// Pop one departure whose retry timer elapsed, in order of expiry.
    fn shift_expired_departure(&self, now: Instant, interval: Duration) -> Option<Departure>;

    /// Retire whatever a respond packet acknowledges: the whole departure
    /// for a plain respond, one fragment for a `pages ‖ offset ‖ "OK"`
    /// respond. Returns the departure once nothing of it is left pending.
    fn delete_departure(
        &self,
        respond: &Package,
        source: SocketAddr,
        destination: SocketAddr,
    ) -> Option<Departure>;

    /// File a fragment into its reassembly slot; returns the whole message
    /// once every page is present.
    fn insert_fragment(
        &self,
        fragment: Package,
        source: SocketAddr,
        destination: SocketAddr,
        now: Instant,
    ) -> Option<Package>;

    /// Remove and return the slots that have been waiting longer than the
    /// timeout.
    fn discard_fragments(&self, now: Instant, timeout: Duration) -> Vec<Assemble>;
}

/// Lock-per-queue in-memory pool. The dispatch loop is the sole consumer;
/// caller threads only append.
pub struct MemoryPool {
    arrivals: Mutex<VecDeque<Datagram>>,
    departures: Mutex<VecDeque<Departure>>,
    assembles: Mutex<HashMap<(u32, SocketAddr), Assemble>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self {
            arrivals: Mutex::new(VecDeque::with_capacity(1024)),
            departures: Mutex::new(VecDeque::with_capacity(64)),
            assembles: Mutex::new(HashMap::with_capacity(64)),
        }
    }
}

impl Pool for MemoryPool {
    fn append_arrival(&self, arrival: Datagram) {
        self.arrivals.lock().push_back(arrival);
    }

    fn shift_arrival(&self) -> Option<Datagram> {
        self.arrivals.lock().pop_front()
    }

    fn arrivals_len(&self) -> usize {
        self.arrivals.lock().len()
    }

    fn append_departure(&self, departure: Departure) {
        self.departures.lock().push_back(departure);
    }

    fn shift_expired_departure(&self, now: Instant, interval: Duration) -> Option<Departure> {
        let mut lock = self.departures.lock();

        // Departures enter in send order and share one retry interval, so
        // the earliest expiry sits closest to the front.
        let index = lock.iter().position(|it| it.is_expired(now, interval))?;
        lock.remove(index)
    }

    fn delete_departure(
        &self,
        respond: &Package,
        source: SocketAddr,
        _destination: SocketAddr,
    ) -> Option<Departure> {
        let mut lock = self.departures.lock();
        let index = lock
            .iter()
            .position(|it| it.sn == respond.head.sn && it.destination == source)?;

        if let Some((_, offset)) = parse_fragment_respond(&respond.body) {
            // One fragment of a paged message came back acknowledged.
            let departure = &mut lock[index];
            departure.packages.retain(|it| it.head.offset != offset);

            if !departure.packages.is_empty() {
                return None;
            }
        }

        lock.remove(index)
    }

    fn insert_fragment(
        &self,
        fragment: Package,
        source: SocketAddr,
        destination: SocketAddr,
        now: Instant,
    ) -> Option<Package> {
        let key = (fragment.head.sn, source);
        let mut lock = self.assembles.lock();

        let slot = lock
            .entry(key)
            .or_insert_with(|| Assemble::new(fragment.clone(), source, destination, now));

        // A fresh slot already holds the fragment; re-inserting it is a
        // no-op thanks to first-wins.
        slot.insert(fragment);

        if !slot.is_complete() {
            return None;
        }

        let slot = lock.remove(&key)?;
        slot.assemble()
    }

    fn discard_fragments(&self, now: Instant, timeout: Duration) -> Vec<Assemble> {
        let mut lock = self.assembles.lock();
        let stale: Vec<(u32, SocketAddr)> = lock
            .iter()
            .filter(|(_, it)| now.duration_since(it.first_seen) >= timeout)
            .map(|(key, _)| *key)
            .collect();

        stale.into_iter().filter_map(|key| lock.remove(&key)).collect()
    }
}
