//! Routing table contract and a simplified Kademlia routing table implementing it.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::{Contact, Kuid, MAX_DISTANCE};
use crate::rpc::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which contacts [RouteTable::select] may return.
pub enum SelectMode {
    /// Every contact that is not known to be dead.
    Known,
    /// Only contacts we heard from directly.
    Alive,
}

/// What the RPC engine needs from a routing table.
///
/// The local node is never stored as a regular contact, but it takes part in
/// [RouteTable::select] like any other alive contact.
pub trait RouteTable: Send + Debug {
    fn local_node(&self) -> &Contact;

    /// Adds a contact or refreshes what we know about it.
    ///
    /// Returns `true` if the table changed.
    fn add(&mut self, contact: Contact) -> bool;

    fn get(&self, id: &Kuid) -> Option<&Contact>;

    /// Up to `count` contacts ordered by XOR distance to `key`, nearest first.
    fn select(&self, key: &Kuid, count: usize, mode: SelectMode) -> Vec<Contact>;

    /// A request to this contact went unanswered.
    fn handle_failure(&mut self, id: Option<&Kuid>, address: SocketAddr);

    /// Random ids, one per bucket that should be refreshed with a lookup.
    ///
    /// When `bootstrapping` every bucket beyond our nearest neighbour is returned.
    fn refresh_ids(&mut self, bootstrapping: bool) -> Vec<Kuid>;

    fn contacts(&self) -> Vec<Contact>;

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// K = the default maximum size of a bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;
/// Failures after which an alive contact is considered dead.
pub const DEFAULT_MAX_FAILURES: u8 = 2;

#[derive(Debug)]
/// Simplified Kademlia routing table with one bucket per XOR distance.
pub struct BucketRouteTable {
    local: Contact,
    bucket_size: usize,
    max_failures: u8,
    refresh_period: Duration,
    clock: Arc<dyn Clock>,
    buckets: BTreeMap<u8, Bucket>,
}

impl BucketRouteTable {
    /// Create a new [BucketRouteTable] around the local node.
    pub fn new(local: Contact, clock: Arc<dyn Clock>) -> Self {
        BucketRouteTable {
            local,
            bucket_size: MAX_BUCKET_SIZE_K,
            max_failures: DEFAULT_MAX_FAILURES,
            refresh_period: Duration::from_secs(30 * 60),
            clock,
            buckets: BTreeMap::new(),
        }
    }

    // === Options ===

    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u8) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_refresh_period(mut self, refresh_period: Duration) -> Self {
        self.refresh_period = refresh_period;
        self
    }

    // === Private Methods ===

    fn find_mut(&mut self, id: Option<&Kuid>, address: SocketAddr) -> Option<&mut Contact> {
        match id {
            Some(id) => {
                let distance = self.local.id().distance(id);
                self.buckets
                    .get_mut(&distance)?
                    .contacts
                    .iter_mut()
                    .find(|contact| contact.id() == id && contact.address() == address)
            }
            None => self
                .buckets
                .values_mut()
                .flat_map(|bucket| bucket.contacts.iter_mut())
                .find(|contact| contact.address() == address),
        }
    }
}

impl RouteTable for BucketRouteTable {
    fn local_node(&self) -> &Contact {
        &self.local
    }

    fn add(&mut self, contact: Contact) -> bool {
        let distance = self.local.id().distance(contact.id());

        if distance == 0 {
            // Do not add self to the routing table
            return false;
        }

        let now = self.clock.now();
        let bucket_size = self.bucket_size;
        let bucket = self
            .buckets
            .entry(distance)
            .or_insert_with(|| Bucket::new(now));

        bucket.add(contact, bucket_size, now)
    }

    fn get(&self, id: &Kuid) -> Option<&Contact> {
        let distance = self.local.id().distance(id);

        self.buckets
            .get(&distance)?
            .contacts
            .iter()
            .find(|contact| contact.id() == id)
    }

    fn select(&self, key: &Kuid, count: usize, mode: SelectMode) -> Vec<Contact> {
        let mut selected: Vec<Contact> = self
            .buckets
            .values()
            .flat_map(|bucket| bucket.contacts.iter())
            .filter(|contact| match mode {
                SelectMode::Known => !contact.is_dead(),
                SelectMode::Alive => contact.is_alive(),
            })
            .cloned()
            .collect();

        selected.push(self.local.clone());
        selected.sort_by_key(|contact| contact.id().xor(key));
        selected.truncate(count);

        selected
    }

    fn handle_failure(&mut self, id: Option<&Kuid>, address: SocketAddr) {
        let max_failures = self.max_failures;

        if let Some(contact) = self.find_mut(id, address) {
            let failures = contact.record_failure();

            if !contact.is_alive() || failures >= max_failures {
                contact.mark_dead();
            }
        }
    }

    fn refresh_ids(&mut self, bootstrapping: bool) -> Vec<Kuid> {
        let now = self.clock.now();
        let local_id = *self.local.id();

        if bootstrapping {
            let nearest = self
                .buckets
                .iter()
                .find(|(_, bucket)| !bucket.contacts.is_empty())
                .map(|(distance, _)| *distance);

            return match nearest {
                Some(nearest) => (nearest..=MAX_DISTANCE)
                    .rev()
                    .map(|distance| local_id.random_at_distance(distance))
                    .collect(),
                None => vec![],
            };
        }

        let mut stale: Vec<(Instant, u8)> = self
            .buckets
            .iter()
            .filter(|(_, bucket)| now.saturating_duration_since(bucket.touched) >= self.refresh_period)
            .map(|(distance, bucket)| (bucket.touched, *distance))
            .collect();
        stale.sort();

        stale
            .into_iter()
            .map(|(_, distance)| {
                if let Some(bucket) = self.buckets.get_mut(&distance) {
                    bucket.touched = now;
                }
                local_id.random_at_distance(distance)
            })
            .collect()
    }

    fn contacts(&self) -> Vec<Contact> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.contacts.iter().cloned())
            .collect()
    }

    fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.contacts.len())
    }
}

/// Buckets keep contacts sorted by the least recently seen, and only evict
/// contacts that are dead.
#[derive(Debug, Clone)]
struct Bucket {
    contacts: Vec<Contact>,
    /// Last time a live contact was added or refreshed in this bucket.
    touched: Instant,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Bucket {
            contacts: Vec::new(),
            touched: now,
        }
    }

    fn add(&mut self, mut incoming: Contact, bucket_size: usize, now: Instant) -> bool {
        if let Some(index) = self
            .contacts
            .iter()
            .position(|contact| contact.id() == incoming.id())
        {
            // Hearsay never overrides what we learned first hand.
            if !incoming.is_alive() {
                return false;
            }

            let existing = self.contacts.remove(index);
            incoming.merge_from(&existing);
            self.contacts.push(incoming);
            self.touched = now;

            return true;
        }

        if self.contacts.len() < bucket_size {
            if incoming.is_alive() {
                self.touched = now;
            }
            self.contacts.push(incoming);

            return true;
        }

        if let Some(index) = self.contacts.iter().position(|contact| contact.is_dead()) {
            self.contacts.remove(index);
            if incoming.is_alive() {
                self.touched = now;
            }
            self.contacts.push(incoming);

            return true;
        }

        false
    }
}
