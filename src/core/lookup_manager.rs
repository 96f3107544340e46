//! Bookkeeping of an iterative lookup: who to ask next, who answered, and
//! when the lookup stops making progress.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::Rng;
use tracing::trace;

use crate::common::{Contact, Kuid, SecurityToken};
use crate::core::closest_contacts::ClosestContacts;
use crate::core::scrubber::scrub;

#[derive(Debug, Clone, Copy)]
pub struct LookupSettings {
    pub k: usize,
    pub exhaustive: bool,
    pub randomize: bool,
    pub accept_empty_responses: bool,
    pub scrubber_required_ratio: f32,
}

#[derive(Debug, Clone)]
/// Snapshot of a lookup, handed to whoever started it.
pub struct LookupState {
    pub key: Kuid,
    /// The k closest contacts that answered, nearest first, with the token they gave us.
    ///
    /// Farther responders are dropped. The local node counts as a responder.
    pub contacts: Vec<(Contact, Option<SecurityToken>)>,
    /// Contacts found using the local node's id from another address.
    pub collisions: Vec<Contact>,
    /// Timeouts of contacts that came from the routing table.
    pub route_table_timeouts: usize,
    pub timeouts: usize,
    /// Hop count of the nearest responding contact.
    pub hop: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct LookupManager {
    key: Kuid,
    local: Contact,
    settings: LookupSettings,

    /// Every contact id we ever queued, with the hop it was found at.
    history: HashMap<Kuid, usize>,
    /// Contacts we may still query.
    query: ClosestContacts,
    /// Everyone who answered.
    responses: ClosestContacts<Option<SecurityToken>>,
    /// The k closest responses, bounds the termination check.
    closest: ClosestContacts,
    /// Seed contacts, timeouts among them reflect on the routing table.
    seeds: HashSet<Kuid>,
    collisions: Vec<Contact>,

    current_hop: usize,
    route_table_timeouts: usize,
    timeouts: usize,
}

impl LookupManager {
    pub fn new(key: Kuid, local: Contact, seeds: &[Contact], settings: LookupSettings) -> Self {
        let mut manager = Self {
            key,
            local: local.clone(),
            settings,

            history: HashMap::new(),
            query: ClosestContacts::new(key),
            responses: ClosestContacts::new(key),
            closest: ClosestContacts::bounded(key, settings.k),
            seeds: HashSet::new(),
            collisions: vec![],

            current_hop: 0,
            route_table_timeouts: 0,
            timeouts: 0,
        };

        manager.history.insert(*local.id(), 0);

        if !seeds.is_empty() {
            manager.add_to_responses(&local, None);

            for contact in seeds {
                if manager.add_to_query(contact, 1) {
                    manager.seeds.insert(*contact.id());
                }
            }
        }

        manager
    }

    // === Getters ===

    pub fn key(&self) -> &Kuid {
        &self.key
    }

    pub fn local(&self) -> &Contact {
        &self.local
    }

    pub fn current_hop(&self) -> usize {
        self.current_hop
    }

    pub fn responses(&self) -> usize {
        self.responses.len()
    }

    // === Public Methods ===

    /// Handles the `contacts` returned by `src`.
    ///
    /// Returns the newly discovered contacts, or `None` if the response was rejected.
    pub fn handle_response(
        &mut self,
        src: &Contact,
        token: Option<SecurityToken>,
        contacts: &[Contact],
    ) -> Option<Vec<Contact>> {
        if contacts.is_empty() {
            if self.settings.accept_empty_responses && !self.add_to_responses(src, token) {
                return None;
            }
            return Some(vec![]);
        }

        let scrubbed = scrub(&self.local, src, contacts, self.settings.scrubber_required_ratio);

        if !scrubbed.valid || !self.add_to_responses(src, token) {
            return None;
        }

        let hop = self.current_hop + 1;
        let discovered = scrubbed
            .contacts
            .into_iter()
            .filter(|contact| self.add_to_query(contact, hop))
            .collect();

        self.collisions.extend(scrubbed.collisions);

        Some(discovered)
    }

    /// Records a contact that answered without sending contacts, like a value holder.
    pub fn add_to_responses(&mut self, contact: &Contact, token: Option<SecurityToken>) -> bool {
        if !self.responses.insert(contact.clone(), token) {
            return false;
        }

        self.closest.insert(contact.clone(), ());

        if let Some(hop) = self.history.get(contact.id()) {
            self.current_hop = *hop;
        }

        true
    }

    pub fn handle_timeout(&mut self, contact_id: Option<&Kuid>) {
        if let Some(id) = contact_id {
            if self.seeds.contains(id) {
                self.route_table_timeouts += 1;
            }
        }
        self.timeouts += 1;
    }

    /// Returns `true` if there is a contact worth querying.
    ///
    /// Unless `force`d or exhaustive, that is only while the query set can
    /// still improve on the k closest responses.
    pub fn has_next(&self, force: bool) -> bool {
        let Some(first) = self.query.first() else {
            return false;
        };

        if force || self.settings.exhaustive || self.closest.len() < self.settings.k {
            return true;
        }

        match self.closest.last() {
            Some(last) => first.id().is_nearer_to(&self.key, last.id()),
            None => true,
        }
    }

    pub fn next(&mut self) -> Option<Contact> {
        let index = if self.settings.randomize {
            let bound = self.query.len().min(self.settings.k);
            if bound == 0 {
                return None;
            }
            rand::thread_rng().gen_range(0..bound)
        } else {
            0
        };

        let (contact, _) = self.query.remove(index)?;
        trace!(key = ?self.key, ?contact, "Next lookup contact");

        Some(contact)
    }

    /// Snapshot of the lookup, holding only the k closest of all responses.
    pub fn state(&self, elapsed: Duration) -> LookupState {
        LookupState {
            key: self.key,
            contacts: self
                .responses
                .entries()
                .iter()
                .take(self.settings.k)
                .cloned()
                .collect(),
            collisions: self.collisions.clone(),
            route_table_timeouts: self.route_table_timeouts,
            timeouts: self.timeouts,
            hop: self.current_hop,
            elapsed,
        }
    }

    // === Private Methods ===

    fn add_to_query(&mut self, contact: &Contact, hop: usize) -> bool {
        if self.history.contains_key(contact.id()) {
            return false;
        }

        self.history.insert(*contact.id(), hop);
        self.query.insert(contact.clone(), ());

        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn settings(k: usize) -> LookupSettings {
        LookupSettings {
            k,
            exhaustive: false,
            randomize: false,
            accept_empty_responses: true,
            scrubber_required_ratio: 0.5,
        }
    }

    fn contact(id: &str, port: u16) -> Contact {
        Contact::new(id.parse().unwrap(), ([10, 0, 0, 1], port).into())
    }

    #[test]
    fn seeds_are_queried_nearest_first() {
        let key = Kuid::MINIMUM;
        let local = contact("ff00000000000000000000000000000000000000", 1);
        let far = contact("f000000000000000000000000000000000000000", 2);
        let near = contact("0100000000000000000000000000000000000000", 3);

        let mut manager = LookupManager::new(key, local, &[far.clone(), near.clone()], settings(20));

        assert!(manager.has_next(false));
        assert_eq!(manager.next(), Some(near));
        assert_eq!(manager.next(), Some(far));
        assert!(!manager.has_next(true));
    }

    #[test]
    fn no_seeds_no_responses() {
        let local = contact("ff00000000000000000000000000000000000000", 1);
        let manager = LookupManager::new(Kuid::MINIMUM, local, &[], settings(20));

        assert!(!manager.has_next(true));
        assert!(manager.state(Duration::ZERO).contacts.is_empty());
    }

    #[test]
    fn contacts_are_queued_once_with_hops() {
        let local = contact("ff00000000000000000000000000000000000000", 1);
        let seed = contact("0f00000000000000000000000000000000000000", 2);
        let found = contact("0100000000000000000000000000000000000000", 3);

        let mut manager = LookupManager::new(Kuid::MINIMUM, local, &[seed.clone()], settings(20));
        let seed = manager.next().unwrap();

        let discovered = manager
            .handle_response(&seed, None, &[found.clone(), found.clone(), seed.clone()])
            .unwrap();
        assert_eq!(discovered, vec![found.clone()]);
        assert_eq!(manager.current_hop(), 1);

        let again = manager.handle_response(&found, None, &[seed.clone()]).unwrap();
        assert!(again.is_empty());
        assert_eq!(manager.current_hop(), 2);
    }

    #[test]
    fn state_keeps_the_k_closest() {
        let key = Kuid::MINIMUM;
        let local = contact("ff00000000000000000000000000000000000000", 1);
        let a = contact("0100000000000000000000000000000000000000", 2);
        let b = contact("0200000000000000000000000000000000000000", 3);
        let c = contact("0300000000000000000000000000000000000000", 4);

        let mut manager =
            LookupManager::new(key, local, &[c.clone(), a.clone(), b.clone()], settings(2));

        while let Some(contact) = manager.next() {
            manager.handle_response(&contact, None, &[]).unwrap();
        }
        assert_eq!(manager.responses(), 4);

        let state = manager.state(Duration::ZERO);
        let ids: Vec<Kuid> = state.contacts.iter().map(|(c, _)| *c.id()).collect();
        assert_eq!(ids, vec![*a.id(), *b.id()]);
    }

    #[test]
    fn stops_when_query_cannot_improve() {
        let key = Kuid::MINIMUM;
        let local = contact("ff00000000000000000000000000000000000000", 1);
        let a = contact("0100000000000000000000000000000000000000", 2);
        let b = contact("0200000000000000000000000000000000000000", 3);
        let far = contact("f000000000000000000000000000000000000000", 4);

        // k = 2 with the local node counting as a response.
        let mut manager = LookupManager::new(key, local, &[a.clone()], settings(2));
        manager.next();

        manager.handle_response(&a, None, &[b.clone(), far.clone()]).unwrap();
        assert_eq!(manager.next(), Some(b.clone()));

        manager.handle_response(&b, None, &[]).unwrap();

        // closest = [a, b], the remaining candidate is further than b.
        assert!(!manager.has_next(false));
        assert!(manager.has_next(true));

        let state = manager.state(Duration::ZERO);
        let ids: Vec<Kuid> = state.contacts.iter().map(|(c, _)| *c.id()).collect();
        assert_eq!(ids, vec![*a.id(), *b.id()]);
    }

    #[test]
    fn empty_responses() {
        let local = contact("ff00000000000000000000000000000000000000", 1);
        let seed = contact("0f00000000000000000000000000000000000000", 2);

        let mut accepting = LookupManager::new(Kuid::MINIMUM, local.clone(), &[seed.clone()], settings(20));
        accepting.handle_response(&seed, None, &[]).unwrap();
        assert_eq!(accepting.responses(), 2);

        let mut strict = settings(20);
        strict.accept_empty_responses = false;
        let mut ignoring = LookupManager::new(Kuid::MINIMUM, local, &[seed.clone()], strict);
        ignoring.handle_response(&seed, None, &[]).unwrap();
        assert_eq!(ignoring.responses(), 1);
    }

    #[test]
    fn duplicate_response_is_rejected() {
        let local = contact("ff00000000000000000000000000000000000000", 1);
        let seed = contact("0f00000000000000000000000000000000000000", 2);
        let other = contact("0100000000000000000000000000000000000000", 3);

        let mut manager = LookupManager::new(Kuid::MINIMUM, local, &[seed.clone()], settings(20));

        assert!(manager.handle_response(&seed, None, &[other.clone()]).is_some());
        assert!(manager.handle_response(&seed, None, &[other]).is_none());
    }

    #[test]
    fn collisions_and_timeouts() {
        let local = contact("ff00000000000000000000000000000000000000", 1);
        let seed = contact("0f00000000000000000000000000000000000000", 2);
        let collider = contact("ff00000000000000000000000000000000000000", 9);
        let stranger = contact("0100000000000000000000000000000000000000", 3);

        let mut manager = LookupManager::new(Kuid::MINIMUM, local, &[seed.clone()], settings(20));
        manager.handle_response(&seed, None, &[collider.clone(), stranger.clone()]);

        manager.handle_timeout(Some(seed.id()));
        manager.handle_timeout(Some(stranger.id()));

        let state = manager.state(Duration::ZERO);
        assert_eq!(state.collisions, vec![collider]);
        assert_eq!(state.route_table_timeouts, 1);
        assert_eq!(state.timeouts, 2);
    }
}
