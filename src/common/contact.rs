//! Remote (or local) node as known to the routing table and the RPC layer.
use std::{
    fmt::{self, Display, Formatter},
    net::SocketAddr,
    time::Duration,
};

use crate::common::Kuid;

/// Multiplier applied to the last measured round trip time.
const ADAPTIVE_TIMEOUT_MULTIPLIER: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Liveness of a [Contact].
pub enum ContactState {
    /// We received a message from this contact.
    Alive,
    /// We only heard about this contact from someone else.
    Unknown,
    /// This contact failed to answer too many requests.
    Dead,
    /// This contact told us it is shutting down.
    Shutdown,
}

#[derive(Debug, Clone)]
/// Node entry in the routing table, or the sender of a message.
pub struct Contact {
    id: Kuid,
    address: SocketAddr,
    instance_id: u8,
    firewalled: bool,
    state: ContactState,
    rtt: Option<Duration>,
    failures: u8,
}

impl Contact {
    /// Creates a contact we have not talked to yet.
    pub fn new(id: Kuid, address: SocketAddr) -> Contact {
        Contact {
            id,
            address,
            instance_id: 0,
            firewalled: false,
            state: ContactState::Unknown,
            rtt: None,
            failures: 0,
        }
    }

    /// Creates a contact for the sender of a message we just received.
    pub fn alive(id: Kuid, address: SocketAddr, instance_id: u8, firewalled: bool) -> Contact {
        Contact {
            id,
            address,
            instance_id,
            firewalled,
            state: ContactState::Alive,
            rtt: None,
            failures: 0,
        }
    }

    pub fn with_instance_id(mut self, instance_id: u8) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn with_firewalled(mut self, firewalled: bool) -> Self {
        self.firewalled = firewalled;
        self
    }

    pub fn with_state(mut self, state: ContactState) -> Self {
        self.state = state;
        self
    }

    // === Getters ===

    pub fn id(&self) -> &Kuid {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn instance_id(&self) -> u8 {
        self.instance_id
    }

    pub fn is_firewalled(&self) -> bool {
        self.firewalled
    }

    pub fn state(&self) -> ContactState {
        self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state == ContactState::Alive
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.state, ContactState::Dead | ContactState::Shutdown)
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    pub fn failures(&self) -> u8 {
        self.failures
    }

    /// Timeout to use for the next request to this contact.
    ///
    /// Alive contacts with a known round trip time get `rtt * 4` bounded by
    /// `[min, default]`, everyone else gets `default`.
    pub fn adaptive_timeout(&self, min: Duration, default: Duration) -> Duration {
        match self.rtt {
            Some(rtt) if self.is_alive() => (rtt * ADAPTIVE_TIMEOUT_MULTIPLIER).max(min).min(default),
            _ => default,
        }
    }

    /// Returns `true` if the address can be routed to at all.
    pub fn has_valid_address(&self) -> bool {
        self.address.port() != 0 && !self.address.ip().is_unspecified()
    }

    // === Mutators ===

    pub(crate) fn set_rtt(&mut self, rtt: Duration) {
        self.rtt = Some(rtt);
    }

    pub(crate) fn set_address(&mut self, address: SocketAddr) {
        self.address = address;
    }

    /// Records a failed request, returns the new failure count.
    pub(crate) fn record_failure(&mut self) -> u8 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    pub(crate) fn mark_dead(&mut self) {
        self.state = ContactState::Dead;
    }

    /// Merges what we knew about this contact into a fresher record of it.
    pub(crate) fn merge_from(&mut self, existing: &Contact) {
        if self.rtt.is_none() {
            self.rtt = existing.rtt;
        }
        if self.state == ContactState::Unknown {
            self.state = existing.state;
            self.failures = existing.failures;
        }
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.address == other.address
    }
}

impl Eq for Contact {}

impl Display for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.address)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adaptive_timeout() {
        let address: SocketAddr = ([127, 0, 0, 1], 6000).into();
        let min = Duration::from_millis(250);
        let default = Duration::from_secs(5);

        let mut contact = Contact::new(Kuid::random(), address);
        contact.set_rtt(Duration::from_millis(100));
        assert_eq!(contact.adaptive_timeout(min, default), default);

        let mut contact = Contact::alive(Kuid::random(), address, 0, false);
        assert_eq!(contact.adaptive_timeout(min, default), default);

        contact.set_rtt(Duration::from_millis(100));
        assert_eq!(contact.adaptive_timeout(min, default), Duration::from_millis(400));

        contact.set_rtt(Duration::from_millis(10));
        assert_eq!(contact.adaptive_timeout(min, default), min);

        contact.set_rtt(Duration::from_secs(10));
        assert_eq!(contact.adaptive_timeout(min, default), default);
    }

    #[test]
    fn valid_address() {
        let contact = Contact::new(Kuid::random(), ([0, 0, 0, 0], 6000).into());
        assert!(!contact.has_valid_address());

        let contact = Contact::new(Kuid::random(), ([10, 0, 0, 1], 0).into());
        assert!(!contact.has_valid_address());

        let contact = Contact::new(Kuid::random(), ([10, 0, 0, 1], 1).into());
        assert!(contact.has_valid_address());
    }
}
