//! In-process network, for tests and simulations.

use std::collections::{HashMap, HashSet};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

use flume::{Receiver, Sender};
use tracing::trace;

use super::Transport;
use crate::common::Message;

#[derive(Debug, Default)]
struct Endpoints {
    mailboxes: HashMap<SocketAddr, Sender<(Message, SocketAddr)>>,
    /// Endpoints whose messages are silently dropped, both ways.
    down: HashSet<SocketAddr>,
    next_port: u16,
}

#[derive(Debug, Clone, Default)]
/// A lossless datagram network between [MemoryTransport]s of the same process.
///
/// Messages to unknown addresses vanish, like they would over UDP.
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<Endpoints>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a transport to the next free `127.0.0.1` port.
    pub fn transport(&self) -> MemoryTransport {
        let mut endpoints = self.lock();

        let address = loop {
            endpoints.next_port = endpoints.next_port.wrapping_add(1).max(1);
            let address = SocketAddr::from((Ipv4Addr::LOCALHOST, endpoints.next_port));

            if !endpoints.mailboxes.contains_key(&address) {
                break address;
            }
        };

        Self::register(&mut endpoints, self.clone(), address)
    }

    pub fn bind(&self, address: SocketAddr) -> io::Result<MemoryTransport> {
        let mut endpoints = self.lock();

        if endpoints.mailboxes.contains_key(&address) {
            return Err(io::Error::new(ErrorKind::AddrInUse, address.to_string()));
        }

        Ok(Self::register(&mut endpoints, self.clone(), address))
    }

    /// Drops every message from and to `address` while `down`.
    pub fn set_down(&self, address: SocketAddr, down: bool) {
        let mut endpoints = self.lock();

        if down {
            endpoints.down.insert(address);
        } else {
            endpoints.down.remove(&address);
        }
    }

    // === Private Methods ===

    fn lock(&self) -> MutexGuard<'_, Endpoints> {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(endpoints: &mut Endpoints, network: MemoryNetwork, address: SocketAddr) -> MemoryTransport {
        let (sender, receiver) = flume::unbounded();
        endpoints.mailboxes.insert(address, sender);

        MemoryTransport {
            network,
            address,
            receiver,
        }
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, message: &Message) {
        let endpoints = self.lock();

        if endpoints.down.contains(&from) || endpoints.down.contains(&to) {
            trace!(?from, ?to, "Dropping message of a down endpoint");
            return;
        }

        if let Some(mailbox) = endpoints.mailboxes.get(&to) {
            let _ = mailbox.send((message.clone(), from));
        }
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    address: SocketAddr,
    receiver: Receiver<(Message, SocketAddr)>,
}

impl Transport for MemoryTransport {
    fn local_addr(&self) -> SocketAddr {
        self.address
    }

    fn send(&mut self, to: SocketAddr, message: &Message) -> io::Result<()> {
        self.network.deliver(self.address, to, message);
        Ok(())
    }

    fn recv(&mut self) -> Option<(Message, SocketAddr)> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.lock().mailboxes.remove(&self.address);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::{Contact, Kuid, MessageId, RequestSpecific};

    fn ping(from: SocketAddr) -> Message {
        Message::request(
            MessageId::random(),
            Contact::new(Kuid::random(), from),
            RequestSpecific::Ping,
        )
    }

    #[test]
    fn deliver_and_drop() {
        let network = MemoryNetwork::new();
        let mut a = network.transport();
        let mut b = network.transport();
        assert_ne!(a.local_addr(), b.local_addr());

        a.send(b.local_addr(), &ping(a.local_addr())).unwrap();
        let (_, from) = b.recv().unwrap();
        assert_eq!(from, a.local_addr());
        assert!(b.recv().is_none());

        network.set_down(b.local_addr(), true);
        a.send(b.local_addr(), &ping(a.local_addr())).unwrap();
        assert!(b.recv().is_none());

        let address = b.local_addr();
        drop(b);
        assert!(a.send(address, &ping(a.local_addr())).is_ok());
        assert!(network.bind(address).is_ok());
    }

    #[test]
    fn address_in_use() {
        let network = MemoryNetwork::new();
        let a = network.transport();

        assert!(network.bind(a.local_addr()).is_err());
    }
}
