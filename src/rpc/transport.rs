//! Datagram transports the dispatcher sends and receives [Message]s over.

mod memory;

use std::fmt::Debug;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::{debug, trace};

use crate::common::Message;

pub use memory::{MemoryNetwork, MemoryTransport};

const MTU: usize = 2048;

/// A non-blocking, unreliable datagram transport.
pub trait Transport: Send + Debug {
    fn local_addr(&self) -> SocketAddr;

    fn send(&mut self, to: SocketAddr, message: &Message) -> io::Result<()>;

    /// Returns the next received message, if any, without blocking.
    fn recv(&mut self) -> Option<(Message, SocketAddr)>;
}

#[derive(Debug)]
/// [Transport] over a UDP socket, messages are bencoded.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub fn bind(address: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(address)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            local_addr: socket.local_addr()?,
            socket,
        })
    }

    /// Binds to `bind_address` (defaults to `0.0.0.0`) and `port` (defaults to any free port).
    pub fn with_options(bind_address: Option<IpAddr>, port: Option<u16>) -> io::Result<Self> {
        let ip = bind_address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        Self::bind(SocketAddr::new(ip, port.unwrap_or(0)))
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn send(&mut self, to: SocketAddr, message: &Message) -> io::Result<()> {
        let bytes = message
            .to_bytes()
            .map_err(|error| io::Error::new(ErrorKind::InvalidData, error))?;

        self.socket.send_to(&bytes, to)?;
        Ok(())
    }

    fn recv(&mut self) -> Option<(Message, SocketAddr)> {
        let mut buf = [0_u8; MTU];

        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((amt, from)) => {
                    if from.port() == 0 {
                        trace!(context = "socket_validation", message = "Message from port 0");
                        continue;
                    }

                    match Message::from_bytes(&buf[..amt]) {
                        Ok(message) => return Some((message, from)),
                        Err(error) => {
                            trace!(
                                context = "socket_error",
                                ?error,
                                ?from,
                                message = ?String::from_utf8_lossy(&buf[..amt]),
                                "Received invalid message"
                            );
                        }
                    }
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => return None,
                Err(error) => {
                    debug!(?error, "Error receiving on the UDP socket");
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::common::{Contact, Kuid, MessageId, RequestSpecific};

    #[test]
    fn udp_roundtrip() {
        let mut a = UdpTransport::bind(([127, 0, 0, 1], 0).into()).unwrap();
        let mut b = UdpTransport::bind(([127, 0, 0, 1], 0).into()).unwrap();

        let message = Message::request(
            MessageId::random(),
            Contact::new(Kuid::random(), a.local_addr()),
            RequestSpecific::Ping,
        );
        a.send(b.local_addr(), &message).unwrap();

        let mut received = None;
        for _ in 0..100 {
            received = b.recv();
            if received.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let (received, from) = received.unwrap();
        assert_eq!(from, a.local_addr());
        assert_eq!(received.message_id, message.message_id);
        assert!(received.is_request());
    }
}
