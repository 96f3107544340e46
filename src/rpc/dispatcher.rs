//! Correlates outgoing requests with their responses and expires the rest.

mod history;
mod pending;

use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::common::{Contact, Kuid, Message, MessageId, MessageType, RequestSpecific};
use crate::{Error, Result};

use history::ResponseHistory;
use pending::PendingRequests;

pub(crate) use pending::PendingRequest;

pub use pending::RequestHandle;

use super::transport::Transport;

/// Id of an operation registered on an [super::Rpc].
pub type OperationId = u64;

/// Decides which hosts we talk to.
pub trait HostFilter: Send + Sync + Debug {
    fn allow(&self, address: &SocketAddr) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Counters of the [MessageDispatcher].
pub struct DispatcherStats {
    pub requests_sent: u64,
    pub responses_sent: u64,
    pub messages_received: u64,
    pub late_responses: u64,
    pub replayed_responses: u64,
    pub illegal_responses: u64,
    pub filtered_messages: u64,
    pub timeouts: u64,
}

#[derive(Debug)]
pub(crate) enum Inbound {
    Request(Message),
    Response {
        owner: OperationId,
        handle: RequestHandle,
        response: Message,
        rtt: Duration,
    },
    /// The request was answered by the wrong contact or with the wrong type.
    IllegalResponse {
        owner: OperationId,
        handle: RequestHandle,
        response: Message,
    },
    /// Nobody is waiting for this response anymore.
    LateResponse(Message),
}

#[derive(Debug)]
pub struct MessageDispatcher {
    transport: Option<Box<dyn Transport>>,
    pending: PendingRequests,
    history: ResponseHistory,
    filter: Option<Box<dyn HostFilter>>,
    stats: DispatcherStats,
    closed: bool,
}

impl MessageDispatcher {
    pub fn new(response_history_size: usize) -> Self {
        Self {
            transport: None,
            pending: PendingRequests::new(),
            history: ResponseHistory::new(response_history_size),
            filter: None,
            stats: DispatcherStats::default(),
            closed: false,
        }
    }

    // === Getters ===

    pub fn is_bound(&self) -> bool {
        self.transport.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(|transport| transport.local_addr())
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    /// Number of requests awaiting a response.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, message_id: &MessageId) -> bool {
        self.pending.contains(message_id)
    }

    // === Public Methods ===

    pub fn bind(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.transport.is_some() {
            return Err(Error::AlreadyBound);
        }

        debug!(address = ?transport.local_addr(), "Dispatcher bound");
        self.transport = Some(transport);
        Ok(())
    }

    /// Detaches the transport. Pending requests are returned, nothing can answer them anymore.
    pub(crate) fn unbind(&mut self) -> (Option<Box<dyn Transport>>, Vec<PendingRequest>) {
        (self.transport.take(), self.pending.drain())
    }

    /// Closes for good. Pending requests are returned to be cancelled.
    pub(crate) fn close(&mut self) -> Vec<PendingRequest> {
        self.closed = true;
        self.transport = None;
        self.pending.drain()
    }

    pub fn set_filter(&mut self, filter: Option<Box<dyn HostFilter>>) {
        self.filter = filter;
    }

    /// Sends a request and registers it, on behalf of `owner`, until `timeout`.
    pub(crate) fn send_request(
        &mut self,
        owner: OperationId,
        sender: Contact,
        contact_id: Option<Kuid>,
        address: SocketAddr,
        request: RequestSpecific,
        timeout: Duration,
        now: Instant,
    ) -> Result<MessageId> {
        if self.closed {
            return Err(Error::Closed);
        }
        let transport = self.transport.as_mut().ok_or(Error::NotBound)?;

        let message_id = MessageId::random();
        let message = Message::request(message_id, sender, request.clone());
        trace!(context = "dispatcher_request_sending", ?message, ?address);

        transport.send(address, &message)?;

        self.pending.add(
            owner,
            RequestHandle {
                message_id,
                contact_id,
                address,
                request,
                sent_at: now,
            },
            timeout,
        );
        self.stats.requests_sent += 1;

        Ok(message_id)
    }

    pub(crate) fn send_response(&mut self, address: SocketAddr, message: Message) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::NotBound)?;
        trace!(context = "dispatcher_response_sending", ?message, ?address);

        transport.send(address, &message)?;
        self.stats.responses_sent += 1;

        Ok(())
    }

    pub(crate) fn recv(&mut self) -> Option<(Message, SocketAddr)> {
        self.transport.as_mut()?.recv()
    }

    /// Classifies an inbound message, resolving the pending request it answers.
    pub(crate) fn handle_message(
        &mut self,
        message: Message,
        from: SocketAddr,
        now: Instant,
    ) -> Option<Inbound> {
        self.stats.messages_received += 1;

        if let Some(filter) = &self.filter {
            if !filter.allow(&from) {
                self.stats.filtered_messages += 1;
                trace!(context = "dispatcher_filter", ?from, "Filtered message");
                return None;
            }
        }

        match message.message_type {
            MessageType::Request(_) => {
                if self.pending.contains(&message.message_id) {
                    debug!(?from, "Dropping a request we sent to ourselves");
                    return None;
                }

                Some(Inbound::Request(message))
            }
            MessageType::Response(_) => {
                if !self.history.check(&message.message_id) {
                    self.stats.replayed_responses += 1;
                    debug!(?from, message_id = ?message.message_id, "Replayed response");
                    return Some(Inbound::LateResponse(message));
                }

                let Some(request) = self.pending.remove(&message.message_id) else {
                    self.stats.late_responses += 1;
                    trace!(?from, message_id = ?message.message_id, "Late response");
                    return Some(Inbound::LateResponse(message));
                };

                let rtt = now.saturating_duration_since(request.handle.sent_at);

                if request.handle.check(&message) {
                    Some(Inbound::Response {
                        owner: request.owner,
                        handle: request.handle,
                        response: message,
                        rtt,
                    })
                } else {
                    self.stats.illegal_responses += 1;
                    debug!(
                        ?from,
                        expected = ?request.handle.contact_id,
                        contact = ?message.contact,
                        request = %request.handle.request.kind(),
                        "Illegal response"
                    );
                    Some(Inbound::IllegalResponse {
                        owner: request.owner,
                        handle: request.handle,
                        response: message,
                    })
                }
            }
        }
    }

    /// Removes and returns requests that timed out.
    pub(crate) fn poll_timeouts(&mut self, now: Instant) -> Vec<PendingRequest> {
        let expired = self.pending.expired(now);
        self.stats.timeouts += expired.len() as u64;
        expired
    }

    /// Forgets a pending request, its response will be late.
    pub(crate) fn cancel(&mut self, message_id: &MessageId) -> bool {
        self.pending.remove(message_id).is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::ResponseSpecific;
    use crate::rpc::transport::{MemoryNetwork, MemoryTransport};

    fn setup() -> (MessageDispatcher, MemoryTransport, Contact) {
        let network = MemoryNetwork::new();
        let mut dispatcher = MessageDispatcher::new(512);
        let transport = network.transport();
        let local = Contact::new(Kuid::random(), transport.local_addr());
        dispatcher.bind(Box::new(transport)).unwrap();

        (dispatcher, network.transport(), local)
    }

    fn pong(message_id: MessageId, contact: Contact) -> Message {
        Message::response(
            message_id,
            contact,
            ResponseSpecific::Pong {
                external_address: ([127, 0, 0, 1], 1).into(),
            },
        )
    }

    #[test]
    fn bind_rules() {
        let network = MemoryNetwork::new();
        let mut dispatcher = MessageDispatcher::new(512);
        let now = Instant::now();
        let contact = Contact::new(Kuid::random(), ([127, 0, 0, 1], 1).into());

        assert!(matches!(
            dispatcher.send_request(1, contact.clone(), None, contact.address(), RequestSpecific::Ping, Duration::from_secs(1), now),
            Err(Error::NotBound)
        ));

        dispatcher.bind(Box::new(network.transport())).unwrap();
        assert!(matches!(
            dispatcher.bind(Box::new(network.transport())),
            Err(Error::AlreadyBound)
        ));

        dispatcher.close();
        assert!(matches!(
            dispatcher.bind(Box::new(network.transport())),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn response_resolves_pending_request_once() {
        let (mut dispatcher, peer, local) = setup();
        let now = Instant::now();
        let id = Kuid::random();
        let remote = Contact::new(id, peer.local_addr());

        let message_id = dispatcher
            .send_request(7, local, Some(id), remote.address(), RequestSpecific::Ping, Duration::from_secs(1), now)
            .unwrap();
        assert!(dispatcher.is_pending(&message_id));

        let response = pong(message_id, remote.clone());
        let later = now + Duration::from_millis(40);

        match dispatcher.handle_message(response.clone(), remote.address(), later) {
            Some(Inbound::Response { owner, rtt, .. }) => {
                assert_eq!(owner, 7);
                assert_eq!(rtt, Duration::from_millis(40));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            dispatcher.handle_message(response, remote.address(), later),
            Some(Inbound::LateResponse(_))
        ));
        assert_eq!(dispatcher.stats().replayed_responses, 1);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn unknown_response_is_late() {
        let (mut dispatcher, peer, _) = setup();
        let remote = Contact::new(Kuid::random(), peer.local_addr());

        assert!(matches!(
            dispatcher.handle_message(pong(MessageId::random(), remote.clone()), remote.address(), Instant::now()),
            Some(Inbound::LateResponse(_))
        ));
        assert_eq!(dispatcher.stats().late_responses, 1);
    }

    #[test]
    fn wrong_contact_is_illegal() {
        let (mut dispatcher, peer, local) = setup();
        let now = Instant::now();
        let expected = Kuid::random();

        let message_id = dispatcher
            .send_request(1, local, Some(expected), peer.local_addr(), RequestSpecific::Ping, Duration::from_secs(1), now)
            .unwrap();

        let impostor = Contact::new(Kuid::random(), peer.local_addr());

        assert!(matches!(
            dispatcher.handle_message(pong(message_id, impostor), peer.local_addr(), now),
            Some(Inbound::IllegalResponse { owner: 1, .. })
        ));
        assert_eq!(dispatcher.stats().illegal_responses, 1);
    }

    #[test]
    fn wrong_type_is_illegal() {
        let (mut dispatcher, peer, local) = setup();
        let now = Instant::now();

        let message_id = dispatcher
            .send_request(1, local, None, peer.local_addr(), RequestSpecific::FindNode { key: Kuid::random() }, Duration::from_secs(1), now)
            .unwrap();

        let remote = Contact::new(Kuid::random(), peer.local_addr());

        assert!(matches!(
            dispatcher.handle_message(pong(message_id, remote), peer.local_addr(), now),
            Some(Inbound::IllegalResponse { .. })
        ));
    }

    #[test]
    fn timeouts() {
        let (mut dispatcher, peer, local) = setup();
        let now = Instant::now();

        dispatcher
            .send_request(1, local.clone(), None, peer.local_addr(), RequestSpecific::Ping, Duration::from_secs(1), now)
            .unwrap();
        dispatcher
            .send_request(2, local, None, peer.local_addr(), RequestSpecific::Ping, Duration::from_secs(3), now)
            .unwrap();

        assert!(dispatcher.poll_timeouts(now).is_empty());

        let expired = dispatcher.poll_timeouts(now + Duration::from_secs(2));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].owner, 1);
        assert_eq!(dispatcher.pending(), 1);
        assert_eq!(dispatcher.stats().timeouts, 1);
    }

    #[test]
    fn own_request_is_dropped() {
        let (mut dispatcher, peer, local) = setup();
        let now = Instant::now();

        let message_id = dispatcher
            .send_request(1, local.clone(), None, peer.local_addr(), RequestSpecific::Ping, Duration::from_secs(1), now)
            .unwrap();

        let looped = Message::request(message_id, local.clone(), RequestSpecific::Ping);
        assert!(dispatcher.handle_message(looped, local.address(), now).is_none());
    }

    #[derive(Debug)]
    struct DenyAll;

    impl HostFilter for DenyAll {
        fn allow(&self, _: &SocketAddr) -> bool {
            false
        }
    }

    #[test]
    fn filtered() {
        let (mut dispatcher, peer, _) = setup();
        dispatcher.set_filter(Some(Box::new(DenyAll)));

        let request = Message::request(
            MessageId::random(),
            Contact::new(Kuid::random(), peer.local_addr()),
            RequestSpecific::Ping,
        );

        assert!(dispatcher.handle_message(request, peer.local_addr(), Instant::now()).is_none());
        assert_eq!(dispatcher.stats().filtered_messages, 1);
    }
}
