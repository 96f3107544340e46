//! The engine: an [Rpc] owns the dispatcher, the routing table and every running operation.
//!
//! Nothing happens in the background. Each call to [Rpc::tick] reads inbound
//! messages, expires pending requests and lets operations make progress.

pub mod clock;
pub mod config;
mod dispatcher;
pub(crate) mod future;
pub(crate) mod handler;
mod info;
mod server;
pub mod transport;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::common::{
    lock_database, BucketRouteTable, Contact, DhtValue, InMemoryDatabase, Kuid, Message,
    MessageId, RequestSpecific, ResponseSpecific, RouteTable, SecurityToken, SharedDatabase,
};
use crate::core::store_forward;
use crate::{Error, Result};

use dispatcher::Inbound;
use future::Resolver;
use handler::bootstrap::BootstrapProcess;
use handler::lookup::{FindNodeProcess, FindValueProcess, Lookup, LookupType};
use handler::ping::PingProcess;
use handler::put::PutProcess;
use handler::security_token::SecurityTokenProcess;
use handler::store::{ForwardProcess, StoreProcess};
use handler::{Event, Process, ResponseHandler, Task};
use server::Tokens;

pub use crate::core::lookup_manager::LookupState;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use dispatcher::{DispatcherStats, HostFilter, MessageDispatcher, OperationId, RequestHandle};
pub use future::DhtFuture;
pub use handler::bootstrap::BootstrapResult;
pub use handler::lookup::{FindNodeResult, FindValueResult};
pub use handler::ping::PingResult;
pub use handler::store::StoreResult;
pub use info::Info;
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};

/// Everything an operation may touch while it handles an event.
#[derive(Debug)]
pub(crate) struct Context {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub dispatcher: MessageDispatcher,
    pub route_table: Box<dyn RouteTable>,
    pub database: SharedDatabase,
    pub tokens: Tokens,
    /// Set once a bootstrap completed, store forwarding waits for it.
    pub bootstrapped: bool,
    /// The operation whose callback is running, it owns the requests sent meanwhile.
    pub current: OperationId,
}

impl Context {
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn local_node(&self) -> &Contact {
        self.route_table.local_node()
    }

    /// Sends `request` to `contact` with the timeout its round trip times earned it.
    pub fn request(&mut self, contact: &Contact, request: RequestSpecific) -> Result<MessageId> {
        let timeout = self
            .route_table
            .get(contact.id())
            .unwrap_or(contact)
            .adaptive_timeout(self.config.min_request_timeout, self.config.request_timeout);

        self.send(None, Some(*contact.id()), contact.address(), request, timeout)
    }

    /// Sends `request` as `sender`, or as the local node if `None`.
    pub fn send(
        &mut self,
        sender: Option<Contact>,
        contact_id: Option<Kuid>,
        address: SocketAddr,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<MessageId> {
        let sender = sender.unwrap_or_else(|| self.local_node().clone());
        let now = self.now();

        self.dispatcher
            .send_request(self.current, sender, contact_id, address, request, timeout, now)
    }
}

#[derive(Debug)]
/// Kademlia RPC engine.
///
/// Operations return a [DhtFuture] right away and resolve during later [Rpc::tick]s.
pub struct Rpc {
    ctx: Context,
    operations: HashMap<OperationId, Box<dyn ResponseHandler>>,
    next_operation: OperationId,
    /// The running bootstrap, if any.
    bootstrap: Option<OperationId>,
}

impl Rpc {
    /// Create a new engine bound to `transport`.
    pub fn new(config: Config, transport: Box<dyn Transport>) -> Result<Self> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let id = config.id.unwrap_or_else(Kuid::random);
        let local = Contact::alive(
            id,
            transport.local_addr(),
            rand::random(),
            config.firewalled,
        );

        let route_table = BucketRouteTable::new(local, clock.clone())
            .with_bucket_size(config.k)
            .with_max_failures(config.max_contact_failures)
            .with_refresh_period(config.bucket_refresh_period);

        let mut dispatcher = MessageDispatcher::new(config.response_history_size);
        dispatcher.bind(transport)?;

        info!(?id, address = ?dispatcher.local_addr(), "Mojito node listening");

        Ok(Rpc {
            ctx: Context {
                tokens: Tokens::new(clock.now()),
                config,
                clock,
                dispatcher,
                route_table: Box::new(route_table),
                database: InMemoryDatabase::new().shared(),
                bootstrapped: false,
                current: 0,
            },
            operations: HashMap::new(),
            next_operation: 1,
            bootstrap: None,
        })
    }

    // === Options ===

    /// Replaces the routing table, its local node becomes this node.
    pub fn with_route_table(mut self, route_table: Box<dyn RouteTable>) -> Self {
        self.ctx.route_table = route_table;
        self
    }

    pub fn with_database(mut self, database: SharedDatabase) -> Self {
        self.ctx.database = database;
        self
    }

    /// Only accept messages from hosts `filter` allows.
    pub fn with_host_filter(mut self, filter: Box<dyn HostFilter>) -> Self {
        self.ctx.dispatcher.set_filter(Some(filter));
        self
    }

    // === Getters ===

    pub fn local_node(&self) -> &Contact {
        self.ctx.local_node()
    }

    /// Address of the bound transport.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ctx.dispatcher.local_addr()
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn route_table(&self) -> &dyn RouteTable {
        self.ctx.route_table.as_ref()
    }

    /// A handle to the values this node stores.
    pub fn database(&self) -> SharedDatabase {
        self.ctx.database.clone()
    }

    pub(crate) fn database_ref(&self) -> &SharedDatabase {
        &self.ctx.database
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.ctx.bootstrapped
    }

    pub fn stats(&self) -> DispatcherStats {
        self.ctx.dispatcher.stats()
    }

    pub fn pending_requests(&self) -> usize {
        self.ctx.dispatcher.pending()
    }

    pub fn active_operations(&self) -> usize {
        self.operations.len()
    }

    pub fn info(&self) -> Info {
        Info::from(self)
    }

    // === Lifecycle ===

    pub fn bind(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.ctx.dispatcher.bind(transport)
    }

    /// Detaches the transport, every pending request fails with [Error::NotBound].
    pub fn unbind(&mut self) -> Option<Box<dyn Transport>> {
        let (transport, pending) = self.ctx.dispatcher.unbind();

        for request in pending {
            self.with_operation(request.owner, |operation, ctx| {
                operation.handle(
                    ctx,
                    Event::Exception {
                        handle: &request.handle,
                        error: Error::NotBound,
                    },
                )
            });
        }
        self.cleanup();

        transport
    }

    /// Closes the dispatcher and cancels every operation.
    pub fn close(&mut self) {
        let pending = self.ctx.dispatcher.close();
        debug!(pending = pending.len(), operations = self.operations.len(), "Closing");

        for (id, mut operation) in self.operations.drain() {
            self.ctx.current = id;
            operation.cancel(&mut self.ctx);
        }
        self.bootstrap = None;
    }

    // === Operations ===

    /// Pings an address, the node there may be unknown.
    pub fn ping(&mut self, address: SocketAddr) -> DhtFuture<PingResult> {
        let (resolver, future) = future::channel();
        self.start_ping(address, resolver);
        future
    }

    pub(crate) fn start_ping(&mut self, address: SocketAddr, resolver: Resolver<PingResult>) {
        self.spawn("ping", PingProcess::addresses(&[address], 1), resolver);
    }

    /// Pings a contact, answers from any other id are ignored.
    pub fn ping_contact(&mut self, contact: &Contact) -> DhtFuture<PingResult> {
        let (resolver, future) = future::channel();
        self.spawn("ping", PingProcess::contacts(&[contact.clone()], 1), resolver);
        future
    }

    /// Iterative lookup of the k closest nodes to `key`.
    pub fn find_node(&mut self, key: Kuid) -> DhtFuture<FindNodeResult> {
        let (resolver, future) = future::channel();
        self.start_find_node(key, resolver);
        future
    }

    pub(crate) fn start_find_node(&mut self, key: Kuid, resolver: Resolver<FindNodeResult>) {
        let lookup = Lookup::new(&self.ctx, LookupType::FindNode, key, None);
        self.spawn("find_node", FindNodeProcess(lookup), resolver);
    }

    /// Iterative lookup of the values stored under `key`.
    pub fn find_value(&mut self, key: Kuid) -> DhtFuture<FindValueResult> {
        let (resolver, future) = future::channel();
        self.start_find_value(key, resolver);
        future
    }

    pub(crate) fn start_find_value(&mut self, key: Kuid, resolver: Resolver<FindValueResult>) {
        let lookup = Lookup::new(&self.ctx, LookupType::FindValue, key, None);
        self.spawn("find_value", FindValueProcess(lookup), resolver);
    }

    /// Stores `values`, all under the same primary key, at the k closest nodes to that key.
    pub fn put(&mut self, values: Vec<DhtValue>) -> DhtFuture<StoreResult> {
        let (resolver, future) = future::channel();
        self.start_put(values, resolver);
        future
    }

    pub(crate) fn start_put(&mut self, values: Vec<DhtValue>, resolver: Resolver<StoreResult>) {
        match PutProcess::new(&self.ctx, values) {
            Ok(process) => {
                self.spawn("put", process, resolver);
            }
            Err(error) => {
                resolver.resolve(Err(error));
            }
        }
    }

    /// Stores `values` at the given contacts, a contact without token gets an error status.
    pub fn store(
        &mut self,
        contacts: Vec<(Contact, Option<SecurityToken>)>,
        values: Vec<DhtValue>,
    ) -> DhtFuture<StoreResult> {
        let (resolver, future) = future::channel();
        let process = StoreProcess::new(contacts, values, self.ctx.config.parallel_stores);
        self.spawn("store", process, resolver);
        future
    }

    /// Asks `contact` for the token needed to store values at it.
    pub fn security_token(&mut self, contact: &Contact) -> DhtFuture<Option<SecurityToken>> {
        let (resolver, future) = future::channel();
        self.spawn(
            "security_token",
            SecurityTokenProcess::new(contact.clone()),
            resolver,
        );
        future
    }

    /// Joins the network through the first of `addresses` to answer a ping.
    ///
    /// Cancels a bootstrap that is still running.
    pub fn bootstrap(&mut self, addresses: &[SocketAddr]) -> DhtFuture<BootstrapResult> {
        let (resolver, future) = future::channel();
        self.start_bootstrap(addresses, resolver);
        future
    }

    pub(crate) fn start_bootstrap(
        &mut self,
        addresses: &[SocketAddr],
        resolver: Resolver<BootstrapResult>,
    ) {
        self.cancel_bootstrap();

        let process = BootstrapProcess::from_addresses(&self.ctx, addresses);
        self.bootstrap = Some(self.spawn("bootstrap", process, resolver));
    }

    /// Joins the network through a known contact, skipping the seed ping.
    pub fn bootstrap_from(&mut self, contact: Contact) -> DhtFuture<BootstrapResult> {
        let (resolver, future) = future::channel();
        self.start_bootstrap_from(contact, resolver);
        future
    }

    pub(crate) fn start_bootstrap_from(
        &mut self,
        contact: Contact,
        resolver: Resolver<BootstrapResult>,
    ) {
        self.cancel_bootstrap();

        match BootstrapProcess::from_contact(&self.ctx, contact) {
            Ok(process) => {
                self.bootstrap = Some(self.spawn("bootstrap", process, resolver));
            }
            Err(error) => {
                resolver.resolve(Err(error));
            }
        }
    }

    /// Advances the engine once.
    ///
    /// Returns `true` if any message arrived or any request timed out.
    pub fn tick(&mut self) -> bool {
        let mut busy = false;

        for _ in 0..self.ctx.config.max_messages_per_tick {
            let Some((message, from)) = self.ctx.dispatcher.recv() else {
                break;
            };

            busy = true;
            self.handle_message(message, from);
        }

        let now = self.ctx.now();

        for request in self.ctx.dispatcher.poll_timeouts(now) {
            busy = true;

            let handle = &request.handle;
            self.ctx
                .route_table
                .handle_failure(handle.contact_id.as_ref(), handle.address);

            let elapsed = now.saturating_duration_since(handle.sent_at);
            self.with_operation(request.owner, |operation, ctx| {
                operation.handle(ctx, Event::Timeout { handle, elapsed })
            });
        }

        let ids: Vec<OperationId> = self.operations.keys().copied().collect();
        for id in ids {
            self.with_operation(id, |operation, ctx| {
                operation.handle(ctx, Event::Tick { now })
            });
        }

        self.cleanup();

        busy
    }

    // === Private Methods ===

    fn spawn<P: Process + 'static>(
        &mut self,
        name: &'static str,
        process: P,
        resolver: Resolver<P::Output>,
    ) -> OperationId {
        let id = self.next_operation;
        self.next_operation += 1;

        trace!(operation = name, id, "Starting operation");

        let mut task = Task::new(name, process, resolver);
        self.ctx.current = id;
        task.start(&mut self.ctx);

        self.operations.insert(id, Box::new(task));

        id
    }

    fn with_operation(
        &mut self,
        id: OperationId,
        callback: impl FnOnce(&mut dyn ResponseHandler, &mut Context),
    ) {
        if let Some(operation) = self.operations.get_mut(&id) {
            self.ctx.current = id;
            callback(operation.as_mut(), &mut self.ctx);
        }
    }

    /// Stops and forgets resolved operations, including those cancelled by their caller.
    fn cleanup(&mut self) {
        let done: Vec<OperationId> = self
            .operations
            .iter()
            .filter(|(_, operation)| operation.is_done())
            .map(|(id, _)| *id)
            .collect();

        for id in done {
            if let Some(mut operation) = self.operations.remove(&id) {
                self.ctx.current = id;
                operation.stop(&mut self.ctx);
            }

            if self.bootstrap == Some(id) {
                self.bootstrap = None;
            }
        }
    }

    fn cancel_bootstrap(&mut self) {
        let Some(id) = self.bootstrap.take() else {
            return;
        };

        if let Some(mut operation) = self.operations.remove(&id) {
            debug!(id, "Cancelling the running bootstrap");

            self.ctx.current = id;
            operation.cancel(&mut self.ctx);
        }
    }

    fn handle_message(&mut self, mut message: Message, from: SocketAddr) {
        message.contact.set_address(from);

        // Only a colliding node answering our collision ping may claim our id.
        if message.contact.id() == self.ctx.local_node().id()
            && !matches!(message.as_response(), Some(ResponseSpecific::Pong { .. }))
        {
            debug!(?from, "Dropping a message claiming the local id");
            return;
        }

        let now = self.ctx.now();

        let Some(inbound) = self.ctx.dispatcher.handle_message(message, from, now) else {
            return;
        };

        match inbound {
            Inbound::Request(request) => {
                self.learn(&request.contact, None);

                if self.ctx.config.firewalled {
                    trace!(?from, "Firewalled, ignoring request");
                    return;
                }

                server::handle_request(&mut self.ctx, request, from);
            }
            Inbound::Response {
                owner,
                handle,
                response,
                rtt,
            } => {
                self.learn(&response.contact, Some(rtt));

                self.with_operation(owner, |operation, ctx| {
                    operation.handle(
                        ctx,
                        Event::Response {
                            handle: &handle,
                            response: &response,
                            rtt,
                        },
                    )
                });
            }
            Inbound::IllegalResponse {
                owner,
                handle,
                response,
            } => {
                self.with_operation(owner, |operation, ctx| {
                    operation.handle(
                        ctx,
                        Event::IllegalResponse {
                            handle: &handle,
                            response: &response,
                        },
                    )
                });
            }
            Inbound::LateResponse(response) => {
                self.learn(&response.contact, None);
            }
        }
    }

    /// Adds the sender of a message to the routing table as a live contact.
    fn learn(&mut self, sender: &Contact, rtt: Option<Duration>) {
        if sender.is_firewalled() || sender.id() == self.ctx.local_node().id() {
            return;
        }

        let mut contact = Contact::alive(*sender.id(), sender.address(), sender.instance_id(), false);
        if let Some(rtt) = rtt {
            contact.set_rtt(rtt);
        }

        if self.ctx.config.store_forward && self.ctx.bootstrapped {
            let rejoined = match self.ctx.route_table.get(contact.id()) {
                None => true,
                Some(existing) => {
                    existing.is_dead() || existing.instance_id() != contact.instance_id()
                }
            };

            if rejoined {
                self.store_forward(&contact);
            }
        }

        self.ctx.route_table.add(contact);
    }

    /// Must run before `contact` is added to the routing table.
    fn store_forward(&mut self, contact: &Contact) {
        let values = {
            let mut database = lock_database(&self.ctx.database);

            store_forward::forward_values(
                self.ctx.route_table.as_ref(),
                &mut *database,
                contact,
                self.ctx.config.k,
                self.ctx.config.delete_value_if_furthest_node,
            )
        };

        if values.is_empty() {
            return;
        }

        debug!(?contact, values = values.len(), "Forwarding values");

        let (resolver, _) = future::channel();
        let process = ForwardProcess::new(
            contact.clone(),
            None,
            values,
            self.ctx.config.parallel_stores,
        );
        self.spawn("store_forward", process, resolver);
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::common::{MessageType, StoreStatusCode};

    struct Node {
        rpc: Rpc,
        transport_address: SocketAddr,
    }

    fn node(network: &MemoryNetwork, clock: &ManualClock, config: Config) -> Node {
        let transport = network.transport();
        let transport_address = transport.local_addr();
        let rpc = Rpc::with_clock(config, Box::new(transport), Arc::new(clock.clone())).unwrap();

        Node {
            rpc,
            transport_address,
        }
    }

    fn run(nodes: &mut [&mut Rpc]) {
        for _ in 0..50 {
            let mut busy = false;
            for rpc in nodes.iter_mut() {
                busy |= rpc.tick();
            }
            if !busy {
                return;
            }
        }
    }

    #[test]
    fn ping_between_nodes() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let mut b = node(&network, &clock, Config::default());

        let future = a.rpc.ping(b.transport_address);
        run(&mut [&mut a.rpc, &mut b.rpc]);

        let pong = future.get().unwrap();
        assert_eq!(pong.contact.id(), b.rpc.local_node().id());
        assert_eq!(pong.external_address, a.transport_address);

        // Both sides learned each other.
        assert!(a.rpc.route_table().get(b.rpc.local_node().id()).is_some());
        assert!(b.rpc.route_table().get(a.rpc.local_node().id()).is_some());
        assert_eq!(a.rpc.active_operations(), 0);
    }

    #[test]
    fn timeout_reports_failure_to_route_table() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let b = node(&network, &clock, Config::default());

        let contact = b.rpc.local_node().clone();
        a.rpc.ctx.route_table.add(contact.clone());
        network.set_down(b.transport_address, true);

        let future = a.rpc.ping_contact(&contact);
        a.rpc.tick();
        assert_eq!(a.rpc.pending_requests(), 1);

        clock.advance(Duration::from_secs(6));
        a.rpc.tick();

        assert!(matches!(future.get(), Err(Error::Timeout(_))));
        assert_eq!(a.rpc.route_table().get(contact.id()).unwrap().failures(), 1);
        assert_eq!(a.rpc.stats().timeouts, 1);
    }

    #[test]
    fn cancelled_operation_releases_requests() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let b = node(&network, &clock, Config::default());
        network.set_down(b.transport_address, true);

        let future = a.rpc.ping(b.transport_address);
        assert_eq!(a.rpc.pending_requests(), 1);

        assert!(future.cancel());
        a.rpc.tick();

        assert_eq!(a.rpc.pending_requests(), 0);
        assert_eq!(a.rpc.active_operations(), 0);
        assert!(matches!(future.get(), Err(Error::Cancelled)));
    }

    #[test]
    fn unbind_fails_pending_requests() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let b = node(&network, &clock, Config::default());
        network.set_down(b.transport_address, true);

        let future = a.rpc.ping(b.transport_address);
        let transport = a.rpc.unbind();

        assert!(transport.is_some());
        assert!(matches!(future.get(), Err(Error::NotBound)));
        assert!(matches!(
            a.rpc.ping(b.transport_address).get(),
            Err(Error::NotBound)
        ));

        a.rpc.bind(transport.unwrap()).unwrap();
        assert!(a.rpc.local_addr().is_some());
    }

    #[test]
    fn close_cancels_everything() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let b = node(&network, &clock, Config::default());
        network.set_down(b.transport_address, true);

        let ping = a.rpc.ping(b.transport_address);
        let bootstrap = a.rpc.bootstrap(&[b.transport_address]);
        a.rpc.close();

        assert!(matches!(ping.get(), Err(Error::Cancelled)));
        assert!(matches!(bootstrap.get(), Err(Error::Cancelled)));
        assert_eq!(a.rpc.active_operations(), 0);
        assert!(matches!(
            a.rpc.bind(Box::new(network.transport())),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn new_bootstrap_cancels_running_one() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let b = node(&network, &clock, Config::default());
        network.set_down(b.transport_address, true);

        let first = a.rpc.bootstrap(&[b.transport_address]);
        let second = a.rpc.bootstrap(&[b.transport_address]);

        assert!(matches!(first.get(), Err(Error::Cancelled)));
        assert!(!second.is_done());
        assert_eq!(a.rpc.active_operations(), 1);
    }

    #[test]
    fn bootstrap_from_self_is_invalid() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());

        let local = a.rpc.local_node().clone();
        assert!(matches!(
            a.rpc.bootstrap_from(local).get(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn put_rejects_mixed_keys() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let creator = *a.rpc.local_node().id();

        let values = vec![
            DhtValue::new(Kuid::random(), creator, Bytes::from_static(b"a")),
            DhtValue::new(Kuid::random(), creator, Bytes::from_static(b"b")),
        ];

        assert!(matches!(a.rpc.put(values).get(), Err(Error::InvalidArgument(_))));
        assert!(matches!(a.rpc.put(vec![]).get(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn put_without_peers_stores_locally() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let creator = *a.rpc.local_node().id();
        let value = DhtValue::new(Kuid::random(), creator, Bytes::from_static(b"a"));

        let future = a.rpc.put(vec![value.clone()]);
        a.rpc.tick();

        let result = future.get().unwrap();
        assert_eq!(result.stored_at().count(), 1);
        assert_eq!(
            a.rpc.database().lock().unwrap().get(value.primary_key()),
            vec![value]
        );
    }

    #[test]
    fn messages_claiming_local_id_are_dropped() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let mut impostor = network.transport();

        let request = Message::request(
            MessageId::random(),
            a.rpc.local_node().clone(),
            RequestSpecific::Ping,
        );
        impostor
            .send(a.transport_address, &request)
            .unwrap();
        a.rpc.tick();

        assert!(impostor.recv().is_none());
        assert_eq!(a.rpc.stats().messages_received, 0);
    }

    #[test]
    fn store_forward_to_new_close_contact() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let mut b = node(&network, &clock, Config::default());

        // `a` holds a value and is bootstrapped, `b` introduces itself with a ping.
        let creator = *a.rpc.local_node().id();
        let value = DhtValue::new(Kuid::random(), creator, Bytes::from_static(b"forward me"));
        a.rpc.database().lock().unwrap().store(value.clone());
        a.rpc.ctx.bootstrapped = true;

        let future = b.rpc.ping(a.transport_address);
        run(&mut [&mut a.rpc, &mut b.rpc]);
        assert!(future.get().is_ok());

        assert_eq!(
            b.rpc.database().lock().unwrap().get(value.primary_key()),
            vec![value]
        );
        assert!(a.rpc.stats().requests_sent >= 2);
    }

    #[test]
    fn late_response_still_learns_sender() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let mut peer = network.transport();

        a.rpc.ping(peer.local_addr());
        let (request, _) = peer.recv().unwrap();
        assert!(matches!(request.message_type, MessageType::Request(_)));

        clock.advance(Duration::from_secs(6));
        a.rpc.tick();

        let contact = Contact::alive(Kuid::random(), peer.local_addr(), 0, false);
        let response = Message::response(
            request.message_id,
            contact.clone(),
            ResponseSpecific::Pong {
                external_address: a.transport_address,
            },
        );
        peer.send(a.transport_address, &response).unwrap();
        a.rpc.tick();

        assert_eq!(a.rpc.stats().late_responses, 1);
        assert!(a.rpc.route_table().get(contact.id()).is_some());
    }

    #[test]
    fn info_reflects_state() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let a = node(&network, &clock, Config::default());

        let info = a.rpc.info();
        assert_eq!(info.id(), a.rpc.local_node().id());
        assert_eq!(info.local_addr(), Some(a.transport_address));
        assert!(!info.bootstrapped());
        assert_eq!(info.routing_table_size(), 0);
        assert_eq!(info.database_size(), 0);
        assert_eq!(info.active_operations(), 0);
    }

    #[test]
    fn statuses_are_kept_per_contact() {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new();
        let mut a = node(&network, &clock, Config::default());
        let local = a.rpc.local_node().clone();
        let value = DhtValue::new(Kuid::random(), *local.id(), Bytes::from_static(b"a"));

        let stranger = Contact::alive(Kuid::random(), ([127, 0, 0, 1], 1).into(), 0, false);
        let future = a.rpc.store(vec![(local.clone(), None), (stranger.clone(), None)], vec![value]);
        a.rpc.tick();

        let result = future.get().unwrap();
        assert_eq!(result.locations.len(), 2);
        assert_eq!(result.statuses[local.id()][0].code, StoreStatusCode::Ok);
        assert_eq!(result.statuses[stranger.id()][0].code, StoreStatusCode::Error);
    }
}
