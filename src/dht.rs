//! Dht node.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::common::{Contact, DhtValue, Kuid, SharedDatabase};
use crate::rpc::future::{self, Resolver};
use crate::rpc::{
    BootstrapResult, Clock, Config, DhtFuture, FindNodeResult, FindValueResult, Info,
    MemoryNetwork, PingResult, Rpc, StoreResult, SystemClock, Transport, UdpTransport,
};
use crate::{Error, Result};

/// How long the actor waits for a command when the network is quiet.
const IDLE_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
/// Mojito Dht node, a handle to an [Rpc] running in its own thread.
///
/// The thread stops once every clone of this handle is dropped, or on [Dht::shutdown].
pub struct Dht(pub(crate) Sender<ActorMessage>);

pub struct DhtBuilder {
    config: Config,
    bootstrap: Vec<SocketAddr>,
    transport: Option<Box<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    database: Option<SharedDatabase>,
}

impl Default for DhtBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            bootstrap: vec![],
            transport: None,
            clock: None,
            database: None,
        }
    }
}

impl std::fmt::Debug for DhtBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhtBuilder")
            .field("config", &self.config)
            .field("bootstrap", &self.bootstrap)
            .finish()
    }
}

impl DhtBuilder {
    /// Replace the whole [Config].
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set this node's id, random by default.
    pub fn id(mut self, id: Kuid) -> Self {
        self.config.id = Some(id);
        self
    }

    /// Set the UDP port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    /// Set the IP address to listen on.
    pub fn bind_address(mut self, bind_address: IpAddr) -> Self {
        self.config.bind_address = Some(bind_address);
        self
    }

    /// Neither answer requests nor ask to be added to others' routing tables.
    pub fn firewalled(mut self, firewalled: bool) -> Self {
        self.config.firewalled = firewalled;
        self
    }

    pub fn k(mut self, k: usize) -> Self {
        self.config.k = k;
        self
    }

    /// Set the concurrent requests of lookups, alpha.
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.config.find_node_parallelism = parallelism;
        self.config.find_value_parallelism = parallelism;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = request_timeout;
        self
    }

    pub fn store_forward(mut self, store_forward: bool) -> Self {
        self.config.store_forward = store_forward;
        self
    }

    /// Addresses to bootstrap from once the node started.
    pub fn bootstrap(mut self, bootstrap: &[SocketAddr]) -> Self {
        self.bootstrap = bootstrap.to_vec();
        self
    }

    /// Use `transport` instead of a UDP socket.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Store values in `database` instead of a fresh in-memory one.
    pub fn database(mut self, database: SharedDatabase) -> Self {
        self.database = Some(database);
        self
    }

    /// Create a Dht node.
    pub fn build(self) -> Result<Dht> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(UdpTransport::with_options(
                self.config.bind_address,
                self.config.port,
            )?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut rpc = Rpc::with_clock(self.config, transport, clock)?;
        if let Some(database) = self.database {
            rpc = rpc.with_database(database);
        }

        let (sender, receiver) = flume::unbounded();
        let bootstrap = self.bootstrap;

        thread::Builder::new()
            .name("mojito-dht".to_string())
            .spawn(move || run(rpc, receiver, bootstrap))?;

        Ok(Dht(sender))
    }
}

impl Dht {
    /// Returns a builder to edit settings before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    /// Create a new Dht node listening on UDP with the given config.
    pub fn new(config: Config) -> Result<Self> {
        Dht::builder().config(config).build()
    }

    // === Getters ===

    /// Information and statistics about this node.
    pub fn info(&self) -> Result<Info> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0
            .send(ActorMessage::Info(sender))
            .map_err(|_| Error::Shutdown)?;

        receiver.recv().map_err(|_| Error::Shutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop, pending operations resolve with [Error::Cancelled].
    pub fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    pub fn ping(&self, address: SocketAddr) -> DhtFuture<PingResult> {
        self.request(|resolver| ActorMessage::Ping(address, resolver))
    }

    /// Joins the network through the first of `addresses` to answer.
    pub fn bootstrap(&self, addresses: &[SocketAddr]) -> DhtFuture<BootstrapResult> {
        let addresses = addresses.to_vec();
        self.request(|resolver| ActorMessage::Bootstrap(addresses, resolver))
    }

    pub fn bootstrap_from(&self, contact: Contact) -> DhtFuture<BootstrapResult> {
        self.request(|resolver| ActorMessage::BootstrapFrom(contact, resolver))
    }

    /// Find the k closest nodes to `key`.
    pub fn find_node(&self, key: Kuid) -> DhtFuture<FindNodeResult> {
        self.request(|resolver| ActorMessage::FindNode(key, resolver))
    }

    /// Find the values stored under `key`.
    pub fn get(&self, key: Kuid) -> DhtFuture<FindValueResult> {
        self.request(|resolver| ActorMessage::Get(key, resolver))
    }

    /// Store `value` under `key`, created by this node.
    pub fn put(&self, key: Kuid, value: Bytes) -> DhtFuture<StoreResult> {
        self.request(|resolver| ActorMessage::Put(key, value, resolver))
    }

    /// Store `value` under the SHA1 of its bytes, returns that key.
    pub fn put_immutable(&self, value: Bytes) -> (Kuid, DhtFuture<StoreResult>) {
        let key = Kuid::sha1(&value);

        (key, self.put(key, value))
    }

    /// Store values that all share the same primary key.
    pub fn put_values(&self, values: Vec<DhtValue>) -> DhtFuture<StoreResult> {
        self.request(|resolver| ActorMessage::PutValues(values, resolver))
    }

    // === Private Methods ===

    fn request<T>(&self, message: impl FnOnce(Resolver<T>) -> ActorMessage) -> DhtFuture<T> {
        let (resolver, future) = future::channel();

        // A dropped message drops its resolver, resolving the future with [Error::Shutdown].
        let _ = self.0.send(message(resolver));

        future
    }
}

fn run(mut rpc: Rpc, receiver: Receiver<ActorMessage>, bootstrap: Vec<SocketAddr>) {
    let mut initial_bootstrap = (!bootstrap.is_empty()).then(|| rpc.bootstrap(&bootstrap));

    loop {
        let busy = rpc.tick();

        if let Some(result) = initial_bootstrap.as_ref().and_then(|future| future.try_get()) {
            match result {
                Ok(result) => debug!(contact = ?result.contact, "Initial bootstrap done"),
                Err(error) => warn!(?error, "Initial bootstrap failed"),
            }
            initial_bootstrap = None;
        }

        let message = if busy {
            match receiver.try_recv() {
                Ok(message) => Some(message),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match receiver.recv_timeout(IDLE_TIMEOUT) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        match message {
            Some(ActorMessage::Shutdown(sender)) => {
                rpc.close();
                info!("Mojito node was shutdown");
                let _ = sender.send(());
                return;
            }
            Some(message) => handle(&mut rpc, message),
            None => {}
        }
    }

    debug!("Dht dropped, closing the actor thread");
    rpc.close();
}

fn handle(rpc: &mut Rpc, message: ActorMessage) {
    match message {
        ActorMessage::Info(sender) => {
            let _ = sender.send(rpc.info());
        }
        ActorMessage::Ping(address, resolver) => rpc.start_ping(address, resolver),
        ActorMessage::Bootstrap(addresses, resolver) => rpc.start_bootstrap(&addresses, resolver),
        ActorMessage::BootstrapFrom(contact, resolver) => {
            rpc.start_bootstrap_from(contact, resolver)
        }
        ActorMessage::FindNode(key, resolver) => rpc.start_find_node(key, resolver),
        ActorMessage::Get(key, resolver) => rpc.start_find_value(key, resolver),
        ActorMessage::Put(key, value, resolver) => {
            let value = DhtValue::new(key, *rpc.local_node().id(), value);
            rpc.start_put(vec![value], resolver)
        }
        ActorMessage::PutValues(values, resolver) => rpc.start_put(values, resolver),
        ActorMessage::Shutdown(_) => {}
    }
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Info(Sender<Info>),
    Shutdown(Sender<()>),
    Ping(SocketAddr, Resolver<PingResult>),
    Bootstrap(Vec<SocketAddr>, Resolver<BootstrapResult>),
    BootstrapFrom(Contact, Resolver<BootstrapResult>),
    FindNode(Kuid, Resolver<FindNodeResult>),
    Get(Kuid, Resolver<FindValueResult>),
    Put(Kuid, Bytes, Resolver<StoreResult>),
    PutValues(Vec<DhtValue>, Resolver<StoreResult>),
}

/// Create a testnet of Dht nodes over an in-memory network.
#[derive(Debug)]
pub struct Testnet {
    pub bootstrap: Vec<SocketAddr>,
    pub nodes: Vec<Dht>,
    network: MemoryNetwork,
}

impl Testnet {
    /// Starts `count` nodes, every node after the first bootstraps off the first one.
    pub fn new(count: usize) -> Result<Testnet> {
        let network = MemoryNetwork::new();
        let mut nodes: Vec<Dht> = vec![];
        let mut bootstrap = vec![];

        for i in 0..count {
            let transport = network.transport();
            let address = transport.local_addr();
            let node = Dht::builder().transport(Box::new(transport)).build()?;

            if i == 0 {
                bootstrap.push(address);
            } else {
                node.bootstrap(&bootstrap).get()?;
            }

            nodes.push(node)
        }

        Ok(Self {
            bootstrap,
            nodes,
            network,
        })
    }

    /// The network the nodes talk over, to add more nodes to it.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Returns a builder for a node on this testnet that bootstraps off it.
    pub fn builder(&self) -> DhtBuilder {
        Dht::builder()
            .transport(Box::new(self.network.transport()))
            .bootstrap(&self.bootstrap)
    }
}
