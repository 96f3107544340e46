//! AsyncDht node.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::common::{Contact, DhtValue, Kuid};
use crate::dht::{ActorMessage, Dht};
use crate::rpc::{
    BootstrapResult, FindNodeResult, FindValueResult, Info, PingResult, StoreResult,
};
use crate::{Error, Result};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
pub struct AsyncDht(Dht);

impl AsyncDht {
    /// Returns the blocking version of this node.
    pub fn as_sync(self) -> Dht {
        self.0
    }

    // === Getters ===

    /// Information and statistics about this [Dht] node.
    pub async fn info(&self) -> Result<Info> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0
             .0
            .send(ActorMessage::Info(sender))
            .map_err(|_| Error::Shutdown)?;

        receiver.recv_async().await.map_err(|_| Error::Shutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0 .0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    pub async fn ping(&self, address: SocketAddr) -> Result<PingResult> {
        self.0.ping(address).recv_async().await
    }

    pub async fn bootstrap(&self, addresses: &[SocketAddr]) -> Result<BootstrapResult> {
        self.0.bootstrap(addresses).recv_async().await
    }

    pub async fn bootstrap_from(&self, contact: Contact) -> Result<BootstrapResult> {
        self.0.bootstrap_from(contact).recv_async().await
    }

    pub async fn find_node(&self, key: Kuid) -> Result<FindNodeResult> {
        self.0.find_node(key).recv_async().await
    }

    pub async fn get(&self, key: Kuid) -> Result<FindValueResult> {
        self.0.get(key).recv_async().await
    }

    pub async fn put(&self, key: Kuid, value: Bytes) -> Result<StoreResult> {
        self.0.put(key, value).recv_async().await
    }

    /// Store `value` under the SHA1 of its bytes, returns that key.
    pub async fn put_immutable(&self, value: Bytes) -> Result<Kuid> {
        let (key, future) = self.0.put_immutable(value);
        future.recv_async().await?;

        Ok(key)
    }

    pub async fn put_values(&self, values: Vec<DhtValue>) -> Result<StoreResult> {
        self.0.put_values(values).recv_async().await
    }
}
