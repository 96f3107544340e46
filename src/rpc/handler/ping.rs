use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::common::{
    Contact, Kuid, MaxStack, Message, MessageId, RequestKind, RequestSpecific, ResponseSpecific,
};
use crate::error::RequestTimeout;
use crate::rpc::dispatcher::RequestHandle;
use crate::rpc::handler::{Process, Step};
use crate::rpc::Context;
use crate::Error;

#[derive(Debug, Clone)]
pub struct PingResult {
    /// The contact that answered.
    pub contact: Contact,
    pub rtt: Duration,
    /// The address the responder saw us at.
    pub external_address: SocketAddr,
}

#[derive(Debug, Clone)]
struct Target {
    id: Option<Kuid>,
    address: SocketAddr,
}

#[derive(Debug)]
/// Pings targets, up to `parallelism` at once, until the first one answers.
///
/// Fails with the last timeout once every target failed.
pub(crate) struct PingProcess {
    targets: VecDeque<Target>,
    /// Who we claim to be, the local node if `None`.
    sender: Option<Contact>,
    counter: MaxStack,
    inflight: HashSet<MessageId>,
    last_error: Option<Error>,
}

impl PingProcess {
    /// Pings addresses of contacts we don't know yet.
    pub fn addresses(addresses: &[SocketAddr], parallelism: usize) -> Self {
        Self::new(
            addresses
                .iter()
                .map(|address| Target {
                    id: None,
                    address: *address,
                })
                .collect(),
            parallelism,
        )
    }

    pub fn contacts(contacts: &[Contact], parallelism: usize) -> Self {
        Self::new(
            contacts
                .iter()
                .map(|contact| Target {
                    id: Some(*contact.id()),
                    address: contact.address(),
                })
                .collect(),
            parallelism,
        )
    }

    /// Sends pings as `sender` instead of the local node.
    pub fn with_sender(mut self, sender: Contact) -> Self {
        self.sender = Some(sender);
        self
    }

    fn new(targets: VecDeque<Target>, parallelism: usize) -> Self {
        Self {
            targets,
            sender: None,
            counter: MaxStack::new(parallelism.max(1)),
            inflight: HashSet::new(),
            last_error: None,
        }
    }

    fn process(&mut self, ctx: &mut Context, count: usize) -> Step<PingResult> {
        self.counter.release(count);

        while self.counter.has_free() {
            let Some(target) = self.targets.pop_front() else {
                break;
            };

            let timeout = match target.id.and_then(|id| ctx.route_table.get(&id).cloned()) {
                Some(contact) => {
                    contact.adaptive_timeout(ctx.config.min_request_timeout, ctx.config.request_timeout)
                }
                None => ctx.config.request_timeout,
            };

            let message_id = ctx.send(
                self.sender.clone(),
                target.id,
                target.address,
                RequestSpecific::Ping,
                timeout,
            )?;

            self.inflight.insert(message_id);
            self.counter.acquire();
        }

        if self.counter.is_drained() {
            return Err(self
                .last_error
                .take()
                .unwrap_or(Error::InvalidArgument("nothing to ping")));
        }

        Ok(None)
    }
}

impl Process for PingProcess {
    type Output = PingResult;

    fn start(&mut self, ctx: &mut Context) -> Step<PingResult> {
        self.process(ctx, 0)
    }

    fn on_response(
        &mut self,
        _ctx: &mut Context,
        handle: &RequestHandle,
        response: &Message,
        rtt: Duration,
    ) -> Step<PingResult> {
        if !self.inflight.remove(&handle.message_id) {
            return Ok(None);
        }

        let Some(ResponseSpecific::Pong { external_address }) = response.as_response() else {
            return Ok(None);
        };

        Ok(Some(PingResult {
            contact: response.contact.clone(),
            rtt,
            external_address: *external_address,
        }))
    }

    fn on_timeout(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        elapsed: Duration,
    ) -> Step<PingResult> {
        if !self.inflight.remove(&handle.message_id) {
            return Ok(None);
        }

        debug!(address = ?handle.address, ?elapsed, "Ping timed out");
        self.last_error = Some(Error::Timeout(RequestTimeout {
            contact_id: handle.contact_id,
            address: handle.address,
            request: RequestKind::Ping,
            elapsed,
        }));

        self.process(ctx, 1)
    }

    fn on_exception(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        error: Error,
    ) -> Step<PingResult> {
        if !self.inflight.remove(&handle.message_id) {
            return Ok(None);
        }

        debug!(address = ?handle.address, ?error, "Ping failed");
        self.last_error = Some(error);
        self.process(ctx, 1)
    }

    fn inflight(&self, message_id: &MessageId) -> bool {
        self.inflight.contains(message_id)
    }

    fn stop(&mut self, ctx: &mut Context) {
        for message_id in self.inflight.drain() {
            ctx.dispatcher.cancel(&message_id);
        }
    }
}
