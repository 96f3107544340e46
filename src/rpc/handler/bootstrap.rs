//! Joining the network: ping a seed, look ourselves up, rule out id
//! collisions, then refresh every bucket.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::common::{Contact, Kuid, Message, MessageId};
use crate::rpc::dispatcher::RequestHandle;
use crate::rpc::handler::lookup::{Lookup, LookupType};
use crate::rpc::handler::ping::PingProcess;
use crate::rpc::handler::{advance, deliver, Event, Process, Step};
use crate::rpc::Context;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct BootstrapResult {
    /// The contact we bootstrapped from.
    pub contact: Contact,
    /// Time spent finding the network, up to the end of the self lookup.
    pub find_network: Duration,
    /// Time spent refreshing buckets.
    pub refresh: Duration,
    pub refreshed_buckets: usize,
    pub failed_refreshes: usize,
}

#[derive(Debug)]
enum Phase {
    PingSeed(PingProcess),
    FindSelf { contact: Contact, lookup: Lookup },
    CheckCollisions { contact: Contact, ping: PingProcess },
    RefreshBuckets { contact: Contact, refresh: Refresh },
}

#[derive(Debug)]
pub(crate) struct BootstrapProcess {
    phase: Phase,
    started_at: Instant,
    find_network: Duration,
}

impl BootstrapProcess {
    /// Bootstraps from the first of `addresses` to answer a ping.
    pub fn from_addresses(ctx: &Context, addresses: &[SocketAddr]) -> Self {
        Self {
            phase: Phase::PingSeed(PingProcess::addresses(
                addresses,
                ctx.config.find_node_parallelism,
            )),
            started_at: ctx.now(),
            find_network: Duration::ZERO,
        }
    }

    pub fn from_contact(ctx: &Context, contact: Contact) -> Result<Self> {
        if contact.id() == ctx.local_node().id() {
            return Err(Error::InvalidArgument("can not bootstrap from the local node"));
        }

        Ok(Self {
            phase: find_self(ctx, contact),
            started_at: ctx.now(),
            find_network: Duration::ZERO,
        })
    }

    fn step(&mut self, ctx: &mut Context, event: Option<Event<'_>>) -> Step<BootstrapResult> {
        match &mut self.phase {
            Phase::PingSeed(ping) => {
                let Some(pong) = advance(ping, ctx, event)? else {
                    return Ok(None);
                };

                debug!(contact = ?pong.contact, "Bootstrap seed answered");
                self.phase = find_self(ctx, pong.contact);
                self.step(ctx, None)
            }
            Phase::FindSelf { contact, lookup } => {
                let Some(outcome) = advance(lookup, ctx, event)? else {
                    return Ok(None);
                };
                let contact = contact.clone();

                self.find_network = ctx.now().saturating_duration_since(self.started_at);

                let local_id = *ctx.local_node().id();
                if !outcome
                    .state
                    .contacts
                    .iter()
                    .any(|(found, _)| found.id() != &local_id)
                {
                    return Err(Error::NoSuchNode(local_id));
                }

                if outcome.state.collisions.is_empty() {
                    self.phase = refresh_buckets(ctx, contact);
                } else {
                    debug!(collisions = ?outcome.state.collisions, "Checking id collisions");

                    let local = ctx.local_node();
                    // Pretend to be someone else, or a colliding node would drop our ping.
                    let sender = Contact::alive(
                        local.id().invert(),
                        local.address(),
                        local.instance_id(),
                        true,
                    );

                    self.phase = Phase::CheckCollisions {
                        contact,
                        ping: PingProcess::contacts(
                            &outcome.state.collisions,
                            ctx.config.find_node_parallelism,
                        )
                        .with_sender(sender),
                    };
                }

                self.step(ctx, None)
            }
            Phase::CheckCollisions { contact, ping } => match advance(ping, ctx, event) {
                Ok(None) => Ok(None),
                Ok(Some(pong)) => Err(Error::Collision(pong.contact)),
                Err(Error::Timeout(_)) => {
                    let contact = contact.clone();
                    self.phase = refresh_buckets(ctx, contact);
                    self.step(ctx, None)
                }
                Err(error) => Err(error),
            },
            Phase::RefreshBuckets { contact, refresh } => {
                if !refresh.step(ctx, event) {
                    return Ok(None);
                }

                ctx.bootstrapped = true;

                let result = BootstrapResult {
                    contact: contact.clone(),
                    find_network: self.find_network,
                    refresh: ctx.now().saturating_duration_since(refresh.started_at),
                    refreshed_buckets: refresh.refreshed,
                    failed_refreshes: refresh.failed,
                };
                info!(
                    contact = ?result.contact,
                    refreshed = result.refreshed_buckets,
                    failed = result.failed_refreshes,
                    "Bootstrapped"
                );

                Ok(Some(result))
            }
        }
    }
}

fn find_self(ctx: &Context, contact: Contact) -> Phase {
    let local_id = *ctx.local_node().id();
    let lookup = Lookup::new(ctx, LookupType::FindNode, local_id, Some(vec![contact.clone()]));

    Phase::FindSelf { contact, lookup }
}

fn refresh_buckets(ctx: &mut Context, contact: Contact) -> Phase {
    let ids = ctx.route_table.refresh_ids(true);
    debug!(buckets = ids.len(), "Refreshing buckets");

    Phase::RefreshBuckets {
        contact,
        refresh: Refresh {
            ids: ids.into(),
            lookups: vec![],
            parallelism: ctx.config.find_node_parallelism.max(1),
            started_at: ctx.now(),
            refreshed: 0,
            failed: 0,
        },
    }
}

#[derive(Debug)]
/// Lookups of random ids, a few at a time. Individual failures are only counted.
struct Refresh {
    ids: VecDeque<Kuid>,
    lookups: Vec<Lookup>,
    parallelism: usize,
    started_at: Instant,
    refreshed: usize,
    failed: usize,
}

impl Refresh {
    /// Returns `true` once every lookup finished.
    fn step(&mut self, ctx: &mut Context, event: Option<Event<'_>>) -> bool {
        match event {
            None => {}
            Some(Event::Tick { now }) => {
                let mut index = 0;
                while index < self.lookups.len() {
                    let step = self.lookups[index].on_tick(ctx, now);
                    if self.finish(index, step) {
                        continue;
                    }
                    index += 1;
                }
            }
            Some(event) => {
                let owner = event
                    .message_id()
                    .and_then(|id| self.lookups.iter().position(|lookup| lookup.inflight(id)));

                if let Some(index) = owner {
                    let step = deliver(&mut self.lookups[index], ctx, event);
                    self.finish(index, step);
                }
            }
        }

        while self.lookups.len() < self.parallelism {
            let Some(id) = self.ids.pop_front() else {
                break;
            };

            let mut lookup = Lookup::new(ctx, LookupType::FindNode, id, None);
            let step = lookup.start(ctx);
            self.lookups.push(lookup);
            self.finish(self.lookups.len() - 1, step);
        }

        self.lookups.is_empty() && self.ids.is_empty()
    }

    /// Removes the lookup at `index` if `step` ended it.
    fn finish<T>(&mut self, index: usize, step: Step<T>) -> bool {
        match step {
            Ok(None) => return false,
            Ok(Some(_)) => self.refreshed += 1,
            Err(error) => {
                debug!(key = ?self.lookups[index].key(), ?error, "Bucket refresh failed");
                self.failed += 1;
            }
        }

        self.lookups.swap_remove(index);
        true
    }
}

impl Process for BootstrapProcess {
    type Output = BootstrapResult;

    fn start(&mut self, ctx: &mut Context) -> Step<BootstrapResult> {
        self.step(ctx, None)
    }

    fn on_response(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        response: &Message,
        rtt: Duration,
    ) -> Step<BootstrapResult> {
        self.step(
            ctx,
            Some(Event::Response {
                handle,
                response,
                rtt,
            }),
        )
    }

    fn on_timeout(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        elapsed: Duration,
    ) -> Step<BootstrapResult> {
        self.step(ctx, Some(Event::Timeout { handle, elapsed }))
    }

    fn on_illegal_response(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        response: &Message,
    ) -> Step<BootstrapResult> {
        self.step(ctx, Some(Event::IllegalResponse { handle, response }))
    }

    fn on_exception(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        error: Error,
    ) -> Step<BootstrapResult> {
        self.step(ctx, Some(Event::Exception { handle, error }))
    }

    fn on_tick(&mut self, ctx: &mut Context, now: Instant) -> Step<BootstrapResult> {
        match self.phase {
            Phase::FindSelf { .. } | Phase::RefreshBuckets { .. } => {
                self.step(ctx, Some(Event::Tick { now }))
            }
            Phase::PingSeed(_) | Phase::CheckCollisions { .. } => Ok(None),
        }
    }

    fn inflight(&self, message_id: &MessageId) -> bool {
        match &self.phase {
            Phase::PingSeed(ping) | Phase::CheckCollisions { ping, .. } => ping.inflight(message_id),
            Phase::FindSelf { lookup, .. } => lookup.inflight(message_id),
            Phase::RefreshBuckets { refresh, .. } => refresh
                .lookups
                .iter()
                .any(|lookup| lookup.inflight(message_id)),
        }
    }

    fn stop(&mut self, ctx: &mut Context) {
        match &mut self.phase {
            Phase::PingSeed(ping) | Phase::CheckCollisions { ping, .. } => ping.stop(ctx),
            Phase::FindSelf { lookup, .. } => lookup.stop(ctx),
            Phase::RefreshBuckets { refresh, .. } => {
                for lookup in refresh.lookups.iter_mut() {
                    lookup.stop(ctx);
                }
            }
        }
    }
}
