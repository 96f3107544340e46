//! Iterative FIND_NODE and FIND_VALUE lookups.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::common::{
    Contact, DhtValue, Kuid, MaxStack, Message, MessageId, RequestSpecific, ResponseSpecific,
    SelectMode,
};
use crate::core::lookup_manager::{LookupManager, LookupSettings, LookupState};
use crate::rpc::dispatcher::RequestHandle;
use crate::rpc::handler::{Process, Step};
use crate::rpc::Context;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupType {
    FindNode,
    FindValue,
}

#[derive(Debug, Clone)]
pub struct FindNodeResult {
    pub state: LookupState,
}

impl FindNodeResult {
    /// The k closest contacts that answered, nearest first.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.state.contacts.iter().map(|(contact, _)| contact)
    }
}

#[derive(Debug, Clone)]
pub struct FindValueResult {
    pub values: Vec<DhtValue>,
    pub state: LookupState,
}

#[derive(Debug)]
pub(crate) struct LookupOutcome {
    pub state: LookupState,
    pub values: Vec<DhtValue>,
}

#[derive(Debug)]
/// A single iterative lookup, keeping at most `parallelism` requests in flight.
///
/// Ends once nobody is in flight and no candidate can improve the k closest,
/// or on the first values for a non-exhaustive FIND_VALUE.
pub(crate) struct Lookup {
    lookup_type: LookupType,
    manager: LookupManager,
    counter: MaxStack,
    inflight: HashSet<MessageId>,
    values: Vec<DhtValue>,
    exhaustive: bool,

    boost_frequency: Duration,
    boost_timeout: Duration,
    started_at: Instant,
    last_response: Instant,
    next_boost: Instant,
}

impl Lookup {
    /// Seeds from the routing table if `seeds` is `None`.
    pub fn new(ctx: &Context, lookup_type: LookupType, key: Kuid, seeds: Option<Vec<Contact>>) -> Self {
        let config = &ctx.config;
        let local = ctx.local_node().clone();

        let seeds = seeds.unwrap_or_else(|| {
            ctx.route_table
                .select(&key, config.k, SelectMode::Known)
                .into_iter()
                .filter(|contact| contact.id() != local.id())
                .collect()
        });

        let parallelism = match lookup_type {
            LookupType::FindNode => config.find_node_parallelism,
            LookupType::FindValue => config.find_value_parallelism,
        };

        let settings = LookupSettings {
            k: config.k,
            exhaustive: config.exhaustive,
            randomize: config.randomize,
            accept_empty_responses: config.accept_empty_find_node_responses,
            scrubber_required_ratio: config.contacts_scrubber_required_ratio,
        };

        let now = ctx.now();

        Self {
            lookup_type,
            manager: LookupManager::new(key, local, &seeds, settings),
            counter: MaxStack::new(parallelism.max(1)),
            inflight: HashSet::new(),
            values: vec![],
            exhaustive: config.exhaustive,

            boost_frequency: config.boost_frequency,
            boost_timeout: config.boost_timeout,
            started_at: now,
            last_response: now,
            next_boost: now + config.boost_frequency,
        }
    }

    pub fn key(&self) -> &Kuid {
        self.manager.key()
    }

    pub fn local_id(&self) -> &Kuid {
        self.manager.local().id()
    }

    // === Private Methods ===

    fn request(&self) -> RequestSpecific {
        let key = *self.manager.key();

        match self.lookup_type {
            LookupType::FindNode => RequestSpecific::FindNode { key },
            LookupType::FindValue => RequestSpecific::FindValue { key },
        }
    }

    fn lookup(&mut self, ctx: &mut Context, contact: &Contact) -> Result<()> {
        trace!(key = ?self.manager.key(), ?contact, "Sending lookup request");

        let message_id = ctx.request(contact, self.request())?;
        self.inflight.insert(message_id);

        Ok(())
    }

    fn process(&mut self, ctx: &mut Context, count: usize) -> Step<LookupOutcome> {
        self.counter.release(count);

        while self.counter.has_free() && self.manager.has_next(false) {
            let Some(contact) = self.manager.next() else {
                break;
            };

            self.lookup(ctx, &contact)?;
            self.counter.acquire();
        }

        self.post_process(ctx)
    }

    fn post_process(&mut self, ctx: &Context) -> Step<LookupOutcome> {
        if self.counter.is_drained() {
            return Ok(Some(self.outcome(ctx.now())));
        }

        Ok(None)
    }

    fn outcome(&mut self, now: Instant) -> LookupOutcome {
        LookupOutcome {
            state: self
                .manager
                .state(now.saturating_duration_since(self.started_at)),
            values: std::mem::take(&mut self.values),
        }
    }
}

impl Process for Lookup {
    type Output = LookupOutcome;

    fn start(&mut self, ctx: &mut Context) -> Step<LookupOutcome> {
        self.process(ctx, 0)
    }

    fn on_response(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        response: &Message,
        _rtt: Duration,
    ) -> Step<LookupOutcome> {
        if !self.inflight.remove(&handle.message_id) {
            return Ok(None);
        }

        self.last_response = ctx.now();

        match response.as_response() {
            Some(ResponseSpecific::Nodes { token, contacts }) => {
                match self
                    .manager
                    .handle_response(&response.contact, token.clone(), contacts)
                {
                    Some(discovered) => {
                        for contact in discovered {
                            ctx.route_table.add(contact);
                        }
                    }
                    None => debug!(contact = ?response.contact, "Ignoring lookup response"),
                }
            }
            Some(ResponseSpecific::Values { values }) => {
                let key = *self.manager.key();
                let found: Vec<DhtValue> = values
                    .iter()
                    .filter(|value| value.primary_key() == &key)
                    .cloned()
                    .collect();

                self.manager.add_to_responses(&response.contact, None);

                if !found.is_empty() {
                    self.values.extend(found);

                    if !self.exhaustive {
                        return Ok(Some(self.outcome(ctx.now())));
                    }
                }
            }
            _ => {}
        }

        self.process(ctx, 1)
    }

    fn on_timeout(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        elapsed: Duration,
    ) -> Step<LookupOutcome> {
        if !self.inflight.remove(&handle.message_id) {
            return Ok(None);
        }

        trace!(key = ?self.manager.key(), address = ?handle.address, ?elapsed, "Lookup request timed out");
        self.manager.handle_timeout(handle.contact_id.as_ref());

        self.process(ctx, 1)
    }

    fn on_exception(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        error: Error,
    ) -> Step<LookupOutcome> {
        if !self.inflight.remove(&handle.message_id) {
            return Ok(None);
        }

        debug!(key = ?self.manager.key(), ?error, "Lookup request failed");
        self.manager.handle_timeout(handle.contact_id.as_ref());

        self.process(ctx, 1)
    }

    /// Queries one more contact if nothing was heard for a while.
    ///
    /// The boost may pass the k closest cutoff, never the parallelism.
    fn on_tick(&mut self, ctx: &mut Context, now: Instant) -> Step<LookupOutcome> {
        if now < self.next_boost {
            return Ok(None);
        }
        self.next_boost = now + self.boost_frequency;

        if !self.counter.has_free()
            || !self.manager.has_next(true)
            || now.saturating_duration_since(self.last_response) < self.boost_timeout
        {
            return Ok(None);
        }

        if let Some(contact) = self.manager.next() {
            debug!(key = ?self.manager.key(), ?contact, "Boosting lookup");

            self.lookup(ctx, &contact)?;
            self.counter.acquire();
        }

        self.post_process(ctx)
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

#[derive(Debug)]
pub(crate) struct FindNodeProcess(pub Lookup);

impl FindNodeProcess {
    fn complete(&self, step: Step<LookupOutcome>) -> Step<FindNodeResult> {
        match step? {
            None => Ok(None),
            // The local node always counts as a response.
            Some(outcome)
                if outcome
                    .state
                    .contacts
                    .iter()
                    .all(|(contact, _)| contact.id() == self.0.local_id()) =>
            {
                Err(Error::NoSuchNode(*self.0.key()))
            }
            Some(outcome) => Ok(Some(FindNodeResult {
                state: outcome.state,
            })),
        }
    }
}

#[derive(Debug)]
pub(crate) struct FindValueProcess(pub Lookup);

impl FindValueProcess {
    fn complete(&self, step: Step<LookupOutcome>) -> Step<FindValueResult> {
        match step? {
            None => Ok(None),
            Some(outcome) if outcome.values.is_empty() => Err(Error::NoSuchValue(*self.0.key())),
            Some(outcome) => Ok(Some(FindValueResult {
                values: outcome.values,
                state: outcome.state,
            })),
        }
    }
}

macro_rules! lookup_process {
    ($process:ident, $output:ty) => {
        impl Process for $process {
            type Output = $output;

            fn start(&mut self, ctx: &mut Context) -> Step<$output> {
                let step = self.0.start(ctx);
                self.complete(step)
            }

            fn on_response(
                &mut self,
                ctx: &mut Context,
                handle: &RequestHandle,
                response: &Message,
                rtt: Duration,
            ) -> Step<$output> {
                let step = self.0.on_response(ctx, handle, response, rtt);
                self.complete(step)
            }

            fn on_timeout(
                &mut self,
                ctx: &mut Context,
                handle: &RequestHandle,
                elapsed: Duration,
            ) -> Step<$output> {
                let step = self.0.on_timeout(ctx, handle, elapsed);
                self.complete(step)
            }

            fn on_exception(
                &mut self,
                ctx: &mut Context,
                handle: &RequestHandle,
                error: Error,
            ) -> Step<$output> {
                let step = self.0.on_exception(ctx, handle, error);
                self.complete(step)
            }

            fn on_tick(&mut self, ctx: &mut Context, now: Instant) -> Step<$output> {
                let step = self.0.on_tick(ctx, now);
                self.complete(step)
            }

            fn inflight(&self, message_id: &MessageId) -> bool {
                self.0.inflight(message_id)
            }

            fn stop(&mut self, ctx: &mut Context) {
                self.0.stop(ctx)
            }
        }
    };
}

lookup_process!(FindNodeProcess, FindNodeResult);
lookup_process!(FindValueProcess, FindValueResult);
