use std::time::{Duration, Instant};

use tracing::debug;

use crate::common::{DhtValue, Message, MessageId};
use crate::rpc::dispatcher::RequestHandle;
use crate::rpc::handler::lookup::{Lookup, LookupType};
use crate::rpc::handler::store::{StoreProcess, StoreResult};
use crate::rpc::handler::{advance, Event, Process, Step};
use crate::rpc::Context;
use crate::Error;

#[derive(Debug)]
enum PutPhase {
    Lookup(Lookup),
    Store(StoreProcess),
}

#[derive(Debug)]
/// Finds the k closest nodes to the values' key, then stores the values there.
pub(crate) struct PutProcess {
    values: Vec<DhtValue>,
    phase: PutPhase,
}

impl PutProcess {
    /// All `values` must share the same primary key.
    pub fn new(ctx: &Context, values: Vec<DhtValue>) -> Result<Self, Error> {
        let Some(key) = values.first().map(|value| *value.primary_key()) else {
            return Err(Error::InvalidArgument("no values to put"));
        };
        if values.iter().any(|value| value.primary_key() != &key) {
            return Err(Error::InvalidArgument("values must share the same primary key"));
        }

        Ok(Self {
            values,
            phase: PutPhase::Lookup(Lookup::new(ctx, LookupType::FindNode, key, None)),
        })
    }

    fn step(&mut self, ctx: &mut Context, event: Option<Event<'_>>) -> Step<StoreResult> {
        match &mut self.phase {
            PutPhase::Lookup(lookup) => {
                let step = advance(lookup, ctx, event);

                let Some(outcome) = step? else {
                    return Ok(None);
                };

                let mut contacts = outcome.state.contacts;
                if contacts.is_empty() {
                    contacts.push((ctx.local_node().clone(), None));
                }
                debug!(key = ?outcome.state.key, nodes = contacts.len(), "Storing values at closest nodes");

                let mut store = StoreProcess::new(
                    contacts,
                    std::mem::take(&mut self.values),
                    ctx.config.parallel_stores,
                );
                let step = store.start(ctx);
                self.phase = PutPhase::Store(store);

                step
            }
            PutPhase::Store(store) => advance(store, ctx, event),
        }
    }
}

impl Process for PutProcess {
    type Output = StoreResult;

    fn start(&mut self, ctx: &mut Context) -> Step<StoreResult> {
        self.step(ctx, None)
    }

    fn on_response(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        response: &Message,
        rtt: Duration,
    ) -> Step<StoreResult> {
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
    ) -> Step<StoreResult> {
        self.step(ctx, Some(Event::Timeout { handle, elapsed }))
    }

    fn on_illegal_response(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        response: &Message,
    ) -> Step<StoreResult> {
        self.step(ctx, Some(Event::IllegalResponse { handle, response }))
    }

    fn on_exception(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        error: Error,
    ) -> Step<StoreResult> {
        self.step(ctx, Some(Event::Exception { handle, error }))
    }

    fn on_tick(&mut self, ctx: &mut Context, now: Instant) -> Step<StoreResult> {
        match self.phase {
            PutPhase::Lookup(_) => self.step(ctx, Some(Event::Tick { now })),
            PutPhase::Store(_) => Ok(None),
        }
    }

    fn inflight(&self, message_id: &MessageId) -> bool {
        match &self.phase {
            PutPhase::Lookup(lookup) => lookup.inflight(message_id),
            PutPhase::Store(store) => store.inflight(message_id),
        }
    }

    fn stop(&mut self, ctx: &mut Context) {
        match &mut self.phase {
            PutPhase::Lookup(lookup) => lookup.stop(ctx),
            PutPhase::Store(store) => store.stop(ctx),
        }
    }
}
