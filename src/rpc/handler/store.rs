//! STORE of values at a set of contacts.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tracing::{debug, warn};

use crate::common::{
    lock_database, Contact, DhtValue, Kuid, MaxStack, Message, MessageId, RequestSpecific,
    ResponseSpecific, SecurityToken, StoreStatus, StoreStatusCode,
};
use crate::rpc::dispatcher::RequestHandle;
use crate::rpc::handler::security_token::SecurityTokenProcess;
use crate::rpc::handler::{advance, Event, Process, Step};
use crate::rpc::Context;
use crate::Error;

#[derive(Debug, Clone, Default)]
pub struct StoreResult {
    /// Every contact a store was attempted at, in the order they were given.
    pub locations: Vec<Contact>,
    /// What each contact answered per value, an unanswered store is an [StoreStatusCode::Error].
    pub statuses: HashMap<Kuid, Vec<StoreStatus>>,
}

impl StoreResult {
    /// Contacts that stored every value they were sent.
    pub fn stored_at(&self) -> impl Iterator<Item = &Contact> {
        self.locations.iter().filter(|contact| {
            self.statuses
                .get(contact.id())
                .map(|statuses| !statuses.is_empty() && statuses.iter().all(StoreStatus::is_ok))
                .unwrap_or(false)
        })
    }
}

/// (contact, primary key, secondary key)
type OperationKey = (Kuid, Kuid, Kuid);

#[derive(Debug)]
struct StoreOperation {
    contact: Contact,
    token: Option<SecurityToken>,
    value: DhtValue,
}

impl StoreOperation {
    fn key(&self) -> OperationKey {
        (
            *self.contact.id(),
            *self.value.primary_key(),
            *self.value.secondary_key(),
        )
    }
}

#[derive(Debug)]
/// Stores every value at every contact, one value per request, a few requests at a time.
///
/// Always resolves `Ok`, failures show up as error statuses.
pub(crate) struct StoreProcess {
    queue: VecDeque<StoreOperation>,
    counter: MaxStack,
    inflight: HashMap<MessageId, OperationKey>,
    result: StoreResult,
}

impl StoreProcess {
    pub fn new(
        contacts: Vec<(Contact, Option<SecurityToken>)>,
        values: Vec<DhtValue>,
        parallel_stores: usize,
    ) -> Self {
        let mut result = StoreResult::default();
        let mut queue = VecDeque::with_capacity(contacts.len() * values.len());

        for (contact, token) in contacts {
            if result.locations.iter().any(|known| known.id() == contact.id()) {
                continue;
            }

            for value in &values {
                queue.push_back(StoreOperation {
                    contact: contact.clone(),
                    token: token.clone(),
                    value: value.clone(),
                });
            }
            result.locations.push(contact);
        }

        Self {
            queue,
            counter: MaxStack::new(parallel_stores.max(1)),
            inflight: HashMap::new(),
            result,
        }
    }

    fn record(&mut self, key: &OperationKey, code: StoreStatusCode) {
        let (contact_id, primary_key, secondary_key) = *key;

        self.result
            .statuses
            .entry(contact_id)
            .or_default()
            .push(StoreStatus {
                primary_key,
                secondary_key,
                code,
            });
    }

    fn process(&mut self, ctx: &mut Context, count: usize) -> Step<StoreResult> {
        self.counter.release(count);

        while self.counter.has_free() {
            let Some(operation) = self.queue.pop_front() else {
                break;
            };
            let key = operation.key();

            if operation.contact.id() == ctx.local_node().id() {
                let stored = lock_database(&ctx.database).store(operation.value);
                self.record(&key, if stored { StoreStatusCode::Ok } else { StoreStatusCode::Error });
                continue;
            }

            let Some(token) = operation.token else {
                debug!(contact = ?operation.contact, "No security token to store with");
                self.record(&key, StoreStatusCode::Error);
                continue;
            };

            let request = RequestSpecific::Store {
                token,
                values: vec![operation.value],
            };

            match ctx.request(&operation.contact, request) {
                Ok(message_id) => {
                    self.inflight.insert(message_id, key);
                    self.counter.acquire();
                }
                Err(error) => {
                    debug!(contact = ?operation.contact, ?error, "Failed to send store request");
                    self.record(&key, StoreStatusCode::Error);
                }
            }
        }

        if self.counter.is_drained() && self.queue.is_empty() {
            return Ok(Some(std::mem::take(&mut self.result)));
        }

        Ok(None)
    }

    fn fail(&mut self, ctx: &mut Context, handle: &RequestHandle) -> Step<StoreResult> {
        let Some(key) = self.inflight.remove(&handle.message_id) else {
            return Ok(None);
        };

        self.record(&key, StoreStatusCode::Error);
        self.process(ctx, 1)
    }
}

impl Process for StoreProcess {
    type Output = StoreResult;

    fn start(&mut self, ctx: &mut Context) -> Step<StoreResult> {
        self.process(ctx, 0)
    }

    fn on_response(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        response: &Message,
        _rtt: Duration,
    ) -> Step<StoreResult> {
        let Some(key) = self.inflight.remove(&handle.message_id) else {
            return Ok(None);
        };

        let statuses = match response.as_response() {
            Some(ResponseSpecific::StoreStatus { statuses }) => statuses.as_slice(),
            _ => &[],
        };

        let code = match statuses {
            [status] if (*response.contact.id(), status.primary_key, status.secondary_key) == key => {
                status.code
            }
            [_] => {
                warn!(contact = ?response.contact, "Store status for a value we did not send");
                StoreStatusCode::Error
            }
            _ => {
                warn!(
                    contact = ?response.contact,
                    count = statuses.len(),
                    "Expected exactly one store status"
                );
                StoreStatusCode::Error
            }
        };

        self.record(&key, code);
        self.process(ctx, 1)
    }

    fn on_timeout(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        _elapsed: Duration,
    ) -> Step<StoreResult> {
        self.fail(ctx, handle)
    }

    fn on_exception(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        _error: Error,
    ) -> Step<StoreResult> {
        self.fail(ctx, handle)
    }

    fn inflight(&self, message_id: &MessageId) -> bool {
        self.inflight.contains_key(message_id)
    }

    fn stop(&mut self, ctx: &mut Context) {
        for message_id in self.inflight.keys() {
            ctx.dispatcher.cancel(message_id);
        }
        self.inflight.clear();
    }
}

#[derive(Debug)]
enum ForwardPhase {
    Token(SecurityTokenProcess),
    Store(StoreProcess),
}

#[derive(Debug)]
/// Stores values at a single contact, fetching its security token first if needed.
pub(crate) struct ForwardProcess {
    contact: Contact,
    values: Vec<DhtValue>,
    phase: ForwardPhase,
}

impl ForwardProcess {
    pub fn new(contact: Contact, token: Option<SecurityToken>, values: Vec<DhtValue>, parallel_stores: usize) -> Self {
        let phase = match token {
            Some(token) => ForwardPhase::Store(StoreProcess::new(
                vec![(contact.clone(), Some(token))],
                values.clone(),
                parallel_stores,
            )),
            None => ForwardPhase::Token(SecurityTokenProcess::new(contact.clone())),
        };

        Self {
            contact,
            values,
            phase,
        }
    }

    fn step(&mut self, ctx: &mut Context, event: Option<Event<'_>>) -> Step<StoreResult> {
        match &mut self.phase {
            ForwardPhase::Token(process) => {
                let step = advance(process, ctx, event);

                match step? {
                    None => Ok(None),
                    Some(token) => {
                        let mut store = StoreProcess::new(
                            vec![(self.contact.clone(), token)],
                            std::mem::take(&mut self.values),
                            ctx.config.parallel_stores,
                        );
                        let step = store.start(ctx);
                        self.phase = ForwardPhase::Store(store);
                        step
                    }
                }
            }
            ForwardPhase::Store(process) => advance(process, ctx, event),
        }
    }
}

impl Process for ForwardProcess {
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

    fn inflight(&self, message_id: &MessageId) -> bool {
        match &self.phase {
            ForwardPhase::Token(process) => process.inflight(message_id),
            ForwardPhase::Store(process) => process.inflight(message_id),
        }
    }

    fn stop(&mut self, ctx: &mut Context) {
        match &mut self.phase {
            ForwardPhase::Token(process) => process.stop(ctx),
            ForwardPhase::Store(process) => process.stop(ctx),
        }
    }
}
