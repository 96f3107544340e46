//! Operations driven by responses, timeouts and ticks.
//!
//! Every operation implements [Process], a state machine that returns
//! `Ok(Some(output))` once done. [Task] wraps a process, resolves its
//! [crate::DhtFuture] exactly once and stops feeding it afterwards.

pub(crate) mod bootstrap;
pub(crate) mod lookup;
pub(crate) mod ping;
pub(crate) mod put;
pub(crate) mod security_token;
pub(crate) mod store;

use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::error;

use crate::common::{Message, MessageId};
use crate::rpc::dispatcher::RequestHandle;
use crate::rpc::future::Resolver;
use crate::rpc::Context;
use crate::{Error, Result};

/// `Ok(None)` while the operation is running.
pub(crate) type Step<T> = Result<Option<T>>;

pub(crate) trait Process: Debug + Send {
    type Output: Send + Debug + 'static;

    fn start(&mut self, ctx: &mut Context) -> Step<Self::Output>;

    fn on_response(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        response: &Message,
        rtt: Duration,
    ) -> Step<Self::Output>;

    fn on_timeout(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        elapsed: Duration,
    ) -> Step<Self::Output>;

    /// A response from the wrong contact or of the wrong type counts as no response.
    fn on_illegal_response(
        &mut self,
        ctx: &mut Context,
        handle: &RequestHandle,
        _response: &Message,
    ) -> Step<Self::Output> {
        let elapsed = ctx.now().saturating_duration_since(handle.sent_at);
        self.on_timeout(ctx, handle, elapsed)
    }

    /// The request can not be answered anymore, like when the transport went away.
    fn on_exception(
        &mut self,
        _ctx: &mut Context,
        _handle: &RequestHandle,
        error: Error,
    ) -> Step<Self::Output> {
        Err(error)
    }

    fn on_tick(&mut self, _ctx: &mut Context, _now: Instant) -> Step<Self::Output> {
        Ok(None)
    }

    /// Returns `true` if this process sent the request with this message id.
    fn inflight(&self, message_id: &MessageId) -> bool;

    /// Cancels every pending request of this process.
    fn stop(&mut self, ctx: &mut Context);
}

/// Anything a [Process] reacts to, to forward it to a child process.
#[derive(Debug)]
pub(crate) enum Event<'a> {
    Response {
        handle: &'a RequestHandle,
        response: &'a Message,
        rtt: Duration,
    },
    Timeout {
        handle: &'a RequestHandle,
        elapsed: Duration,
    },
    IllegalResponse {
        handle: &'a RequestHandle,
        response: &'a Message,
    },
    Exception {
        handle: &'a RequestHandle,
        error: Error,
    },
    Tick {
        now: Instant,
    },
}

impl Event<'_> {
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Event::Response { handle, .. }
            | Event::Timeout { handle, .. }
            | Event::IllegalResponse { handle, .. }
            | Event::Exception { handle, .. } => Some(&handle.message_id),
            Event::Tick { .. } => None,
        }
    }
}

/// Feeds an [Event] to `process`.
pub(crate) fn deliver<P: Process + ?Sized>(
    process: &mut P,
    ctx: &mut Context,
    event: Event<'_>,
) -> Step<P::Output> {
    match event {
        Event::Response {
            handle,
            response,
            rtt,
        } => process.on_response(ctx, handle, response, rtt),
        Event::Timeout { handle, elapsed } => process.on_timeout(ctx, handle, elapsed),
        Event::IllegalResponse { handle, response } => {
            process.on_illegal_response(ctx, handle, response)
        }
        Event::Exception { handle, error } => process.on_exception(ctx, handle, error),
        Event::Tick { now } => process.on_tick(ctx, now),
    }
}

/// Starts `process` if there is no `event`, else feeds it the event.
pub(crate) fn advance<P: Process + ?Sized>(
    process: &mut P,
    ctx: &mut Context,
    event: Option<Event<'_>>,
) -> Step<P::Output> {
    match event {
        Some(event) => deliver(process, ctx, event),
        None => process.start(ctx),
    }
}

/// The object safe face of a running operation, as stored by [super::Rpc].
pub(crate) trait ResponseHandler: Debug + Send {
    fn start(&mut self, ctx: &mut Context);

    fn handle(&mut self, ctx: &mut Context, event: Event<'_>);

    /// Returns `true` once resolved, including by cancellation from the caller.
    fn is_done(&self) -> bool;

    fn cancel(&mut self, ctx: &mut Context);

    /// Releases pending requests, safe to call more than once.
    fn stop(&mut self, ctx: &mut Context);
}

#[derive(Debug)]
pub(crate) struct Task<P: Process> {
    name: &'static str,
    process: P,
    resolver: Resolver<P::Output>,
    stopped: bool,
}

impl<P: Process> Task<P> {
    pub fn new(name: &'static str, process: P, resolver: Resolver<P::Output>) -> Self {
        Self {
            name,
            process,
            resolver,
            stopped: false,
        }
    }

    fn settle(&mut self, ctx: &mut Context, step: Step<P::Output>) {
        let result = match step {
            Ok(None) => return,
            Ok(Some(output)) => Ok(output),
            Err(error) => Err(error),
        };

        self.resolver.resolve(result);
        self.stop(ctx);
    }
}

impl<P: Process> ResponseHandler for Task<P> {
    fn start(&mut self, ctx: &mut Context) {
        let process = &mut self.process;
        let step = guarded(self.name, || process.start(ctx));

        self.settle(ctx, step);
    }

    fn handle(&mut self, ctx: &mut Context, event: Event<'_>) {
        if self.is_done() {
            return;
        }

        let process = &mut self.process;
        let step = guarded(self.name, || deliver(process, ctx, event));

        self.settle(ctx, step);
    }

    fn is_done(&self) -> bool {
        self.resolver.is_resolved()
    }

    fn cancel(&mut self, ctx: &mut Context) {
        self.resolver.resolve(Err(Error::Cancelled));
        self.stop(ctx);
    }

    fn stop(&mut self, ctx: &mut Context) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let process = &mut self.process;
        let name = self.name;
        let _ = guarded(name, || {
            process.stop(ctx);
            Ok(None::<()>)
        });
    }
}

/// Runs an operation callback, turning a panic into [Error::Uncaught].
fn guarded<T>(name: &'static str, callback: impl FnOnce() -> Step<T>) -> Step<T> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(step) => step,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(operation = name, %message, "Uncaught panic in operation");

            Err(Error::Uncaught(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rpc::future::channel;
    use crate::rpc::{Config, MemoryNetwork, Rpc};

    #[derive(Debug)]
    struct Exploding;

    impl Process for Exploding {
        type Output = u8;

        fn start(&mut self, _ctx: &mut Context) -> Step<u8> {
            panic!("boom")
        }

        fn on_response(
            &mut self,
            _ctx: &mut Context,
            _handle: &RequestHandle,
            _response: &Message,
            _rtt: Duration,
        ) -> Step<u8> {
            Ok(None)
        }

        fn on_timeout(
            &mut self,
            _ctx: &mut Context,
            _handle: &RequestHandle,
            _elapsed: Duration,
        ) -> Step<u8> {
            Ok(None)
        }

        fn inflight(&self, _message_id: &MessageId) -> bool {
            false
        }

        fn stop(&mut self, _ctx: &mut Context) {}
    }

    #[test]
    fn panic_resolves_as_uncaught() {
        let network = MemoryNetwork::new();
        let mut rpc = Rpc::new(Config::default(), Box::new(network.transport())).unwrap();

        let (resolver, future) = channel();
        let mut task = Task::new("exploding", Exploding, resolver);
        task.start(&mut rpc.ctx);

        assert!(task.is_done());
        assert!(format!("{task:?}").contains("exploding"));
        assert!(matches!(future.get(), Err(Error::Uncaught(message)) if message == "boom"));
    }
}
