//! Handles to the result of an asynchronous operation.

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};

use crate::{Error, Result};

struct Shared<T> {
    resolved: AtomicBool,
    sender: Sender<Result<T>>,
}

impl<T> Shared<T> {
    /// Resolves exactly once, later attempts return `false`.
    fn complete(&self, result: Result<T>) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let _ = self.sender.send(result);
        true
    }

    fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }
}

/// The eventual result of an operation started on a [super::Rpc] or [crate::Dht].
///
/// The result can be taken once.
pub struct DhtFuture<T> {
    shared: Arc<Shared<T>>,
    receiver: Receiver<Result<T>>,
}

/// The producing side of a [DhtFuture].
///
/// Dropping an unresolved resolver resolves its future with [Error::Shutdown].
pub(crate) struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

pub(crate) fn channel<T>() -> (Resolver<T>, DhtFuture<T>) {
    let (sender, receiver) = flume::bounded(1);
    let shared = Arc::new(Shared {
        resolved: AtomicBool::new(false),
        sender,
    });

    (
        Resolver {
            shared: shared.clone(),
        },
        DhtFuture { shared, receiver },
    )
}

impl<T> DhtFuture<T> {
    /// Cancels the operation, returns `false` if it already completed.
    pub fn cancel(&self) -> bool {
        self.shared.complete(Err(Error::Cancelled))
    }

    /// Returns `true` once the operation completed, failed or was cancelled.
    pub fn is_done(&self) -> bool {
        self.shared.is_resolved()
    }

    /// Blocks until the operation completes.
    pub fn get(self) -> Result<T> {
        self.receiver.recv().unwrap_or(Err(Error::Shutdown))
    }

    /// Blocks until the operation completes or `timeout` elapses.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_get(&self) -> Option<Result<T>> {
        self.receiver.try_recv().ok()
    }

    #[cfg(feature = "async")]
    /// Awaits the result of the operation.
    pub async fn recv_async(self) -> Result<T> {
        self.receiver.recv_async().await.unwrap_or(Err(Error::Shutdown))
    }
}

impl<T> Debug for DhtFuture<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhtFuture")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T> Resolver<T> {
    /// Returns `false` if the future was already resolved or cancelled.
    pub fn resolve(&self, result: Result<T>) -> bool {
        self.shared.complete(result)
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.is_resolved()
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        self.shared.complete(Err(Error::Shutdown));
    }
}

impl<T> Debug for Resolver<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn resolves_once() {
        let (resolver, future) = channel::<u8>();

        assert!(resolver.resolve(Ok(1)));
        assert!(!resolver.resolve(Ok(2)));
        assert!(!future.cancel());

        assert!(future.is_done());
        assert_eq!(future.get().unwrap(), 1);
    }

    #[test]
    fn cancel_wins_over_late_result() {
        let (resolver, future) = channel::<u8>();

        assert!(future.cancel());
        assert!(resolver.is_resolved());
        assert!(!resolver.resolve(Ok(1)));

        assert!(matches!(future.get(), Err(Error::Cancelled)));
    }

    #[test]
    fn dropped_resolver_shuts_down() {
        let (resolver, future) = channel::<u8>();

        thread::spawn(move || drop(resolver)).join().unwrap();

        assert!(matches!(future.get(), Err(Error::Shutdown)));
    }

    #[test]
    fn concurrent_resolution() {
        let (resolver, future) = channel::<usize>();
        let resolver = Arc::new(resolver);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = resolver.clone();
                thread::spawn(move || resolver.resolve(Ok(i)))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(future.get().is_ok());
    }
}
