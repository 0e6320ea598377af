//! # Event
//!
//! Ordered subscriber lists. Every handler runs even when an earlier one fails; failures and panics
//! are collected and logged at the dispatch boundary instead of reaching native code.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::error;

use crate::error::Error;

/// Error type subscribers may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by subscribers
pub type HandlerResult = Result<(), BoxError>;

/// Handler receiving a mutable event
pub type Handler<E> = dyn Fn(&mut E) -> HandlerResult + Send + Sync;

/// Identifies one registration, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registered handlers for events of type `E`, in registration order
pub struct Subscribers<E> {
    /// Next id to hand out
    next: AtomicU64,
    /// Handlers in registration order
    handlers: RwLock<Vec<(SubscriptionId, Arc<Handler<E>>)>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<E> Subscribers<E> {
    /// Creates an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler
    pub fn subscribe<H>(&self, handler: H) -> SubscriptionId
    where
        H: Fn(&mut E) -> HandlerResult + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every handler in order against `event`, returning the faults.
    ///
    /// Handlers run on a snapshot of the list so they may (un)subscribe while running.
    pub fn dispatch(&self, label: &str, event: &mut E) -> Vec<Error> {
        let snapshot: Vec<_> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        snapshot
            .into_iter()
            .filter_map(|(id, handler)| guarded(label, id, || handler(event)).err())
            .collect()
    }
}

/// Runs `f`, turning an error or a panic into a logged [`Error::SubscriberFault`]
pub fn guarded<F>(label: &str, subscriber: impl fmt::Display, f: F) -> Result<(), Error>
where
    F: FnOnce() -> HandlerResult,
{
    let message = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => e.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };
    let subscriber = subscriber.to_string();
    error!(label, %subscriber, "exception in subscriber: {message}");
    Err(Error::SubscriberFault {
        subscriber,
        message,
    })
}

/// Best-effort text of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Handlers run in registration order and see earlier mutations
    fn test_dispatch_order() {
        let subscribers = Subscribers::<Vec<u32>>::new();
        subscribers.subscribe(|log| {
            log.push(1);
            Ok(())
        });
        subscribers.subscribe(|log| {
            log.push(log.len() as u32 + 1);
            Ok(())
        });

        let mut log = Vec::new();
        assert!(subscribers.dispatch("order", &mut log).is_empty());
        assert_eq!(log, [1, 2]);
    }

    #[test]
    /// Errors and panics are collected without skipping later handlers
    fn test_faults_are_isolated() {
        let subscribers = Subscribers::<Vec<&'static str>>::new();
        let failing = subscribers.subscribe(|_| Err("broken".into()));
        subscribers.subscribe(|_| panic!("boom"));
        subscribers.subscribe(|log| {
            log.push("last");
            Ok(())
        });

        let mut log = Vec::new();
        let faults = subscribers.dispatch("faults", &mut log);
        assert_eq!(log, ["last"]);
        assert_eq!(faults.len(), 2);
        assert!(matches!(
            &faults[0],
            Error::SubscriberFault { subscriber, message }
                if *subscriber == failing.to_string() && message == "broken"
        ));
        assert!(matches!(
            &faults[1],
            Error::SubscriberFault { message, .. } if message.contains("boom")
        ));
    }

    #[test]
    /// Unsubscribed handlers stop receiving events
    fn test_unsubscribe() {
        let subscribers = Subscribers::<u32>::new();
        let id = subscribers.subscribe(|n| {
            *n += 1;
            Ok(())
        });
        assert_eq!(subscribers.len(), 1);
        assert!(subscribers.unsubscribe(id));
        assert!(!subscribers.unsubscribe(id));
        assert!(subscribers.is_empty());

        let mut n = 0;
        subscribers.dispatch("unsubscribe", &mut n);
        assert_eq!(n, 0);
    }
}
