//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes lifecycle notifications to observers (view-models, pollers, tests).
//! It is not a store: the job repository is the source of truth, and events are published
//! only after the corresponding write has succeeded.
//!
//! ## Delivery guarantees
//!
//! - **Broadcast**: every live subscription receives every event published after it attached.
//! - **Per-key ordering**: events sharing a [`crate::Event::stream_key`] (one job) reach each
//!   subscriber in publication order. Order across different keys is unconstrained.
//! - **Non-blocking publishers**: `publish` hands the event off and returns; a slow or dead
//!   subscriber never stalls the publisher or other subscribers.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// A subscription to an event stream.
///
/// Dropping the subscription detaches it; the bus prunes it on the next publish.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = bus.subscribe();
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(event) => apply(event),
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// Subscriptions are meant for a single consumer; hand events on through a channel if several
/// threads need them.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every message currently buffered, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// Implementations must be safe to share across threads; many call sites (use cases, retry
/// timers, the worker, the status poller) publish concurrently.
///
/// `publish` may fail (e.g. internal lock poisoning). Callers that have already persisted the
/// state change log the failure and carry on, since the record remains authoritative.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
