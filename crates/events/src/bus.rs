//! Publish/subscribe abstraction (mechanics only).
//!
//! The bus distributes messages after the state they describe has been
//! committed. It is not a store: a message that nobody is subscribed to is
//! simply dropped, and subscribers must tolerate duplicates.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use stockguard_core::TenantId;

use crate::tenant::TenantScoped;

/// A subscription to a message stream.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics). Intended for a single consuming thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

impl<M: TenantScoped> Subscription<M> {
    /// Drain pending messages, keeping only those addressed to `tenant_id`.
    pub fn drain_for(&self, tenant_id: TenantId) -> Vec<M> {
        self.receiver
            .try_iter()
            .filter(|m| m.tenant_id() == tenant_id)
            .collect()
    }
}

/// Transport-agnostic pub/sub bus.
///
/// `publish()` may fail (closed transport, poisoned lock). Publishers on the
/// stock path treat that as a logged, non-fatal side effect: the alert row is
/// already committed and remains the source of truth.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

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
