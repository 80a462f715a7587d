//! Leaf Nodes
//!
//! [`Condition`] answers synchronously. [`Action`] wraps an operation that may
//! take many ticks: the operation hands back a oneshot receiver and the node
//! polls it, keeping at most one operation in flight.

use std::future::Future;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::debug;

use crate::behavior::node::{Node, Status};

/// Predicate over the context.
pub struct Condition<C> {
    predicate: Box<dyn Fn(&C) -> bool + Send>,
}

impl<C> Condition<C> {
    /// Condition from a predicate.
    pub fn new(predicate: impl Fn(&C) -> bool + Send + 'static) -> Self {
        Self { predicate: Box::new(predicate) }
    }
}

impl<C: Send> Node<C> for Condition<C> {
    fn tick(&mut self, ctx: &mut C) -> Status {
        if (self.predicate)(ctx) {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

type StartFn<C> = Box<dyn FnMut(&mut C) -> oneshot::Receiver<bool> + Send>;

/// Long-running operation.
///
/// ```text
/// Idle ──tick──► start op ──► Pending(rx) ──tick: empty──► Running
///   ▲                              │
///   └──── Success / Failure ◄──────┘ tick: settled (or sender dropped)
/// ```
pub struct Action<C> {
    start: StartFn<C>,
    pending: Option<oneshot::Receiver<bool>>,
}

impl<C> Action<C> {
    /// Action whose operation reports through a oneshot channel.
    pub fn new(start: impl FnMut(&mut C) -> oneshot::Receiver<bool> + Send + 'static) -> Self {
        Self { start: Box::new(start), pending: None }
    }

    /// Action that settles on the tick it starts.
    pub fn immediate(mut op: impl FnMut(&mut C) -> bool + Send + 'static) -> Self {
        Self::new(move |ctx| {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(op(ctx));
            rx
        })
    }

    /// Action backed by a spawned tokio task.
    ///
    /// Without a runtime the operation cannot start and the action fails.
    pub fn task<F>(mut make: impl FnMut(&mut C) -> F + Send + 'static) -> Self
    where
        F: Future<Output = bool> + Send + 'static,
    {
        Self::new(move |ctx| {
            let (tx, rx) = oneshot::channel();
            let fut = make(ctx);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = tx.send(fut.await);
                    });
                }
                Err(_) => debug!("no tokio runtime, action cannot start"),
            }
            rx
        })
    }

    /// Whether an operation is outstanding.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn poll(&mut self) -> Status {
        let Some(rx) = self.pending.as_mut() else {
            return Status::Failure;
        };
        let status = match rx.try_recv() {
            Err(TryRecvError::Empty) => return Status::Running,
            Ok(true) => Status::Success,
            Ok(false) | Err(TryRecvError::Closed) => Status::Failure,
        };
        self.pending = None;
        status
    }
}

impl<C: Send> Node<C> for Action<C> {
    fn tick(&mut self, ctx: &mut C) -> Status {
        if self.pending.is_none() {
            self.pending = Some((self.start)(ctx));
        }
        self.poll()
    }

    /// Stops observing the operation. The operation itself keeps running.
    fn reset(&mut self) {
        self.pending = None;
    }
}
