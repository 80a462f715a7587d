//! Decorator Node

use crate::behavior::node::{BoxedNode, Node, Status};

/// Maps its child's status through a policy.
pub struct Decorator<C> {
    child: BoxedNode<C>,
    policy: Box<dyn Fn(Status) -> Status + Send>,
}

impl<C> Decorator<C> {
    /// Wrap `child` with an arbitrary policy.
    pub fn new(child: BoxedNode<C>, policy: impl Fn(Status) -> Status + Send + 'static) -> Self {
        Self { child, policy: Box::new(policy) }
    }

    /// Swap success and failure.
    pub fn inverter(child: BoxedNode<C>) -> Self {
        Self::new(child, Status::invert)
    }

    /// Report success whenever the child settles.
    pub fn succeeder(child: BoxedNode<C>) -> Self {
        Self::new(child, |s| if s.is_done() { Status::Success } else { s })
    }
}

impl<C: Send> Node<C> for Decorator<C> {
    fn tick(&mut self, ctx: &mut C) -> Status {
        let status = self.child.tick(ctx);
        (self.policy)(status)
    }

    fn reset(&mut self) {
        self.child.reset();
    }
}
