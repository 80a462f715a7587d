//! Behavior Tree
//!
//! Owns the root node and the shared context every node sees. An optional
//! before-tick hook refreshes the context (for agents: pop the newest
//! broadcast) right before the root is ticked.

use thiserror::Error;

use crate::behavior::node::{BoxedNode, Status};

/// Tree misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TreeError {
    /// `tick` with no root node.
    #[error("behavior tree has no root")]
    NoRoot,
    /// `tick` with no context.
    #[error("behavior tree has no context")]
    NoContext,
}

type BeforeTick<C> = Box<dyn FnMut(&mut C) + Send>;

/// A rooted tree plus its context.
pub struct Tree<C> {
    root: Option<BoxedNode<C>>,
    context: Option<C>,
    before_tick: Option<BeforeTick<C>>,
}

impl<C> Default for Tree<C> {
    fn default() -> Self {
        Self { root: None, context: None, before_tick: None }
    }
}

impl<C> Tree<C> {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree with a root and a context.
    pub fn with(root: BoxedNode<C>, context: C) -> Self {
        Self { root: Some(root), context: Some(context), before_tick: None }
    }

    /// Replace the root. The old root's progress is lost.
    pub fn set_root(&mut self, root: BoxedNode<C>) {
        self.root = Some(root);
    }

    /// Install the context shared by every node.
    pub fn set_context(&mut self, context: C) {
        self.context = Some(context);
    }

    /// Hook run before each tick.
    pub fn set_before_tick(&mut self, hook: impl FnMut(&mut C) + Send + 'static) {
        self.before_tick = Some(Box::new(hook));
    }

    /// Shared context.
    pub fn context(&self) -> Option<&C> {
        self.context.as_ref()
    }

    /// Shared context, mutably.
    pub fn context_mut(&mut self) -> Option<&mut C> {
        self.context.as_mut()
    }

    /// Run the hook, then tick the root once.
    pub fn tick(&mut self) -> Result<Status, TreeError> {
        let root = self.root.as_mut().ok_or(TreeError::NoRoot)?;
        let ctx = self.context.as_mut().ok_or(TreeError::NoContext)?;
        if let Some(hook) = self.before_tick.as_mut() {
            hook(ctx);
        }
        Ok(root.tick(ctx))
    }

    /// Drop all in-progress node state.
    pub fn reset(&mut self) {
        if let Some(root) = self.root.as_mut() {
            root.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::composite::Sequence;
    use crate::behavior::leaf::{Action, Condition};

    #[test]
    fn test_tick_fails_fast_without_root_or_context() {
        let mut tree: Tree<u32> = Tree::new();
        assert_eq!(tree.tick(), Err(TreeError::NoRoot));

        tree.set_root(Box::new(Condition::new(|_: &u32| true)));
        assert_eq!(tree.tick(), Err(TreeError::NoContext));

        tree.set_context(0);
        assert_eq!(tree.tick(), Ok(Status::Success));
    }

    #[test]
    fn test_before_tick_feeds_context() {
        let root = Sequence::new(vec![
            Box::new(Condition::new(|n: &u32| *n >= 3)) as BoxedNode<u32>,
            Box::new(Action::immediate(|n: &mut u32| {
                *n = 100;
                true
            })),
        ]);
        let mut tree = Tree::with(Box::new(root) as BoxedNode<u32>, 0);
        tree.set_before_tick(|n| *n += 1);

        assert_eq!(tree.tick(), Ok(Status::Failure));
        assert_eq!(tree.tick(), Ok(Status::Failure));
        assert_eq!(tree.tick(), Ok(Status::Success));
        assert_eq!(tree.context(), Some(&100));
    }
}
