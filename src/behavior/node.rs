//! Node Protocol

use serde::{Serialize, Deserialize};

/// Result of ticking a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Finished and succeeded.
    Success,
    /// Finished and failed.
    Failure,
    /// Not finished; tick again.
    Running,
}

impl Status {
    /// Swap success and failure.
    pub fn invert(self) -> Status {
        match self {
            Status::Success => Status::Failure,
            Status::Failure => Status::Success,
            Status::Running => Status::Running,
        }
    }

    /// Whether the node settled.
    pub fn is_done(self) -> bool {
        self != Status::Running
    }
}

/// A behavior-tree node over a shared context `C`.
pub trait Node<C>: Send {
    /// Advance the node once.
    fn tick(&mut self, ctx: &mut C) -> Status;

    /// Forget any in-progress state. Composites forward this to children.
    fn reset(&mut self) {}
}

/// Boxed node.
pub type BoxedNode<C> = Box<dyn Node<C>>;
