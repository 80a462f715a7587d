//! Behavior-Tree Engine
//!
//! Generic, tick-driven decision trees. Nothing here knows about the game;
//! agents plug their own context type in.
//!
//! ## Module Structure
//!
//! - `node`: `Status` and the `Node` trait
//! - `composite`: Sequence and Fallback with resumable cursors
//! - `decorator`: Status-mapping wrapper
//! - `leaf`: Condition and single-flight Action
//! - `tree`: Root, shared context, before-tick hook

pub mod node;
pub mod composite;
pub mod decorator;
pub mod leaf;
pub mod tree;

pub use node::{BoxedNode, Node, Status};
pub use composite::{Fallback, Sequence};
pub use decorator::Decorator;
pub use leaf::{Action, Condition};
pub use tree::{Tree, TreeError};
