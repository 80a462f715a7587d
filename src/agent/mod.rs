//! Scripted Agents
//!
//! Agents sit in a session next to human players. Every tick the session
//! hands each agent the full state broadcast; agents answer with ordinary
//! commands through the session's command queue.
//!
//! ## Module Structure
//!
//! - `slot`: Single-slot buffer keeping only the newest broadcast
//! - `bot`: Behavior-tree bot
//! - `factory`: Agent construction seam used by the session manager

pub mod slot;
pub mod bot;
pub mod factory;

use std::sync::Arc;

use crate::game::components::PlayerId;
use crate::network::protocol::GameStateUpdate;

pub use slot::LatestSlot;
pub use bot::BotAgent;
pub use factory::{AgentFactory, BotFactory};

/// Something that plays in a session without a connection.
pub trait Agent: Send {
    /// Player id the agent's commands are sent as.
    fn bot_id(&self) -> PlayerId;

    /// Consume one full broadcast.
    fn tick(&mut self, update: &Arc<GameStateUpdate>);
}
