//! Agent Factory
//!
//! The session manager creates agents through this seam so tests and
//! alternative bots can be plugged in without touching session code.

use tracing::info;

use crate::agent::bot::BotAgent;
use crate::agent::Agent;
use crate::core::rng::derive_session_seed;
use crate::game::command::CommandSender;
use crate::game::components::PlayerId;

/// Produces agents for a session.
pub trait AgentFactory: Send + Sync {
    /// New agent acting as `bot_id`, issuing commands through `commands`.
    fn create(&self, bot_id: PlayerId, commands: CommandSender) -> Box<dyn Agent>;
}

/// Builds behavior-tree bots.
#[derive(Debug, Clone, Copy, Default)]
pub struct BotFactory;

impl AgentFactory for BotFactory {
    fn create(&self, bot_id: PlayerId, commands: CommandSender) -> Box<dyn Agent> {
        let seed = derive_session_seed(&bot_id.0, 1);
        info!(bot = %bot_id.short(), "creating bot agent");
        Box::new(BotAgent::new(bot_id, commands, seed))
    }
}
