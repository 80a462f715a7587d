//! System Pipeline
//!
//! Runs once per tick, always in this order:
//!
//! ```text
//! physics → power-ups → rock/paper/scissors → tie-breaker → spawn → score
//! ```
//!
//! Each system owns whatever scratch state it needs across ticks; nothing
//! else touches it.

pub mod physics;
pub mod power_up;
pub mod rps;
pub mod tie_breaker;
pub mod spawn;
pub mod score;

pub use physics::PhysicsSystem;
pub use power_up::PowerUpSystem;
pub use rps::RpsSystem;
pub use tie_breaker::TieBreakerSystem;
pub use spawn::SpawnSystem;
pub use score::ScoreSystem;

#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::game::components::{AvatarState, PowerUpType};
use crate::game::config::SimulationConfig;
use crate::game::entity::{EntityId, EntityStore};
use crate::game::world::{GameMode, World};

/// All systems with their scratch state.
#[derive(Debug, Default)]
pub struct Pipeline {
    physics: PhysicsSystem,
    power_ups: PowerUpSystem,
    rps: RpsSystem,
    tie_breaker: TieBreakerSystem,
    spawn: SpawnSystem,
    score: ScoreSystem,
}

impl Pipeline {
    /// Fresh pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every system once.
    pub fn run(&mut self, world: &mut World, config: &SimulationConfig) {
        // 1. Integrate movement, recompute contacts
        self.physics.run(world);

        // 2. Pickups: spawn, expire, claim, effect timers
        self.power_ups.run(world, &config.power_ups);

        // 3. Pairwise combat and cohort formation
        self.rps.run(world, config);

        // 4. Advance every cohort's bracket
        self.tie_breaker.run(world);

        // 5. Dead → respawning → alive (or spectating)
        self.spawn.run(world, config);

        // 6. Kill streaks and round timer
        self.score.run(world);

        #[cfg(feature = "debug-tracing")]
        trace!(tick = world.current_tick, entities = world.entities.len(), "pipeline done");
    }
}

/// Apply a lost fight to an avatar.
///
/// A shield absorbs the loss and sends the avatar back to respawn with its
/// lives intact. Otherwise the avatar dies, losing a life in elimination
/// rounds. Returns whether the avatar died.
pub fn defeat_avatar(store: &mut EntityStore, id: EntityId, game_mode: GameMode) -> bool {
    let Some(entity) = store.get_mut(id) else { return false };
    if let Some(t) = entity.transform.as_mut() {
        t.x_vel = 0.0;
        t.y_vel = 0.0;
    }
    let Some(avatar) = entity.avatar.as_mut() else { return false };
    let data = &mut avatar.state_data;
    data.tie_breaker_choice_locked = false;
    data.auto_state_switched = false;

    if data.active_power_up == Some(PowerUpType::Shield) {
        data.active_power_up = None;
        avatar.state = AvatarState::Respawning;
        return false;
    }

    if game_mode == GameMode::Elimination {
        data.lives = data.lives.saturating_sub(1);
    }
    avatar.state = AvatarState::Dead;
    true
}

/// Credit a kill.
pub fn credit_kill(store: &mut EntityStore, id: EntityId) {
    if let Some(avatar) = store.get_mut(id).and_then(|e| e.avatar.as_mut()) {
        avatar.state_data.kills += 1;
    }
}

/// Speed tier an avatar returns to when nothing holds it still.
pub fn resting_speed(active_power_up: Option<PowerUpType>) -> u8 {
    if active_power_up == Some(PowerUpType::Speed) {
        2
    } else {
        1
    }
}
