//! Spawn System
//!
//! Dead avatars either leave the round for good (elimination, no lives left)
//! or are moved to a random spawn point and brought back after the respawn
//! delay.

use std::collections::BTreeMap;

use tracing::info;

use crate::game::components::AvatarState;
use crate::game::config::SimulationConfig;
use crate::game::entity::EntityId;
use crate::game::systems::resting_speed;
use crate::game::world::{GameMode, World};

/// Respawn timers and elimination ordinals.
#[derive(Debug, Default)]
pub struct SpawnSystem {
    respawn_timers: BTreeMap<EntityId, u32>,
    eliminations: u32,
}

impl SpawnSystem {
    /// Run one tick.
    pub fn run(&mut self, world: &mut World, config: &SimulationConfig) {
        self.respawn_timers.retain(|id, _| world.entities.contains(*id));

        let avatars: Vec<(EntityId, AvatarState, u32)> = world
            .entities
            .iter()
            .filter_map(|(id, e)| e.avatar.as_ref().map(|a| (id, a.state, a.state_data.lives)))
            .collect();

        for (id, state, lives) in avatars {
            match state {
                AvatarState::Dead if world.game_mode == GameMode::Elimination && lives == 0 => {
                    self.eliminate(world, id);
                }
                AvatarState::Dead => {
                    self.begin_respawn(world, id, config);
                }
                AvatarState::Respawning => match self.respawn_timers.get_mut(&id) {
                    None => self.begin_respawn(world, id, config),
                    Some(remaining) => {
                        *remaining = remaining.saturating_sub(1);
                        if *remaining == 0 {
                            self.respawn_timers.remove(&id);
                            if let Some(avatar) = world.entities.get_mut(id).and_then(|e| e.avatar.as_mut()) {
                                avatar.state = AvatarState::Alive;
                            }
                        }
                    }
                },
                _ => {}
            }
        }
    }

    fn eliminate(&mut self, world: &mut World, id: EntityId) {
        self.eliminations += 1;
        self.respawn_timers.remove(&id);
        let order = self.eliminations;
        let Some(entity) = world.entities.get_mut(id) else { return };
        if let Some(t) = entity.transform.as_mut() {
            t.x_vel = 0.0;
            t.y_vel = 0.0;
        }
        if let Some(avatar) = entity.avatar.as_mut() {
            avatar.state = AvatarState::Spectating;
            avatar.state_data.elimination_order = Some(order);
            info!(
                player = %avatar.player_id.short(),
                elimination_order = order,
                "player eliminated"
            );
        }
    }

    fn begin_respawn(&mut self, world: &mut World, id: EntityId, config: &SimulationConfig) {
        let spot = world.random_spawn_position();
        let Some(entity) = world.entities.get_mut(id) else { return };
        if let Some(t) = entity.transform.as_mut() {
            if let Some((x, y)) = spot {
                t.x_pos = x;
                t.y_pos = y;
            }
            t.x_vel = 0.0;
            t.y_vel = 0.0;
        }
        if let Some(avatar) = entity.avatar.as_mut() {
            avatar.state = AvatarState::Respawning;
            avatar.speed = resting_speed(avatar.state_data.active_power_up);
        }
        self.respawn_timers.insert(id, config.ticks_to_respawn);
    }
}
