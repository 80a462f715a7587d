//! World State
//!
//! The game context of one session: the entity store plus the clock, grid and
//! RNG the systems share.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::rng::SessionRng;
use crate::game::components::{
    Avatar, Barrier, HitBox, KillStreakScoreBoard, PlayerId, RoundTimer, RpsState, Terrain,
    Transform,
};
use crate::game::config::SimulationConfig;
use crate::game::entity::{Entity, EntityError, EntityId, EntityStore};
use crate::game::level::Level;

/// Side of an avatar's hit box, in tiles.
pub const AVATAR_SIZE: f32 = 0.8;

/// Side of a power-up's hit box, in tiles.
pub const POWER_UP_SIZE: f32 = 0.6;

/// Round rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    /// Respawn forever; score by kill streak.
    #[default]
    Endless,
    /// Limited lives and a round timer.
    Elimination,
}

/// Simulation state of one session.
#[derive(Debug, Clone)]
pub struct World {
    /// Every entity in the session.
    pub entities: EntityStore,
    /// Ticks run so far.
    pub current_tick: u64,
    /// Side length of the square grid in tiles.
    pub grid_width: u32,
    /// Milliseconds since the previous tick.
    pub delta_time: f64,
    /// Rules in effect.
    pub game_mode: GameMode,
    /// Unix milliseconds at the start of the last tick.
    pub last_tick_time: u64,
    /// Session-seeded randomness for spawns and forced picks.
    pub rng: SessionRng,
    /// Set by the score system when an elimination round is decided.
    pub round_over: bool,
}

impl World {
    /// Empty world.
    pub fn new(config: &SimulationConfig, grid_width: u32, rng: SessionRng) -> Self {
        Self {
            entities: EntityStore::new(config.state_switch_cooldown_max_ticks),
            current_tick: 0,
            grid_width,
            delta_time: 0.0,
            game_mode: config.game_mode,
            last_tick_time: 0,
            rng,
            round_over: false,
        }
    }

    /// Build the map and session singletons from a level.
    pub fn generate(level: &dyn Level, config: &SimulationConfig, rng: SessionRng) -> Result<Self, EntityError> {
        let mut world = Self::new(config, level.grid_width(), rng);

        let mut tiles = Vec::new();
        level.find_barrier_tiles(&mut |t| tiles.push((t, true)));
        level.find_terrain_tiles(&mut |t| tiles.push((t, false)));
        for (tile, solid) in tiles {
            let base = Entity::new().with_transform(Transform::at(tile.x as f32, tile.y as f32));
            let entity = if solid {
                base.with_hit_box(HitBox::solid(1.0, 1.0))
                    .with_barrier(Barrier { sprite_id: tile.sprite_id })
            } else {
                base.with_hit_box(HitBox::visual(1.0, 1.0))
                    .with_terrain(Terrain { sprite_id: tile.sprite_id })
            };
            world.entities.instantiate(entity)?;
        }

        for (x, y) in level.spawn_points() {
            world.entities.instantiate(
                Entity::new()
                    .with_transform(Transform::at(x as f32, y as f32))
                    .with_spawn_point(),
            )?;
        }

        world.entities.instantiate(Entity {
            kill_streak_score_board: Some(KillStreakScoreBoard::default()),
            ..Entity::default()
        })?;

        if config.game_mode == GameMode::Elimination {
            world.entities.instantiate(Entity {
                round_timer: Some(RoundTimer { ms_remaining: config.round_duration_ms }),
                ..Entity::default()
            })?;
        }

        debug!(
            grid_width = world.grid_width,
            entities = world.entities.len(),
            "world generated"
        );
        Ok(world)
    }

    /// Seconds since the previous tick.
    #[inline]
    pub fn delta_seconds(&self) -> f32 {
        (self.delta_time / 1000.0) as f32
    }

    /// Positions of all spawn points.
    pub fn spawn_positions(&self) -> Vec<(f32, f32)> {
        self.entities
            .iter()
            .filter(|(_, e)| e.spawn_point.is_some())
            .filter_map(|(_, e)| e.transform.map(|t| (t.x_pos, t.y_pos)))
            .collect()
    }

    /// A random spawn position, centred on its tile.
    pub fn random_spawn_position(&mut self) -> Option<(f32, f32)> {
        let positions = self.spawn_positions();
        let (x, y) = *self.rng.choose(&positions)?;
        let pad = (1.0 - AVATAR_SIZE) / 2.0;
        Some((x + pad, y + pad))
    }

    /// Create a new player's avatar, waiting to spawn.
    pub fn spawn_avatar(&mut self, player_id: PlayerId, lives: u32) -> Result<EntityId, EntityError> {
        let rps = RpsState::from_index(self.rng.next_int(3)).unwrap_or_default();
        let (x, y) = self.random_spawn_position().unwrap_or((1.0, 1.0));
        self.entities.instantiate(
            Entity::new()
                .with_transform(Transform::at(x, y))
                .with_hit_box(HitBox::solid(AVATAR_SIZE, AVATAR_SIZE))
                .with_avatar(Avatar::new(player_id, lives, rps)),
        )
    }

    /// The kill-streak scoreboard entity.
    pub fn scoreboard_id(&self) -> Option<EntityId> {
        self.entities.find(|e| e.kill_streak_score_board.is_some())
    }

    /// The round timer entity, if this is a timed round.
    pub fn round_timer_id(&self) -> Option<EntityId> {
        self.entities.find(|e| e.round_timer.is_some())
    }

    /// Ids of every avatar entity.
    pub fn avatar_ids(&self) -> Vec<EntityId> {
        self.entities.ids_where(|e| e.avatar.is_some())
    }
}
