//! Simulation Tuning
//!
//! Everything the system pipeline reads besides the world itself.

use serde::{Serialize, Deserialize};

use crate::game::world::GameMode;
use crate::tiebreak::fsm::TieBreakerTimings;

/// Ticks between two checkpoint broadcasts.
pub const MAX_TICKS_BETWEEN_CHECKPOINTS: u64 = 30;

/// Ticks a dead avatar waits before coming back.
pub const TICKS_TO_RESPAWN: u32 = 90;

/// Cooldown after a state switch.
pub const STATE_SWITCH_COOLDOWN_MAX_TICKS: u32 = 10;

/// Lives per avatar in elimination rounds.
pub const ELIMINATION_LIVES: u32 = 3;

/// Elimination round length.
pub const ROUND_DURATION_MS: f64 = 180_000.0;

/// Power-up spawn and effect timings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerUpConfig {
    /// Ticks between spawn attempts.
    pub spawn_interval_ticks: u32,
    /// Ticks before an unclaimed pickup disappears.
    pub lifetime_ticks: u32,
    /// Ticks before a fresh pickup can be claimed.
    pub activation_delay_ticks: u32,
    /// Ticks a speed boost lasts.
    pub effect_duration_ticks: u32,
    /// Pickups allowed on the field at once.
    pub max_power_ups: usize,
}

impl Default for PowerUpConfig {
    fn default() -> Self {
        Self {
            spawn_interval_ticks: 300,
            lifetime_ticks: 600,
            activation_delay_ticks: 15,
            effect_duration_ticks: 240,
            max_power_ups: 3,
        }
    }
}

/// Rules for one session's simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Endless or elimination.
    pub game_mode: GameMode,
    /// Checkpoint cadence.
    pub max_ticks_between_checkpoints: u64,
    /// Respawn delay.
    pub ticks_to_respawn: u32,
    /// State switch cooldown.
    pub state_switch_cooldown_max_ticks: u32,
    /// Starting lives (only consumed in elimination).
    pub lives: u32,
    /// Round length (elimination only).
    pub round_duration_ms: f64,
    /// Pickups.
    pub power_ups: PowerUpConfig,
    /// Tie-breaker rounds.
    pub tie_breaker: TieBreakerTimings,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            game_mode: GameMode::Endless,
            max_ticks_between_checkpoints: MAX_TICKS_BETWEEN_CHECKPOINTS,
            ticks_to_respawn: TICKS_TO_RESPAWN,
            state_switch_cooldown_max_ticks: STATE_SWITCH_COOLDOWN_MAX_TICKS,
            lives: ELIMINATION_LIVES,
            round_duration_ms: ROUND_DURATION_MS,
            power_ups: PowerUpConfig::default(),
            tie_breaker: TieBreakerTimings::default(),
        }
    }
}

impl SimulationConfig {
    /// Default rules for a mode.
    pub fn for_mode(game_mode: GameMode) -> Self {
        Self { game_mode, ..Self::default() }
    }
}
