//! Component Definitions
//!
//! Plain data attached to entities. Behaviour is decided by which components an
//! entity carries, never by what "kind" of entity it is.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};

use crate::game::entity::EntityId;
use crate::tiebreak::bracket::TournamentBracket;
use crate::tiebreak::fsm::TieBreakerState;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Identity of a participant (human connection or scripted agent).
///
/// Implements Ord for deterministic BTreeMap ordering.
/// Serialized as a UUID string so it can key JSON maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(into = "String", try_from = "String")]
pub struct PlayerId(pub [u8; 16]);

impl From<PlayerId> for String {
    fn from(id: PlayerId) -> String {
        id.to_uuid_string()
    }
}

impl TryFrom<String> for PlayerId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        PlayerId::from_uuid_str(&s).ok_or_else(|| format!("invalid player id: {}", s))
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_uuid_string())
    }
}

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

// =============================================================================
// ROCK / PAPER / SCISSORS
// =============================================================================

/// The three combat states. Rock beats scissors beats paper beats rock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RpsState {
    /// Beats scissors.
    #[default]
    Rock,
    /// Beats rock.
    Paper,
    /// Beats paper.
    Scissors,
}

impl RpsState {
    /// All states in cycle order.
    pub const ALL: [RpsState; 3] = [RpsState::Rock, RpsState::Paper, RpsState::Scissors];

    /// Whether `self` defeats `other`.
    #[inline]
    pub fn beats(self, other: RpsState) -> bool {
        matches!(
            (self, other),
            (RpsState::Rock, RpsState::Scissors)
                | (RpsState::Scissors, RpsState::Paper)
                | (RpsState::Paper, RpsState::Rock)
        )
    }

    /// The state that defeats `self`.
    pub fn counter(self) -> RpsState {
        match self {
            RpsState::Rock => RpsState::Paper,
            RpsState::Paper => RpsState::Scissors,
            RpsState::Scissors => RpsState::Rock,
        }
    }

    /// Previous state in the rock → paper → scissors cycle.
    pub fn shift_left(self) -> RpsState {
        match self {
            RpsState::Rock => RpsState::Scissors,
            RpsState::Paper => RpsState::Rock,
            RpsState::Scissors => RpsState::Paper,
        }
    }

    /// Next state in the rock → paper → scissors cycle.
    pub fn shift_right(self) -> RpsState {
        match self {
            RpsState::Rock => RpsState::Paper,
            RpsState::Paper => RpsState::Scissors,
            RpsState::Scissors => RpsState::Rock,
        }
    }

    /// Get from index (0-2).
    pub fn from_index(index: u32) -> Option<RpsState> {
        Self::ALL.get(index as usize).copied()
    }
}

// =============================================================================
// SPATIAL COMPONENTS
// =============================================================================

/// Position (top-left corner, in tiles) and velocity (tiles per second).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    /// Horizontal position.
    pub x_pos: f32,
    /// Vertical position.
    pub y_pos: f32,
    /// Horizontal velocity.
    pub x_vel: f32,
    /// Vertical velocity.
    pub y_vel: f32,
}

impl Transform {
    /// Stationary transform at a position.
    pub fn at(x_pos: f32, y_pos: f32) -> Self {
        Self { x_pos, y_pos, x_vel: 0.0, y_vel: 0.0 }
    }

    /// Whether the entity is moving at all.
    #[inline]
    pub fn is_moving(&self) -> bool {
        self.x_vel != 0.0 || self.y_vel != 0.0
    }
}

/// Collision footprint.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitBox {
    /// Width in tiles.
    pub width: f32,
    /// Height in tiles.
    pub height: f32,
    /// `false` for purely visual entities.
    pub physics_enabled: bool,
}

impl HitBox {
    /// Solid box.
    pub fn solid(width: f32, height: f32) -> Self {
        Self { width, height, physics_enabled: true }
    }

    /// Visual-only box.
    pub fn visual(width: f32, height: f32) -> Self {
        Self { width, height, physics_enabled: false }
    }
}

// =============================================================================
// AVATAR
// =============================================================================

/// Lifecycle state of a player's avatar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AvatarState {
    /// Out of lives.
    Dead,
    /// In play.
    Alive,
    /// Waiting out the respawn delay.
    #[default]
    Respawning,
    /// Watching without a body in play.
    Spectating,
    /// Seated in a tie-breaker cohort.
    BreakingTie,
}

impl AvatarState {
    /// Whether the avatar may change its rock/paper/scissors state.
    #[inline]
    pub fn can_switch_state(self) -> bool {
        !matches!(self, AvatarState::Dead | AvatarState::Respawning | AvatarState::Spectating)
    }
}

/// Active pickup effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerUpType {
    /// Survives one losing collision.
    Shield,
    /// Raises the speed tier while active.
    Speed,
}

/// Mutable per-avatar gameplay data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarStateData {
    /// Lives left. Ignored in endless mode.
    pub lives: u32,
    /// Current combat state.
    pub rock_paper_scissors: RpsState,
    /// Ticks until the next voluntary switch.
    pub state_switch_cooldown_ticks: u32,
    /// Recomputed every tick by physics.
    pub collisions_with_other_players: BTreeSet<EntityId>,
    /// Pickup currently in effect.
    pub active_power_up: Option<PowerUpType>,
    /// Opponents defeated.
    pub kills: u32,
    /// Place in which the avatar was knocked out, 1 first.
    pub elimination_order: Option<u32>,
    /// Set while a forced change from the tie-breaker is being displayed.
    pub auto_state_switched: bool,
    /// Set once the avatar picked a state during the current tie-breaker round.
    pub tie_breaker_choice_locked: bool,
}

impl AvatarStateData {
    /// Fresh data with the given life count.
    pub fn new(lives: u32, rock_paper_scissors: RpsState) -> Self {
        Self {
            lives,
            rock_paper_scissors,
            state_switch_cooldown_ticks: 0,
            collisions_with_other_players: BTreeSet::new(),
            active_power_up: None,
            kills: 0,
            elimination_order: None,
            auto_state_switched: false,
            tie_breaker_choice_locked: false,
        }
    }
}

/// A player-controlled body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    /// Owning human or agent.
    pub player_id: PlayerId,
    /// Speed tier in `0..=2`.
    pub speed: u8,
    /// Lifecycle state.
    pub state: AvatarState,
    /// Gameplay counters and combat state.
    pub state_data: AvatarStateData,
}

impl Avatar {
    /// Highest valid speed tier.
    pub const MAX_SPEED: u8 = 2;

    /// New avatar waiting for its first spawn.
    pub fn new(player_id: PlayerId, lives: u32, rock_paper_scissors: RpsState) -> Self {
        Self {
            player_id,
            speed: 1,
            state: AvatarState::Respawning,
            state_data: AvatarStateData::new(lives, rock_paper_scissors),
        }
    }

    /// Whether the avatar takes part in combat this tick.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.state == AvatarState::Alive
    }
}

/// Movement multiplier for a speed tier.
#[inline]
pub fn speed_multiplier(speed: Option<u8>) -> f32 {
    match speed {
        Some(0) => 0.0,
        Some(1) => 2.5,
        Some(2) => 4.0,
        _ => 1.0,
    }
}

// =============================================================================
// STATIC MAP COMPONENTS
// =============================================================================

/// Solid map tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Barrier {
    /// Sprite shown by clients.
    pub sprite_id: u32,
}

/// Decorative floor tile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Terrain {
    /// Sprite shown by clients.
    pub sprite_id: u32,
}

/// Marks a respawn location.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnPoint {}

// =============================================================================
// TRANSIENT COMPONENTS
// =============================================================================

/// Pickup lying on the field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUp {
    /// Effect granted on pickup.
    #[serde(rename = "type")]
    pub power_up_type: PowerUpType,
    /// Ticks on the field.
    pub ticks_since_created: u32,
    /// Pickable once the activation delay elapsed.
    pub is_active: bool,
}

impl PowerUp {
    /// Freshly spawned, not yet pickable.
    pub fn new(power_up_type: PowerUpType) -> Self {
        Self { power_up_type, ticks_since_created: 0, is_active: false }
    }
}

/// Coarse lifecycle of a cohort, mirrored for clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CohortState {
    /// Bracket still being played.
    Active,
    /// Bracket decided.
    Finished,
}

/// One conflict cohort playing out a bracket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieBreaker {
    /// Avatars seated in the bracket.
    pub ids_of_cohort_members: Vec<EntityId>,
    /// Whether the bracket is still running.
    pub state: CohortState,
    /// Seating and results.
    pub tournament_bracket: TournamentBracket,
    /// Round FSM driving the bracket.
    pub tie_breaker_state: TieBreakerState,
    /// Tick the cohort was detected on.
    pub created_at_tick: u64,
}

// =============================================================================
// SESSION SINGLETONS
// =============================================================================

/// Best kill streak reached by each player this session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillStreakScoreBoard {
    /// Best streak per player.
    pub highest_kill_streak_by_player_id: BTreeMap<PlayerId, u32>,
}

/// Countdown for timed rounds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundTimer {
    /// Milliseconds left in the round.
    pub ms_remaining: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superiority_relation() {
        assert!(RpsState::Rock.beats(RpsState::Scissors));
        assert!(RpsState::Scissors.beats(RpsState::Paper));
        assert!(RpsState::Paper.beats(RpsState::Rock));

        for s in RpsState::ALL {
            assert!(!s.beats(s), "{:?} must tie with itself", s);
            assert!(s.counter().beats(s));
        }
    }

    #[test]
    fn test_shift_cycle() {
        for s in RpsState::ALL {
            assert_eq!(s.shift_left().shift_right(), s);
            assert_ne!(s.shift_left(), s);
        }
        assert_eq!(RpsState::Rock.shift_left(), RpsState::Scissors);
        assert_eq!(RpsState::Rock.shift_right(), RpsState::Paper);
    }

    #[test]
    fn test_speed_multiplier() {
        assert_eq!(speed_multiplier(Some(0)), 0.0);
        assert_eq!(speed_multiplier(Some(1)), 2.5);
        assert_eq!(speed_multiplier(Some(2)), 4.0);
        assert_eq!(speed_multiplier(None), 1.0);
    }

    #[test]
    fn test_switch_permission() {
        assert!(AvatarState::Alive.can_switch_state());
        assert!(AvatarState::BreakingTie.can_switch_state());
        assert!(!AvatarState::Dead.can_switch_state());
        assert!(!AvatarState::Respawning.can_switch_state());
        assert!(!AvatarState::Spectating.can_switch_state());
    }

    #[test]
    fn test_player_id_keys_json_maps() {
        let id = PlayerId::new([7; 16]);
        let board = KillStreakScoreBoard {
            highest_kill_streak_by_player_id: BTreeMap::from([(id, 4)]),
        };
        let json = serde_json::to_string(&board).unwrap();
        assert!(json.contains(&id.to_uuid_string()));
        let back: KillStreakScoreBoard = serde_json::from_str(&json).unwrap();
        assert_eq!(back, board);
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&AvatarState::BreakingTie).unwrap();
        assert_eq!(json, "\"breakingtie\"");

        let t = Transform::at(1.0, 2.0);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("xPos"));
        assert!(json.contains("yVel"));
    }
}
