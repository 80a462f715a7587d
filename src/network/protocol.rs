//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Control messages and state broadcasts are JSON; game commands may also
//! arrive as compact bincode [`CommandFrame`]s in binary frames.
//!
//! Game commands (`MOVE`, `STOP`, ...) are not part of [`ClientMessage`]:
//! they share the `type` tag but go through the command validator instead.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::game::command::{Command, Direction};
use crate::game::components::RpsState;
use crate::game::entity::{Entity, EntityId};
use crate::game::world::{GameMode, World};
use crate::network::session::SessionState;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Control messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Authenticate with the server.
    Auth(AuthRequest),

    /// Open a new session and join it.
    CreateSession(CreateSessionRequest),

    /// Join by session id or friendly name.
    JoinSession {
        /// Session id or friendly name.
        session: String,
    },

    /// List public sessions waiting for players.
    ListSessions,

    /// Attach a scripted agent to the caller's session.
    AddAgent,

    /// Start the caller's session.
    StartSession,

    /// Leave the current session.
    Leave,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// JWT. Omitted in guest mode.
    #[serde(default)]
    pub token: Option<String>,
    /// Client version for compatibility check.
    #[serde(default)]
    pub client_version: Option<String>,
}

/// Session creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Listed in the lobby and filled with agents on start.
    #[serde(default = "default_public")]
    pub is_public: bool,
    /// Round rules.
    #[serde(default)]
    pub game_mode: GameMode,
}

fn default_public() -> bool {
    true
}

impl Default for CreateSessionRequest {
    fn default() -> Self {
        Self { is_public: true, game_mode: GameMode::default() }
    }
}

/// Binary command frame.
///
/// A flat struct so bincode can carry it; the tagged [`Command`] enum is JSON
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    /// 0 move, 1 stop, 2 shift left, 3 shift right, 4 change.
    pub kind: u8,
    /// Target entity.
    pub entity_id: u64,
    /// Direction index (up, down, left, right) or state index (rock, paper, scissors).
    pub arg: u8,
}

impl CommandFrame {
    /// Decode into a command. `None` for unknown kinds or arguments.
    pub fn to_command(self) -> Option<Command> {
        let entity_id = EntityId(self.entity_id);
        let direction = || match self.arg {
            0 => Some(Direction::Up),
            1 => Some(Direction::Down),
            2 => Some(Direction::Left),
            3 => Some(Direction::Right),
            _ => None,
        };
        match self.kind {
            0 => Some(Command::Move { entity_id, direction: direction()? }),
            1 => Some(Command::Stop { entity_id, direction: direction()? }),
            2 => Some(Command::StateShiftLeft { entity_id }),
            3 => Some(Command::StateShiftRight { entity_id }),
            4 => Some(Command::StateChange { entity_id, state: RpsState::from_index(self.arg as u32)? }),
            _ => None,
        }
    }

    /// Encode a command.
    pub fn from_command(command: &Command) -> Self {
        let dir = |d: Direction| match d {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        };
        let (kind, arg) = match command {
            Command::Move { direction, .. } => (0, dir(*direction)),
            Command::Stop { direction, .. } => (1, dir(*direction)),
            Command::StateShiftLeft { .. } => (2, 0),
            Command::StateShiftRight { .. } => (3, 0),
            Command::StateChange { state, .. } => (4, *state as u8),
        };
        Self { kind, entity_id: command.entity_id().0, arg }
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Session created; the caller is its first participant.
    SessionCreated(SessionInfo),

    /// Session joined.
    SessionJoined(SessionInfo),

    /// Public sessions waiting for players.
    SessionList {
        /// Listed sessions.
        sessions: Vec<SessionInfo>,
    },

    /// Agent attached.
    #[serde(rename_all = "camelCase")]
    AgentAdded {
        /// Agent's player id.
        bot_id: String,
    },

    /// Session is in progress. Sent to every human participant.
    #[serde(rename_all = "camelCase")]
    SessionStarted {
        /// Session id.
        session_id: String,
        /// The recipient's avatar.
        entity_id: Option<EntityId>,
    },

    /// Per-tick state broadcast.
    #[serde(rename = "GAMESTATE_UPDATE")]
    GameStateUpdate(GameStateUpdate),

    /// Session finished.
    #[serde(rename_all = "camelCase")]
    SessionEnded {
        /// Session id.
        session_id: String,
    },

    /// Pong response.
    #[serde(rename_all = "camelCase")]
    Pong {
        /// Client timestamp.
        timestamp: u64,
        /// Server unix millis.
        server_time: u64,
    },

    /// Error.
    Error(ServerError),

    /// Server shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    /// Success.
    pub success: bool,
    /// Assigned player id (UUID form).
    pub player_id: Option<String>,
    /// No token was checked.
    pub guest: bool,
    /// Failure reason.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Lobby view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session id (UUID form).
    pub session_id: String,
    /// `adjective-noun-NN` join code.
    pub friendly_name: String,
    /// Listed publicly.
    pub is_public: bool,
    /// Round rules.
    pub game_mode: GameMode,
    /// Lifecycle state.
    pub state: SessionState,
    /// Connected humans plus agents.
    pub player_count: usize,
    /// Capacity.
    pub max_players: usize,
}

/// Simulation state as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameContext {
    /// Full map on a checkpoint, modified entities on a delta.
    #[serde(with = "entity_map")]
    pub entities: BTreeMap<EntityId, Entity>,
    /// Tick counter after this tick ran.
    pub current_tick: u64,
    /// Grid side in tiles.
    pub grid_width: u32,
    /// Milliseconds the tick covered.
    pub delta_time: f64,
    /// Round rules.
    pub game_mode: GameMode,
    /// Unix millis at tick start.
    pub last_tick_time: u64,
}

impl GameContext {
    /// Context header from a world, with the given entity map.
    pub fn from_world(world: &World, entities: BTreeMap<EntityId, Entity>) -> Self {
        Self {
            entities,
            current_tick: world.current_tick,
            grid_width: world.grid_width,
            delta_time: world.delta_time,
            game_mode: world.game_mode,
            last_tick_time: world.last_tick_time,
        }
    }
}

/// Checkpoint or delta broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateUpdate {
    /// State.
    pub game_context: GameContext,
    /// Full snapshot when true.
    pub is_checkpoint: bool,
    /// Ids removed since the last checkpoint. Empty on a checkpoint.
    pub removed_entities: Vec<EntityId>,
}

impl GameStateUpdate {
    /// Full snapshot of a world.
    pub fn checkpoint(world: &World) -> Self {
        Self {
            game_context: GameContext::from_world(world, world.entities.snapshot()),
            is_checkpoint: true,
            removed_entities: Vec::new(),
        }
    }

    /// Entities modified and removed since the last checkpoint.
    pub fn delta(world: &World) -> Self {
        Self {
            game_context: GameContext::from_world(world, world.entities.modified_snapshot()),
            is_checkpoint: false,
            removed_entities: world.entities.removed().iter().copied().collect(),
        }
    }
}

/// JSON object keys are strings; entity ids are carried as decimal keys.
mod entity_map {
    use std::collections::BTreeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde::de::Error as _;
    use serde::ser::SerializeMap;

    use crate::game::entity::{Entity, EntityId};

    pub fn serialize<S: Serializer>(map: &BTreeMap<EntityId, Entity>, s: S) -> Result<S::Ok, S::Error> {
        let mut out = s.serialize_map(Some(map.len()))?;
        for (id, entity) in map {
            out.serialize_entry(&id.0.to_string(), entity)?;
        }
        out.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<EntityId, Entity>, D::Error> {
        BTreeMap::<String, Entity>::deserialize(d)?
            .into_iter()
            .map(|(k, v)| {
                k.parse::<u64>()
                    .map(|id| (EntityId(id), v))
                    .map_err(|_| D::Error::custom(format!("invalid entity id key: {}", k)))
            })
            .collect()
    }
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Malformed message or command.
    InvalidInput,
    /// Too many commands.
    RateLimited,
    /// No such session.
    SessionNotFound,
    /// Friendly name is not `adjective-noun-NN`.
    InvalidFriendlyName,
    /// Session not accepting players.
    SessionNotOpen,
    /// Session at capacity.
    SessionFull,
    /// Already in a session.
    AlreadyInSession,
    /// Not in a session.
    NotInSession,
    /// Public session cap reached.
    MaxSessionsReached,
    /// Server at connection capacity.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// CLIENT-SIDE RECONSTRUCTION
// =============================================================================

/// Entity map rebuilt from checkpoints and deltas.
///
/// Deltas are ignored until the first checkpoint arrives.
#[derive(Debug, Clone, Default)]
pub struct ClientWorldView {
    entities: BTreeMap<EntityId, Entity>,
    current_tick: Option<u64>,
    synced: bool,
}

impl ClientWorldView {
    /// Empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay one broadcast. Returns false if a delta was skipped for lack of
    /// a checkpoint.
    pub fn apply(&mut self, update: &GameStateUpdate) -> bool {
        if update.is_checkpoint {
            self.entities = update.game_context.entities.clone();
            self.synced = true;
        } else if !self.synced {
            return false;
        } else {
            for id in &update.removed_entities {
                self.entities.remove(id);
            }
            for (id, entity) in &update.game_context.entities {
                self.entities.insert(*id, entity.clone());
            }
        }
        self.current_tick = Some(update.game_context.current_tick);
        true
    }

    /// Reconstructed entities.
    pub fn entities(&self) -> &BTreeMap<EntityId, Entity> {
        &self.entities
    }

    /// Tick of the last applied broadcast.
    pub fn current_tick(&self) -> Option<u64> {
        self.current_tick
    }

    /// Whether a checkpoint has been seen.
    pub fn is_synced(&self) -> bool {
        self.synced
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Error message shorthand.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(code, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::SessionRng;
    use crate::game::components::{KillStreakScoreBoard, PlayerId, Transform};
    use crate::game::config::SimulationConfig;

    fn world_with_entities() -> World {
        let mut world = World::new(&SimulationConfig::default(), 12, SessionRng::new(1));
        world.entities.instantiate(Entity::new().with_transform(Transform::at(1.0, 2.0))).unwrap();
        world.entities.instantiate(Entity {
            kill_streak_score_board: Some(KillStreakScoreBoard {
                highest_kill_streak_by_player_id: BTreeMap::from([(PlayerId::new([3; 16]), 2)]),
            }),
            ..Entity::default()
        }).unwrap();
        world.current_tick = 31;
        world
    }

    #[test]
    fn test_client_message_json() {
        let msg = ClientMessage::from_json(r#"{"type":"JOIN_SESSION","session":"brave-otter-42"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::JoinSession { ref session } if session == "brave-otter-42"));

        let create = ClientMessage::from_json(r#"{"type":"CREATE_SESSION"}"#).unwrap();
        match create {
            ClientMessage::CreateSession(req) => {
                assert!(req.is_public);
                assert_eq!(req.game_mode, GameMode::Endless);
            }
            other => panic!("unexpected {:?}", other),
        }

        let create = ClientMessage::from_json(
            r#"{"type":"CREATE_SESSION","isPublic":false,"gameMode":"ELIMINATION"}"#,
        ).unwrap();
        assert!(matches!(
            create,
            ClientMessage::CreateSession(CreateSessionRequest { is_public: false, game_mode: GameMode::Elimination })
        ));

        let ping = ClientMessage::Ping { timestamp: 9 }.to_json().unwrap();
        assert_eq!(ping, r#"{"type":"PING","timestamp":9}"#);
    }

    #[test]
    fn test_gamestate_update_wire_shape() {
        let world = world_with_entities();
        let msg = ServerMessage::GameStateUpdate(GameStateUpdate::checkpoint(&world));
        let json = msg.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "GAMESTATE_UPDATE");
        assert_eq!(value["isCheckpoint"], true);
        assert_eq!(value["gameContext"]["currentTick"], 31);
        assert_eq!(value["gameContext"]["gridWidth"], 12);
        assert_eq!(value["gameContext"]["gameMode"], "ENDLESS");
        assert_eq!(value["gameContext"]["entities"]["1"]["transform"]["xPos"], 1.0);
        assert!(value["removedEntities"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_gamestate_update_decodes_through_tagged_enum() {
        let world = world_with_entities();
        let update = GameStateUpdate::checkpoint(&world);
        let json = ServerMessage::GameStateUpdate(update.clone()).to_json().unwrap();

        match ServerMessage::from_json(&json).unwrap() {
            ServerMessage::GameStateUpdate(back) => assert_eq!(back, update),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_delta_carries_only_tracked_ids() {
        let mut world = world_with_entities();
        world.entities.clear_tracking();
        let moved = EntityId(1);
        world.entities.get_mut(moved).unwrap().transform.as_mut().unwrap().x_pos = 5.0;
        let gone = world.entities.instantiate(Entity::new().with_spawn_point()).unwrap();
        world.entities.remove(gone);

        let delta = GameStateUpdate::delta(&world);
        assert!(!delta.is_checkpoint);
        assert_eq!(delta.game_context.entities.keys().copied().collect::<Vec<_>>(), vec![moved]);
        assert_eq!(delta.removed_entities, vec![gone]);
    }

    #[test]
    fn test_view_ignores_delta_before_checkpoint() {
        let world = world_with_entities();
        let mut view = ClientWorldView::new();

        assert!(!view.apply(&GameStateUpdate::delta(&world)));
        assert!(!view.is_synced());
        assert!(view.apply(&GameStateUpdate::checkpoint(&world)));
        assert_eq!(view.entities(), &world.entities.snapshot());
        assert_eq!(view.current_tick(), Some(31));
    }

    #[test]
    fn test_command_frame_binary() {
        let cmd = Command::StateChange { entity_id: EntityId(17), state: RpsState::Scissors };
        let frame = CommandFrame::from_command(&cmd);
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(CommandFrame::from_bytes(&bytes).unwrap().to_command(), Some(cmd));

        let bad = CommandFrame { kind: 0, entity_id: 1, arg: 9 };
        assert_eq!(bad.to_command(), None);
        let unknown = CommandFrame { kind: 42, entity_id: 1, arg: 0 };
        assert_eq!(unknown.to_command(), None);
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::error(ErrorCode::SessionFull, "full");
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"ERROR""#));
        assert!(json.contains(r#""code":"session_full""#));
    }
}
