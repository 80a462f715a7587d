//! Game Session
//!
//! One session owns one world, one command queue and one system pipeline,
//! plus the humans and agents taking part. Lifecycle:
//!
//! ```text
//! INITIALIZING ──open──► WAITING_FOR_PLAYERS ──begin──► IN_PROGRESS ──end──► FINISHED
//! ```
//!
//! Each tick drains the command queue, runs the pipeline, advances the tick
//! counter and broadcasts either a checkpoint or a delta. Agents always get a
//! full snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Deserialize};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::core::rng::SessionRng;
use crate::game::command::{apply_command, Command, CommandQueue, CommandSender};
use crate::game::components::PlayerId;
use crate::game::config::SimulationConfig;
use crate::game::entity::{Entity, EntityError, EntityId};
use crate::game::level::Level;
use crate::game::systems::Pipeline;
use crate::game::world::{GameMode, World};
use crate::network::protocol::{GameStateUpdate, ServerMessage, SessionInfo};

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Created, not yet accepting players.
    Initializing,
    /// Lobby open.
    WaitingForPlayers,
    /// Tick loop running.
    InProgress,
    /// Tick loop stopped. Terminal.
    Finished,
}

/// Configuration for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Humans plus agents.
    pub max_players: usize,
    /// Ticks per second.
    pub tick_rate: u32,
    /// Simulation rules.
    pub simulation: SimulationConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: 8,
            tick_rate: crate::TICK_RATE,
            simulation: SimulationConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults for a game mode.
    pub fn for_mode(game_mode: GameMode) -> Self {
        Self { simulation: SimulationConfig::for_mode(game_mode), ..Self::default() }
    }

    /// Defaults overridden by `SESSION_MAX_PLAYERS`, `SESSION_TICK_RATE` and
    /// `SESSION_CHECKPOINT_TICKS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }
        let mut config = Self::default();
        if let Some(n) = var("SESSION_MAX_PLAYERS") {
            config.max_players = n;
        }
        if let Some(n) = var("SESSION_TICK_RATE") {
            config.tick_rate = n;
        }
        if let Some(n) = var("SESSION_CHECKPOINT_TICKS") {
            config.simulation.max_ticks_between_checkpoints = n;
        }
        config
    }

    /// Reject configurations the tick loop cannot run.
    pub fn validate(&self) -> Result<(), SessionError> {
        let invalid = |reason: &str| Err(SessionError::InvalidSessionConfig(reason.to_owned()));
        let sim = &self.simulation;
        let tb = &sim.tie_breaker;
        if self.max_players == 0 {
            return invalid("max_players must be at least 1");
        }
        if !(1..=1000).contains(&self.tick_rate) {
            return invalid("tick_rate must be within 1..=1000");
        }
        if sim.max_ticks_between_checkpoints == 0 {
            return invalid("max_ticks_between_checkpoints must be at least 1");
        }
        if tb.curr_round_max_ticks == 0 || tb.min_ticks_per_round > tb.curr_round_max_ticks {
            return invalid("tie-breaker rounds need 0 < min_ticks_per_round <= curr_round_max_ticks");
        }
        if sim.game_mode == GameMode::Elimination && sim.lives == 0 {
            return invalid("elimination needs at least one life");
        }
        if !(sim.round_duration_ms.is_finite() && sim.round_duration_ms > 0.0) {
            return invalid("round_duration_ms must be positive");
        }
        Ok(())
    }

    /// Wall-clock budget of one tick.
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }
}

/// A human in a session.
#[derive(Debug)]
pub struct SessionPlayer {
    /// Player identifier.
    pub player_id: PlayerId,
    /// Avatar, once the game has begun.
    pub entity_id: Option<EntityId>,
    /// Outbound channel to the connection's writer task.
    pub sender: mpsc::Sender<ServerMessage>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// Tick counter after the tick.
    pub tick: u64,
    /// A checkpoint went out.
    pub is_checkpoint: bool,
    /// Commands that changed something.
    pub commands_applied: usize,
    /// Wall-clock execution time.
    pub elapsed: Duration,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Not accepting players.
    #[error("session is not open")]
    SessionNotOpen,

    /// Participant cap reached.
    #[error("session is full")]
    SessionFull,

    /// Player already joined.
    #[error("already in session")]
    AlreadyInSession,

    /// Operation not valid in the current lifecycle state.
    #[error("invalid session state: {0:?}")]
    InvalidState(SessionState),

    /// Player is not part of the session.
    #[error("player not found")]
    PlayerNotFound,

    /// Configuration rejected.
    #[error("invalid session config: {0}")]
    InvalidSessionConfig(String),

    /// Entity rejected.
    #[error(transparent)]
    Entity(#[from] EntityError),
}

/// A game session.
pub struct GameSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Join code.
    pub friendly_name: String,
    /// Listed in the lobby.
    pub is_public: bool,
    state: SessionState,
    config: SessionConfig,
    players: BTreeMap<PlayerId, SessionPlayer>,
    agents: Vec<Box<dyn Agent>>,
    agent_entities: BTreeMap<PlayerId, EntityId>,
    world: Option<World>,
    pipeline: Pipeline,
    commands: CommandQueue,
    last_tick_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl GameSession {
    /// Create a session in `INITIALIZING`.
    pub fn new(
        id: SessionId,
        friendly_name: String,
        is_public: bool,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            id,
            friendly_name,
            is_public,
            state: SessionState::Initializing,
            config,
            players: BTreeMap::new(),
            agents: Vec::new(),
            agent_entities: BTreeMap::new(),
            world: None,
            pipeline: Pipeline::new(),
            commands: CommandQueue::new(),
            last_tick_at: None,
            finished_at: None,
        })
    }

    /// Id in UUID form.
    pub fn id_string(&self) -> String {
        uuid::Uuid::from_bytes(self.id).to_string()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// `INITIALIZING → WAITING_FOR_PLAYERS`.
    pub fn open_session(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Initializing {
            return Err(SessionError::InvalidState(self.state));
        }
        self.state = SessionState::WaitingForPlayers;
        info!(session = %self.friendly_name, "session open");
        Ok(())
    }

    /// Add a human.
    pub fn player_connected(
        &mut self,
        player_id: PlayerId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::WaitingForPlayers {
            return Err(SessionError::SessionNotOpen);
        }
        if self.players.contains_key(&player_id) {
            return Err(SessionError::AlreadyInSession);
        }
        if self.participant_count() >= self.config.max_players {
            return Err(SessionError::SessionFull);
        }
        self.players.insert(player_id, SessionPlayer { player_id, entity_id: None, sender });
        debug!(session = %self.friendly_name, player = %player_id.short(), "player joined");
        Ok(())
    }

    /// Attach an agent. The agent must have been built with [`Self::command_sender`].
    pub fn add_agent(&mut self, agent: Box<dyn Agent>) -> Result<(), SessionError> {
        if self.state != SessionState::WaitingForPlayers {
            return Err(SessionError::SessionNotOpen);
        }
        if self.participant_count() >= self.config.max_players {
            return Err(SessionError::SessionFull);
        }
        debug!(session = %self.friendly_name, bot = %agent.bot_id().short(), "agent attached");
        self.agents.push(agent);
        Ok(())
    }

    /// Remove a human. An in-game avatar is removed with them.
    pub fn player_disconnected(&mut self, player_id: &PlayerId) -> Result<(), SessionError> {
        let player = self.players.remove(player_id).ok_or(SessionError::PlayerNotFound)?;
        if let (Some(world), Some(entity)) = (self.world.as_mut(), player.entity_id) {
            world.entities.remove(entity);
        }
        info!(session = %self.friendly_name, player = %player_id.short(), "player left");
        Ok(())
    }

    /// `WAITING_FOR_PLAYERS → IN_PROGRESS`: generate the world and spawn
    /// everyone. The caller starts the tick loop.
    pub fn begin_game_session(&mut self, level: &dyn Level) -> Result<(), SessionError> {
        if self.state != SessionState::WaitingForPlayers {
            return Err(SessionError::InvalidState(self.state));
        }
        let rng = SessionRng::for_session(&self.id);
        let mut world = World::generate(level, &self.config.simulation, rng)?;
        let lives = self.config.simulation.lives;

        for player in self.players.values_mut() {
            player.entity_id = Some(world.spawn_avatar(player.player_id, lives)?);
        }
        for agent in &self.agents {
            let bot_id = agent.bot_id();
            self.agent_entities.insert(bot_id, world.spawn_avatar(bot_id, lives)?);
        }

        self.world = Some(world);
        self.state = SessionState::InProgress;
        self.last_tick_at = None;
        info!(
            session = %self.friendly_name,
            players = self.players.len(),
            agents = self.agents.len(),
            mode = ?self.config.simulation.game_mode,
            "session started"
        );

        let session_id = self.id_string();
        for player in self.players.values() {
            send_or_log(player, ServerMessage::SessionStarted {
                session_id: session_id.clone(),
                entity_id: player.entity_id,
            });
        }
        Ok(())
    }

    /// Stop ticking. Idempotent.
    pub fn end_game_session(&mut self) {
        if self.state == SessionState::Finished {
            return;
        }
        self.state = SessionState::Finished;
        self.finished_at = Some(Instant::now());
        info!(session = %self.friendly_name, tick = self.current_tick(), "session finished");
        self.broadcast(&ServerMessage::SessionEnded { session_id: self.id_string() });
    }

    // =========================================================================
    // COMMANDS & ENTITIES
    // =========================================================================

    /// Handle for pushing commands from outside the tick.
    pub fn command_sender(&self) -> CommandSender {
        self.commands.sender()
    }

    /// Queue a command for the next tick. Dropped unless in progress.
    pub fn push_command(&self, sender: PlayerId, command: Command) {
        if self.state != SessionState::InProgress {
            debug!(
                session = %self.friendly_name,
                sender = %sender.short(),
                state = ?self.state,
                "session not running, dropping command"
            );
            return;
        }
        self.commands.push(sender, command);
    }

    /// Add an entity to the running world.
    pub fn instantiate_entity(&mut self, entity: Entity) -> Result<EntityId, SessionError> {
        let state = self.state;
        let world = self.world.as_mut().ok_or(SessionError::InvalidState(state))?;
        Ok(world.entities.instantiate(entity)?)
    }

    /// Remove an entity from the running world.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        self.world
            .as_mut()
            .and_then(|w| w.entities.remove(id))
            .is_some()
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Run one tick. `None` unless in progress.
    pub fn run_tick(&mut self, now: Instant) -> Option<TickReport> {
        if self.state != SessionState::InProgress {
            return None;
        }
        let started = Instant::now();
        let period = self.config.tick_period();
        let delta = self.last_tick_at.map_or(period, |last| now.saturating_duration_since(last));
        self.last_tick_at = Some(now);

        let cooldown_max = self.config.simulation.state_switch_cooldown_max_ticks;
        let checkpoint_every = self.config.simulation.max_ticks_between_checkpoints;
        let queued = self.commands.drain();
        let agents_waiting = !self.agents.is_empty();
        let world = self.world.as_mut()?;

        world.delta_time = delta.as_secs_f64() * 1000.0;
        world.last_tick_time = unix_millis();

        let commands_applied = queued
            .iter()
            .filter(|q| apply_command(&mut world.entities, q, cooldown_max))
            .count();

        self.pipeline.run(world, &self.config.simulation);
        world.current_tick += 1;

        let tick = world.current_tick;
        let is_checkpoint = (tick - 1) % checkpoint_every == 0;
        let full = full_state_needed(is_checkpoint, agents_waiting)
            .then(|| Arc::new(GameStateUpdate::checkpoint(world)));
        let outbound = match &full {
            Some(full) if is_checkpoint => {
                world.entities.clear_tracking();
                (**full).clone()
            }
            _ => GameStateUpdate::delta(world),
        };
        let round_over = world.round_over;

        self.broadcast(&ServerMessage::GameStateUpdate(outbound));
        if let Some(full) = &full {
            for agent in &mut self.agents {
                agent.tick(full);
            }
        }

        let elapsed = started.elapsed();
        if elapsed > period {
            warn!(
                session = %self.friendly_name,
                tick,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = period.as_secs_f64() * 1000.0,
                "tick over budget"
            );
        }

        if round_over {
            self.end_game_session();
        }

        Some(TickReport { tick, is_checkpoint, commands_applied, elapsed })
    }

    /// Send to every human. A full or closed channel drops the message for
    /// that player only.
    pub fn broadcast(&self, message: &ServerMessage) {
        for player in self.players.values() {
            send_or_log(player, message.clone());
        }
    }

    /// Full snapshot of the current world.
    pub fn snapshot(&self) -> Option<GameStateUpdate> {
        self.world.as_ref().map(GameStateUpdate::checkpoint)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Human count.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Agent count.
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Humans plus agents.
    pub fn participant_count(&self) -> usize {
        self.players.len() + self.agents.len()
    }

    /// Whether `player_id` is a human in this session.
    pub fn has_player(&self, player_id: &PlayerId) -> bool {
        self.players.contains_key(player_id)
    }

    /// Ids of the humans.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    /// A participant's avatar.
    pub fn entity_of(&self, player_id: &PlayerId) -> Option<EntityId> {
        self.players
            .get(player_id)
            .and_then(|p| p.entity_id)
            .or_else(|| self.agent_entities.get(player_id).copied())
    }

    /// The world, once begun.
    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    /// Tick counter.
    pub fn current_tick(&self) -> u64 {
        self.world.as_ref().map_or(0, |w| w.current_tick)
    }

    /// How long ago the session finished.
    pub fn finished_for(&self) -> Option<Duration> {
        self.finished_at.map(|t| t.elapsed())
    }

    /// Lobby view.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id_string(),
            friendly_name: self.friendly_name.clone(),
            is_public: self.is_public,
            game_mode: self.config.simulation.game_mode,
            state: self.state,
            player_count: self.participant_count(),
            max_players: self.config.max_players,
        }
    }
}

fn send_or_log(player: &SessionPlayer, message: ServerMessage) {
    if let Err(e) = player.sender.try_send(message) {
        debug!(player = %player.player_id.short(), error = %e, "dropping message for player");
    }
}

/// Unix time in milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Checkpoints go out whole and agents read whole state; a delta tick with
/// no agents never needs it.
fn full_state_needed(is_checkpoint: bool, has_agents: bool) -> bool {
    is_checkpoint || has_agents
}

/// Drive a session's ticks until it leaves `IN_PROGRESS`.
///
/// Late ticks push the schedule back; none are skipped or run twice.
pub async fn run_session_loop(session: Arc<Mutex<GameSession>>) {
    let (period, name) = {
        let s = session.lock().await;
        (s.config.tick_period(), s.friendly_name.clone())
    };
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let mut s = session.lock().await;
        if s.run_tick(Instant::now()).is_none() || s.state() != SessionState::InProgress {
            break;
        }
    }
    debug!(session = %name, "tick loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentFactory, BotFactory};
    use crate::game::command::Direction;
    use crate::game::components::{AvatarState, Transform};
    use crate::game::level::ArenaLevel;

    fn open_session(config: SessionConfig) -> GameSession {
        let mut session = GameSession::new([7; 16], "calm-heron-07".into(), true, config).unwrap();
        session.open_session().unwrap();
        session
    }

    fn join(session: &mut GameSession, byte: u8) -> (PlayerId, mpsc::Receiver<ServerMessage>) {
        let id = PlayerId::new([byte; 16]);
        let (tx, rx) = mpsc::channel(1024);
        session.player_connected(id, tx).unwrap();
        (id, rx)
    }

    fn updates(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<GameStateUpdate> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ServerMessage::GameStateUpdate(u) = msg {
                out.push(u);
            }
        }
        out
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = GameSession::new([1; 16], "x".into(), false, SessionConfig::default()).unwrap();
        assert_eq!(session.state(), SessionState::Initializing);

        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(session.player_connected(PlayerId::new([1; 16]), tx), Err(SessionError::SessionNotOpen));
        assert!(matches!(
            session.begin_game_session(&ArenaLevel::default()),
            Err(SessionError::InvalidState(SessionState::Initializing))
        ));

        session.open_session().unwrap();
        assert!(session.open_session().is_err());
        session.begin_game_session(&ArenaLevel::default()).unwrap();
        assert_eq!(session.state(), SessionState::InProgress);

        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(session.player_connected(PlayerId::new([2; 16]), tx), Err(SessionError::SessionNotOpen));

        session.end_game_session();
        assert_eq!(session.state(), SessionState::Finished);
        assert!(session.run_tick(Instant::now()).is_none());
    }

    #[test]
    fn test_session_full_and_duplicate() {
        let mut session = open_session(SessionConfig { max_players: 2, ..SessionConfig::default() });
        let (a, _rx_a) = join(&mut session, 1);
        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(session.player_connected(a, tx), Err(SessionError::AlreadyInSession));

        let _b = join(&mut session, 2);
        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(session.player_connected(PlayerId::new([3; 16]), tx), Err(SessionError::SessionFull));

        let agent = BotFactory.create(PlayerId::new([4; 16]), session.command_sender());
        assert_eq!(session.add_agent(agent), Err(SessionError::SessionFull));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = SessionConfig::default();
        config.simulation.max_ticks_between_checkpoints = 0;
        assert!(matches!(
            GameSession::new([0; 16], "x".into(), true, config),
            Err(SessionError::InvalidSessionConfig(_))
        ));

        let mut config = SessionConfig::default();
        config.simulation.tie_breaker.min_ticks_per_round = config.simulation.tie_breaker.curr_round_max_ticks + 1;
        assert!(config.validate().is_err());

        assert!(SessionConfig { tick_rate: 0, ..SessionConfig::default() }.validate().is_err());
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_checkpoint_cadence() {
        let mut config = SessionConfig::default();
        config.simulation.max_ticks_between_checkpoints = 5;
        let mut session = open_session(config);
        let (_p, mut rx) = join(&mut session, 1);
        session.begin_game_session(&ArenaLevel::default()).unwrap();

        let start = Instant::now();
        let reports: Vec<TickReport> = (0..11)
            .map(|i| session.run_tick(start + Duration::from_millis(33 * i)).unwrap())
            .collect();

        let checkpoints: Vec<u64> = reports.iter().filter(|r| r.is_checkpoint).map(|r| r.tick).collect();
        assert_eq!(checkpoints, vec![1, 6, 11]);

        let sent = updates(&mut rx);
        assert_eq!(sent.len(), 11);
        assert!(sent[0].is_checkpoint && sent[0].removed_entities.is_empty());
        assert!(!sent[1].is_checkpoint);
        assert_eq!(sent[10].game_context.current_tick, 11);
    }

    #[test]
    fn test_delta_time_from_wall_clock() {
        let mut session = open_session(SessionConfig::default());
        session.begin_game_session(&ArenaLevel::default()).unwrap();

        let start = Instant::now();
        session.run_tick(start).unwrap();
        session.run_tick(start + Duration::from_millis(50)).unwrap();
        let dt = session.world().unwrap().delta_time;
        assert!((dt - 50.0).abs() < 1e-6, "delta_time was {}", dt);
    }

    #[test]
    fn test_commands_apply_next_tick_in_order() {
        let mut session = open_session(SessionConfig::default());
        let (p, _rx) = join(&mut session, 1);
        session.begin_game_session(&ArenaLevel::open(24)).unwrap();
        let entity = session.entity_of(&p).unwrap();

        // Spawn delay elapses before movement is accepted
        let start = Instant::now();
        let respawn = session.config().simulation.ticks_to_respawn as u64;
        for i in 0..=respawn {
            session.run_tick(start + Duration::from_millis(i)).unwrap();
        }
        let avatar = session.world().unwrap().entities.get(entity).unwrap().avatar.clone().unwrap();
        assert_eq!(avatar.state, AvatarState::Alive);

        session.push_command(p, Command::Move { entity_id: entity, direction: Direction::Right });
        session.push_command(p, Command::Stop { entity_id: entity, direction: Direction::Right });
        let report = session.run_tick(start + Duration::from_millis(200)).unwrap();
        assert_eq!(report.commands_applied, 2);
        let t: Transform = session.world().unwrap().entities.get(entity).unwrap().transform.unwrap();
        assert_eq!(t.x_vel, 0.0);
    }

    #[test]
    fn test_commands_outside_game_are_dropped() {
        let mut session = open_session(SessionConfig::default());
        let (p, _rx) = join(&mut session, 1);
        for _ in 0..10 {
            session.push_command(p, Command::StateShiftLeft { entity_id: EntityId(1) });
        }
        session.begin_game_session(&ArenaLevel::default()).unwrap();
        assert!(session.commands.drain().is_empty());

        let entity = session.entity_of(&p).unwrap();
        session.push_command(p, Command::StateShiftLeft { entity_id: entity });
        assert_eq!(session.commands.drain().len(), 1);

        session.end_game_session();
        session.push_command(p, Command::StateShiftLeft { entity_id: entity });
        assert!(session.commands.drain().is_empty());
    }

    #[test]
    fn test_full_state_only_for_checkpoints_or_agents() {
        assert!(full_state_needed(true, false));
        assert!(full_state_needed(false, true));
        assert!(!full_state_needed(false, false));

        // Without agents, delta ticks still carry only what changed
        let mut config = SessionConfig::default();
        config.simulation.max_ticks_between_checkpoints = 4;
        let mut session = open_session(config);
        let (_p, mut rx) = join(&mut session, 1);
        session.begin_game_session(&ArenaLevel::default()).unwrap();
        let start = Instant::now();
        for i in 0..4u64 {
            session.run_tick(start + Duration::from_millis(33 * i)).unwrap();
        }
        let flags: Vec<_> = updates(&mut rx).iter().map(|u| u.is_checkpoint).collect();
        assert_eq!(flags, vec![true, false, false, false]);
    }

    #[test]
    fn test_disconnect_removes_avatar() {
        let mut session = open_session(SessionConfig::default());
        let (a, _rx_a) = join(&mut session, 1);
        let (_b, mut rx_b) = join(&mut session, 2);
        session.begin_game_session(&ArenaLevel::default()).unwrap();
        let entity = session.entity_of(&a).unwrap();

        session.run_tick(Instant::now()).unwrap();
        session.player_disconnected(&a).unwrap();
        assert_eq!(session.player_disconnected(&a), Err(SessionError::PlayerNotFound));
        session.run_tick(Instant::now()).unwrap();

        let last = updates(&mut rx_b).pop().unwrap();
        assert!(!last.is_checkpoint);
        assert!(last.removed_entities.contains(&entity));
    }

    #[test]
    fn test_full_channel_does_not_block_others() {
        let mut session = open_session(SessionConfig::default());
        let (tx_small, _rx_small) = mpsc::channel(1);
        session.player_connected(PlayerId::new([1; 16]), tx_small).unwrap();
        let (_b, mut rx_b) = join(&mut session, 2);
        session.begin_game_session(&ArenaLevel::default()).unwrap();

        for _ in 0..5 {
            session.run_tick(Instant::now()).unwrap();
        }
        assert_eq!(updates(&mut rx_b).len(), 5);
    }

    #[test]
    fn test_agents_get_full_state_and_play() {
        let mut session = open_session(SessionConfig::default());
        let bot_id = PlayerId::new([9; 16]);
        let agent = BotFactory.create(bot_id, session.command_sender());
        session.add_agent(agent).unwrap();
        session.begin_game_session(&ArenaLevel::default()).unwrap();
        assert!(session.entity_of(&bot_id).is_some());

        for _ in 0..5 {
            session.run_tick(Instant::now()).unwrap();
        }
        assert_eq!(session.current_tick(), 5);
        assert_eq!(session.info().player_count, 1);
    }

    #[test]
    fn test_instantiate_and_remove_entity() {
        let mut session = open_session(SessionConfig::default());
        assert!(session.instantiate_entity(Entity::new().with_spawn_point()).is_err());

        session.begin_game_session(&ArenaLevel::default()).unwrap();
        let id = session.instantiate_entity(Entity::new().with_spawn_point()).unwrap();
        assert!(session.world().unwrap().entities.modified().contains(&id));
        assert!(session.remove_entity(id));
        assert!(!session.remove_entity(id));
        assert!(session.world().unwrap().entities.removed().contains(&id));
    }

    #[tokio::test]
    async fn test_session_loop_runs_until_finished() {
        let mut session = open_session(SessionConfig { tick_rate: 200, ..SessionConfig::default() });
        session.begin_game_session(&ArenaLevel::default()).unwrap();
        let session = Arc::new(Mutex::new(session));

        let handle = tokio::spawn(run_session_loop(session.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        session.lock().await.end_game_session();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert!(session.lock().await.current_tick() > 0);
    }

    fn command_for(entity: EntityId, op: u8, arg: u8) -> Command {
        let direction = [Direction::Up, Direction::Down, Direction::Left, Direction::Right][(arg % 4) as usize];
        match op % 5 {
            0 => Command::Move { entity_id: entity, direction },
            1 => Command::Stop { entity_id: entity, direction },
            2 => Command::StateShiftLeft { entity_id: entity },
            3 => Command::StateShiftRight { entity_id: entity },
            _ => Command::StateChange {
                entity_id: entity,
                state: crate::game::components::RpsState::from_index(u32::from(arg % 3)).unwrap(),
            },
        }
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        #[test]
        fn prop_client_view_tracks_world(
            checkpoint_every in 1u64..8,
            ops in proptest::collection::vec((0u8..5, 0u8..12, proptest::bool::ANY), 1..80),
        ) {
            let mut config = SessionConfig::default();
            config.simulation.max_ticks_between_checkpoints = checkpoint_every;
            let mut session = open_session(config);
            let (player, mut rx) = join(&mut session, 1);
            let (leaver, _leaver_rx) = join(&mut session, 3);
            let agent = BotFactory.create(PlayerId::new([2; 16]), session.command_sender());
            session.add_agent(agent).unwrap();
            session.begin_game_session(&ArenaLevel::default()).unwrap();
            let entity = session.entity_of(&player).unwrap();

            let leave_at = ops.len() / 2;
            let mut view = crate::network::protocol::ClientWorldView::new();
            let start = Instant::now();
            for (i, (op, arg, send)) in ops.into_iter().enumerate() {
                if send {
                    session.push_command(player, command_for(entity, op, arg));
                }
                if i == leave_at {
                    session.player_disconnected(&leaver).unwrap();
                }
                let now = start + Duration::from_millis(33 * (i as u64 + 1));
                if session.run_tick(now).is_none() {
                    break;
                }
                for update in updates(&mut rx) {
                    proptest::prop_assert!(view.apply(&update));
                }
                let snapshot = session.snapshot().unwrap();
                proptest::prop_assert_eq!(view.entities(), &snapshot.game_context.entities);
                proptest::prop_assert_eq!(view.current_tick(), Some(session.current_tick()));
            }
        }
    }
}
