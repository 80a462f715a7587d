//! Session Manager
//!
//! Owns every session plus the lookups into them: by id, by friendly name and
//! by participant. Also the only place agents are created and tick loops are
//! spawned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

use crate::agent::AgentFactory;
use crate::core::rng::{derive_session_seed, SessionRng};
use crate::game::components::PlayerId;
use crate::game::level::Level;
use crate::game::world::GameMode;
use crate::network::protocol::{ErrorCode, ServerMessage, SessionInfo};
use crate::network::session::{
    run_session_loop, GameSession, SessionConfig, SessionError, SessionId, SessionState,
};

const ADJECTIVES: [&str; 16] = [
    "brave", "calm", "clever", "eager", "fancy", "gentle", "happy", "jolly",
    "kind", "lively", "lucky", "mighty", "proud", "quick", "silly", "witty",
];

const NOUNS: [&str; 16] = [
    "badger", "falcon", "ferret", "gecko", "heron", "koala", "lemur", "lynx",
    "marmot", "otter", "panda", "puffin", "raven", "tapir", "walrus", "yak",
];

/// Whether `name` has the `adjective-noun-NN` shape.
pub fn is_valid_friendly_name(name: &str) -> bool {
    let mut parts = name.split('-');
    let (Some(adj), Some(noun), Some(num), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let word = |w: &str| !w.is_empty() && w.bytes().all(|b| b.is_ascii_lowercase());
    word(adj) && word(noun) && num.len() == 2 && num.bytes().all(|b| b.is_ascii_digit())
}

fn friendly_name(rng: &mut SessionRng) -> String {
    let adj = rng.choose(&ADJECTIVES).copied().unwrap_or("brave");
    let noun = rng.choose(&NOUNS).copied().unwrap_or("otter");
    format!("{}-{}-{:02}", adj, noun, rng.next_int(100))
}

/// Manager limits.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Cap on public sessions that have not finished.
    pub max_public_sessions: usize,
    /// Agents added to a public session when it starts.
    pub agents_per_public_session: usize,
    /// How long a finished session stays visible before removal.
    pub finished_linger: Duration,
    /// Template for new sessions; the game mode is set per session.
    pub session: SessionConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_public_sessions: 32,
            agents_per_public_session: 3,
            finished_linger: Duration::from_secs(5),
            session: SessionConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Defaults overridden by `MAX_PUBLIC_SESSIONS` and
    /// `AGENTS_PER_PUBLIC_SESSION`, with the session template from
    /// [`SessionConfig::from_env`].
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<usize> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }
        let defaults = Self::default();
        Self {
            max_public_sessions: var("MAX_PUBLIC_SESSIONS").unwrap_or(defaults.max_public_sessions),
            agents_per_public_session: var("AGENTS_PER_PUBLIC_SESSION")
                .unwrap_or(defaults.agents_per_public_session),
            session: SessionConfig::from_env(),
            ..defaults
        }
    }
}

/// Manager errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManagerError {
    /// No such session.
    #[error("session not found")]
    SessionNotFound,

    /// Name does not have the `adjective-noun-NN` shape.
    #[error("invalid friendly name: {0}")]
    InvalidFriendlyName(String),

    /// Public session cap reached.
    #[error("maximum of {0} public sessions reached")]
    MaxPublicSessionsReached(usize),

    /// Session-level failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ManagerError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ManagerError::SessionNotFound => ErrorCode::SessionNotFound,
            ManagerError::InvalidFriendlyName(_) => ErrorCode::InvalidFriendlyName,
            ManagerError::MaxPublicSessionsReached(_) => ErrorCode::MaxSessionsReached,
            ManagerError::Session(e) => match e {
                SessionError::SessionNotOpen => ErrorCode::SessionNotOpen,
                SessionError::SessionFull => ErrorCode::SessionFull,
                SessionError::AlreadyInSession => ErrorCode::AlreadyInSession,
                SessionError::PlayerNotFound => ErrorCode::NotInSession,
                SessionError::InvalidState(_) | SessionError::InvalidSessionConfig(_) => ErrorCode::InvalidInput,
                SessionError::Entity(_) => ErrorCode::InternalError,
            },
        }
    }
}

type SharedSession = Arc<Mutex<GameSession>>;

/// Manages all sessions.
pub struct SessionManager {
    config: ManagerConfig,
    sessions: RwLock<BTreeMap<SessionId, SharedSession>>,
    friendly_names: RwLock<BTreeMap<String, SessionId>>,
    player_sessions: RwLock<BTreeMap<PlayerId, SessionId>>,
    level: Arc<dyn Level>,
    agents: Arc<dyn AgentFactory>,
}

impl SessionManager {
    /// Manager generating worlds from `level` and agents from `agents`.
    pub fn new(config: ManagerConfig, level: Arc<dyn Level>, agents: Arc<dyn AgentFactory>) -> Self {
        Self {
            config,
            sessions: RwLock::new(BTreeMap::new()),
            friendly_names: RwLock::new(BTreeMap::new()),
            player_sessions: RwLock::new(BTreeMap::new()),
            level,
            agents,
        }
    }

    /// Limits in effect.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Create and open a session.
    pub async fn create_session(&self, is_public: bool, game_mode: GameMode) -> Result<SessionId, ManagerError> {
        // Held from the cap check to the insert
        let mut sessions = self.sessions.write().await;
        if is_public {
            let mut open = 0;
            for session in sessions.values() {
                let s = session.lock().await;
                if s.is_public && s.state() != SessionState::Finished {
                    open += 1;
                }
            }
            if open >= self.config.max_public_sessions {
                return Err(ManagerError::MaxPublicSessionsReached(self.config.max_public_sessions));
            }
        }

        let id = uuid::Uuid::new_v4().into_bytes();
        let mut config = self.config.session.clone();
        config.simulation.game_mode = game_mode;

        let mut names = self.friendly_names.write().await;
        let mut rng = SessionRng::new(derive_session_seed(&id, 2));
        let mut name = friendly_name(&mut rng);
        while names.contains_key(&name) {
            name = friendly_name(&mut rng);
        }

        let mut session = GameSession::new(id, name.clone(), is_public, config)?;
        session.open_session()?;
        names.insert(name.clone(), id);
        drop(names);

        sessions.insert(id, Arc::new(Mutex::new(session)));
        info!(session = %name, public = is_public, mode = ?game_mode, "session created");
        Ok(id)
    }

    /// Session by id.
    pub async fn get(&self, id: &SessionId) -> Result<SharedSession, ManagerError> {
        self.sessions.read().await.get(id).cloned().ok_or(ManagerError::SessionNotFound)
    }

    /// Session by friendly name.
    pub async fn find_by_friendly_name(&self, name: &str) -> Result<SharedSession, ManagerError> {
        if !is_valid_friendly_name(name) {
            return Err(ManagerError::InvalidFriendlyName(name.to_owned()));
        }
        let id = self
            .friendly_names
            .read()
            .await
            .get(name)
            .copied()
            .ok_or(ManagerError::SessionNotFound)?;
        self.get(&id).await
    }

    /// Session by UUID or friendly name.
    pub async fn resolve(&self, reference: &str) -> Result<SharedSession, ManagerError> {
        match uuid::Uuid::parse_str(reference) {
            Ok(uuid) => self.get(uuid.as_bytes()).await,
            Err(_) => self.find_by_friendly_name(reference).await,
        }
    }

    /// Unfinished session a human is in.
    pub async fn find_by_participant(&self, player_id: &PlayerId) -> Option<SharedSession> {
        let id = self.player_sessions.read().await.get(player_id).copied()?;
        let session = self.get(&id).await.ok()?;
        let finished = session.lock().await.state() == SessionState::Finished;
        (!finished).then_some(session)
    }

    /// Add a human to a session.
    pub async fn join(
        &self,
        id: &SessionId,
        player_id: PlayerId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<SessionInfo, ManagerError> {
        // Held from the membership check to the insert
        let mut players = self.player_sessions.write().await;
        if let Some(current) = players.get(&player_id).copied() {
            if let Ok(session) = self.get(&current).await {
                let mut s = session.lock().await;
                if s.state() != SessionState::Finished {
                    return Err(SessionError::AlreadyInSession.into());
                }
                // A finished session no longer holds its players
                let _ = s.player_disconnected(&player_id);
            }
            players.remove(&player_id);
        }
        let session = self.get(id).await?;
        let mut s = session.lock().await;
        s.player_connected(player_id, sender)?;
        players.insert(player_id, *id);
        Ok(s.info())
    }

    /// Remove a human from whatever session they are in. A running game
    /// with no humans left is ended.
    pub async fn leave(&self, player_id: &PlayerId) -> Result<(), ManagerError> {
        let id = self
            .player_sessions
            .write()
            .await
            .remove(player_id)
            .ok_or(SessionError::PlayerNotFound)?;
        let session = self.get(&id).await?;
        let mut s = session.lock().await;
        s.player_disconnected(player_id)?;
        end_if_deserted(&mut s);
        Ok(())
    }

    /// Attach a new agent. Returns its player id.
    pub async fn add_agent(&self, id: &SessionId) -> Result<PlayerId, ManagerError> {
        let session = self.get(id).await?;
        let mut s = session.lock().await;
        let bot_id = PlayerId::generate();
        let agent = self.agents.create(bot_id, s.command_sender());
        s.add_agent(agent)?;
        Ok(bot_id)
    }

    /// Begin the game and spawn its tick loop. Public sessions are topped up
    /// with agents first. The session is removed a while after it finishes.
    pub async fn start_session(self: &Arc<Self>, id: &SessionId) -> Result<(), ManagerError> {
        let session = self.get(id).await?;
        {
            let mut s = session.lock().await;
            if s.is_public {
                while s.agent_count() < self.config.agents_per_public_session
                    && s.participant_count() < s.config().max_players
                {
                    let bot_id = PlayerId::generate();
                    let agent = self.agents.create(bot_id, s.command_sender());
                    s.add_agent(agent)?;
                }
            }
            s.begin_game_session(self.level.as_ref())?;
        }

        let manager = Arc::clone(self);
        let id = *id;
        tokio::spawn(async move {
            run_session_loop(session).await;
            tokio::time::sleep(manager.config.finished_linger).await;
            manager.remove(&id).await;
        });
        Ok(())
    }

    /// Drop a session and every lookup into it.
    pub async fn remove(&self, id: &SessionId) {
        let Some(session) = self.sessions.write().await.remove(id) else {
            return;
        };
        let name = session.lock().await.friendly_name.clone();
        self.friendly_names.write().await.remove(&name);
        self.player_sessions.write().await.retain(|_, sid| sid != id);
        debug!(session = %name, "session removed");
    }

    /// Public sessions waiting for players.
    pub async fn list_public_sessions(&self) -> Vec<SessionInfo> {
        let mut out = Vec::new();
        for session in self.all().await {
            let s = session.lock().await;
            if s.is_public && s.state() == SessionState::WaitingForPlayers {
                out.push(s.info());
            }
        }
        out
    }

    /// Number of sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// End running games with no humans, then remove finished sessions and
    /// lobbies everyone left.
    pub async fn cleanup(&self) {
        let mut stale = Vec::new();
        for session in self.all().await {
            let mut s = session.lock().await;
            end_if_deserted(&mut s);
            let abandoned = s.state() == SessionState::WaitingForPlayers && s.participant_count() == 0;
            let finished = s
                .finished_for()
                .is_some_and(|d| d >= self.config.finished_linger);
            if abandoned || finished {
                stale.push(s.id);
            }
        }
        for id in stale {
            self.remove(&id).await;
        }
    }

    async fn all(&self) -> Vec<SharedSession> {
        self.sessions.read().await.values().cloned().collect()
    }
}

fn end_if_deserted(session: &mut GameSession) {
    if session.state() == SessionState::InProgress && session.player_count() == 0 {
        info!(session = %session.friendly_name, agents = session.agent_count(), "no players left, ending session");
        session.end_game_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BotFactory;
    use crate::game::level::ArenaLevel;

    fn manager(config: ManagerConfig) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(config, Arc::new(ArenaLevel::default()), Arc::new(BotFactory)))
    }

    #[test]
    fn test_friendly_name_shape() {
        assert!(is_valid_friendly_name("brave-otter-07"));
        assert!(!is_valid_friendly_name("brave-otter-7"));
        assert!(!is_valid_friendly_name("Brave-otter-07"));
        assert!(!is_valid_friendly_name("brave-otter"));
        assert!(!is_valid_friendly_name("brave-otter-07-x"));
        assert!(!is_valid_friendly_name("brave--07"));

        let mut rng = SessionRng::new(3);
        for _ in 0..50 {
            assert!(is_valid_friendly_name(&friendly_name(&mut rng)));
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let m = manager(ManagerConfig::default());
        let id = m.create_session(true, GameMode::Endless).await.unwrap();

        let by_id = m.get(&id).await.unwrap();
        let name = by_id.lock().await.friendly_name.clone();
        assert_eq!(by_id.lock().await.state(), SessionState::WaitingForPlayers);

        let by_name = m.find_by_friendly_name(&name).await.unwrap();
        assert!(Arc::ptr_eq(&by_id, &by_name));
        let by_uuid = m.resolve(&uuid::Uuid::from_bytes(id).to_string()).await.unwrap();
        assert!(Arc::ptr_eq(&by_id, &by_uuid));

        assert_eq!(m.find_by_friendly_name("nope").await.err(), Some(ManagerError::InvalidFriendlyName("nope".into())));
        assert_eq!(m.find_by_friendly_name("sad-slug-00").await.err(), Some(ManagerError::SessionNotFound));
        assert_eq!(m.get(&[0; 16]).await.err(), Some(ManagerError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_public_session_cap() {
        let m = manager(ManagerConfig { max_public_sessions: 2, ..ManagerConfig::default() });
        m.create_session(true, GameMode::Endless).await.unwrap();
        m.create_session(true, GameMode::Elimination).await.unwrap();
        assert_eq!(
            m.create_session(true, GameMode::Endless).await.err(),
            Some(ManagerError::MaxPublicSessionsReached(2))
        );
        // Private sessions are not capped
        m.create_session(false, GameMode::Endless).await.unwrap();
        assert_eq!(m.session_count().await, 3);
    }

    #[tokio::test]
    async fn test_join_leave_participant_lookup() {
        let m = manager(ManagerConfig::default());
        let id = m.create_session(false, GameMode::Endless).await.unwrap();
        let player = PlayerId::new([1; 16]);
        let (tx, _rx) = mpsc::channel(16);

        let info = m.join(&id, player, tx.clone()).await.unwrap();
        assert_eq!(info.player_count, 1);
        assert!(!info.is_public);
        assert!(m.find_by_participant(&player).await.is_some());
        assert_eq!(
            m.join(&id, player, tx).await.err(),
            Some(ManagerError::Session(SessionError::AlreadyInSession))
        );

        m.leave(&player).await.unwrap();
        assert!(m.find_by_participant(&player).await.is_none());
        assert!(m.leave(&player).await.is_err());
    }

    #[tokio::test]
    async fn test_list_only_public_waiting() {
        let m = manager(ManagerConfig { agents_per_public_session: 0, ..ManagerConfig::default() });
        let public = m.create_session(true, GameMode::Endless).await.unwrap();
        m.create_session(false, GameMode::Endless).await.unwrap();
        let started = m.create_session(true, GameMode::Endless).await.unwrap();
        let (tx, _rx) = mpsc::channel(256);
        m.join(&started, PlayerId::new([5; 16]), tx).await.unwrap();
        m.start_session(&started).await.unwrap();

        let listed = m.list_public_sessions().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, uuid::Uuid::from_bytes(public).to_string());
    }

    #[tokio::test]
    async fn test_start_fills_public_session_with_agents() {
        let m = manager(ManagerConfig { agents_per_public_session: 2, ..ManagerConfig::default() });
        let id = m.create_session(true, GameMode::Endless).await.unwrap();
        let player = PlayerId::new([1; 16]);
        let (tx, mut rx) = mpsc::channel(256);
        m.join(&id, player, tx).await.unwrap();
        m.start_session(&id).await.unwrap();

        let session = m.get(&id).await.unwrap();
        {
            let s = session.lock().await;
            assert_eq!(s.state(), SessionState::InProgress);
            assert_eq!(s.agent_count(), 2);
        }
        assert!(matches!(rx.recv().await, Some(ServerMessage::SessionStarted { entity_id: Some(_), .. })));
        assert!(matches!(rx.recv().await, Some(ServerMessage::GameStateUpdate(u)) if u.is_checkpoint));

        // A second start is rejected
        assert!(matches!(
            m.start_session(&id).await,
            Err(ManagerError::Session(SessionError::InvalidState(SessionState::InProgress)))
        ));
        session.lock().await.end_game_session();
    }

    #[tokio::test]
    async fn test_add_agent_and_capacity() {
        let mut config = ManagerConfig::default();
        config.session.max_players = 2;
        let m = manager(config);
        let id = m.create_session(false, GameMode::Endless).await.unwrap();
        m.add_agent(&id).await.unwrap();
        m.add_agent(&id).await.unwrap();
        assert_eq!(
            m.add_agent(&id).await.err(),
            Some(ManagerError::Session(SessionError::SessionFull))
        );
    }

    #[tokio::test]
    async fn test_finished_session_releases_players() {
        let m = manager(ManagerConfig::default());
        let first = m.create_session(false, GameMode::Endless).await.unwrap();
        let player = PlayerId::new([3; 16]);
        let (tx, _rx) = mpsc::channel(256);
        m.join(&first, player, tx.clone()).await.unwrap();
        m.get(&first).await.unwrap().lock().await.end_game_session();
        assert!(m.find_by_participant(&player).await.is_none());

        let second = m.create_session(false, GameMode::Endless).await.unwrap();
        m.join(&second, player, tx).await.unwrap();
        assert_eq!(m.find_by_participant(&player).await.unwrap().lock().await.id, second);
        assert!(!m.get(&first).await.unwrap().lock().await.has_player(&player));
    }

    #[tokio::test]
    async fn test_cleanup_removes_abandoned_and_finished() {
        let m = manager(ManagerConfig { finished_linger: Duration::ZERO, ..ManagerConfig::default() });
        let abandoned = m.create_session(false, GameMode::Endless).await.unwrap();
        let kept = m.create_session(false, GameMode::Endless).await.unwrap();
        let (tx, _rx) = mpsc::channel(16);
        m.join(&kept, PlayerId::new([1; 16]), tx).await.unwrap();

        let finished = m.create_session(false, GameMode::Endless).await.unwrap();
        m.add_agent(&finished).await.unwrap();
        {
            let session = m.get(&finished).await.unwrap();
            let mut s = session.lock().await;
            s.begin_game_session(&ArenaLevel::default()).unwrap();
            s.end_game_session();
        }

        m.cleanup().await;
        assert!(m.get(&abandoned).await.is_err());
        assert!(m.get(&finished).await.is_err());
        assert!(m.get(&kept).await.is_ok());
    }

    #[tokio::test]
    async fn test_deserted_game_is_ended_and_frees_its_slot() {
        let m = manager(ManagerConfig {
            max_public_sessions: 1,
            agents_per_public_session: 2,
            finished_linger: Duration::ZERO,
            ..ManagerConfig::default()
        });
        let id = m.create_session(true, GameMode::Endless).await.unwrap();
        let player = PlayerId::new([4; 16]);
        let (tx, _rx) = mpsc::channel(256);
        m.join(&id, player, tx).await.unwrap();
        m.start_session(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = m.get(&id).await.unwrap();

        m.leave(&player).await.unwrap();
        {
            let s = session.lock().await;
            assert_eq!(s.state(), SessionState::Finished);
            assert_eq!(s.agent_count(), 2);
        }

        m.cleanup().await;
        assert!(m.get(&id).await.is_err());
        m.create_session(true, GameMode::Endless).await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_ends_running_game_without_players() {
        let m = manager(ManagerConfig::default());
        let id = m.create_session(false, GameMode::Endless).await.unwrap();
        m.add_agent(&id).await.unwrap();
        let session = m.get(&id).await.unwrap();
        session.lock().await.begin_game_session(&ArenaLevel::default()).unwrap();

        m.cleanup().await;
        assert_eq!(session.lock().await.state(), SessionState::Finished);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_respect_public_cap() {
        let m = manager(ManagerConfig { max_public_sessions: 3, ..ManagerConfig::default() });
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let m = Arc::clone(&m);
                tokio::spawn(async move { m.create_session(true, GameMode::Endless).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert_eq!(e, ManagerError::MaxPublicSessionsReached(3)),
            }
        }
        assert_eq!(created, 3);
        assert_eq!(m.session_count().await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_place_player_once() {
        let m = manager(ManagerConfig::default());
        let player = PlayerId::new([6; 16]);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let id = m.create_session(false, GameMode::Endless).await.unwrap();
            let m = Arc::clone(&m);
            let (tx, _rx) = mpsc::channel(16);
            handles.push(tokio::spawn(async move { m.join(&id, player, tx).await }));
        }

        let mut joined = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => joined += 1,
                Err(e) => assert_eq!(e, ManagerError::Session(SessionError::AlreadyInSession)),
            }
        }
        assert_eq!(joined, 1);

        let mut holding = 0;
        for session in m.all().await {
            holding += usize::from(session.lock().await.has_player(&player));
        }
        assert_eq!(holding, 1);
    }

    #[test]
    fn test_shared_handles_are_send() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<SharedSession>();
        assert_send::<Arc<SessionManager>>();
        assert_sync::<SessionManager>();
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ManagerError::SessionNotFound.code(), ErrorCode::SessionNotFound);
        assert_eq!(ManagerError::Session(SessionError::SessionFull).code(), ErrorCode::SessionFull);
        assert_eq!(ManagerError::MaxPublicSessionsReached(1).code(), ErrorCode::MaxSessionsReached);
    }
}
