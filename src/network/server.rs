//! WebSocket Game Server
//!
//! Accepts connections, authenticates them and routes frames: lobby control
//! messages go to the [`SessionManager`], game commands go to the command
//! queue of the sender's session. Outbound traffic per connection runs
//! through a bounded channel drained by a writer task.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::command::Command;
use crate::game::components::PlayerId;
use crate::network::auth::{authenticate, AuthConfig, AuthError, Identity};
use crate::network::manager::{ManagerError, SessionManager};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, CreateSessionRequest, ErrorCode, ServerMessage,
};
use crate::network::session::{unix_millis, SessionError, SessionId};
use crate::network::validator::{CommandValidator, Inbound, ValidationError};

/// Outbound queue depth per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// Rate-limit key for frames arriving before authentication.
const ANONYMOUS: PlayerId = PlayerId::new([0; 16]);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for longer than this are dropped.
    pub connection_timeout: Duration,
    /// How often idle connections and stale sessions are swept.
    pub cleanup_interval: Duration,
    /// Per-connection command budget.
    pub max_commands_per_second: u32,
    /// Server version reported in `AUTH_RESULT`.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            max_commands_per_second: crate::network::validator::MAX_COMMANDS_PER_SECOND,
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `BIND_ADDR`, `MAX_CONNECTIONS`,
    /// `CONNECTION_TIMEOUT_SECS` and `MAX_COMMANDS_PER_SECOND`.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }
        let mut config = Self::default();
        if let Some(addr) = var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(n) = var("MAX_CONNECTIONS") {
            config.max_connections = n;
        }
        if let Some(secs) = var("CONNECTION_TIMEOUT_SECS") {
            config.connection_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = var("MAX_COMMANDS_PER_SECOND") {
            config.max_commands_per_second = n;
        }
        config
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("connection limit reached")]
    ConnectionLimitReached,

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] ManagerError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Connected client state.
#[derive(Debug)]
pub struct ConnectedClient {
    /// Set by `AUTH`.
    pub identity: Option<Identity>,
    /// Connection time.
    pub connected_at: Instant,
    /// Last inbound frame.
    pub last_activity: Instant,
    /// Outbound queue.
    pub sender: mpsc::Sender<ServerMessage>,
    validator: CommandValidator,
}

impl ConnectedClient {
    fn new(sender: mpsc::Sender<ServerMessage>, max_commands_per_second: u32) -> Self {
        let now = Instant::now();
        Self {
            identity: None,
            connected_at: now,
            last_activity: now,
            sender,
            validator: CommandValidator::new(max_commands_per_second),
        }
    }

    /// Authenticated player id.
    pub fn player_id(&self) -> Option<PlayerId> {
        self.identity.map(|i| i.player_id)
    }
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// Shared state handed to every connection task.
#[derive(Clone)]
struct Router {
    config: Arc<ServerConfig>,
    auth: Arc<AuthConfig>,
    sessions: Arc<SessionManager>,
    clients: Clients,
}

/// The game server.
pub struct GameServer {
    router: Router,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server over an existing session manager.
    pub fn new(config: ServerConfig, auth: AuthConfig, sessions: Arc<SessionManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            router: Router {
                config: Arc::new(config),
                auth: Arc::new(auth),
                sessions,
                clients: Arc::new(RwLock::new(BTreeMap::new())),
            },
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.router.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        if self.router.auth.is_guest_mode() {
            warn!("No AUTH_SECRET configured, accepting guest connections");
        }

        let cleanup_router = self.router.clone();
        let cleanup_handle = tokio::spawn(async move {
            cleanup_router.run_cleanup_loop().await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.router.clients.read().await.len();
                            if clients_count >= self.router.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let router = self.router.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

            router.register(addr, msg_tx.clone()).await;

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                router.handle_text(addr, &text, &msg_tx).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                router.handle_binary(addr, &data, &msg_tx).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // tungstenite answers pings itself
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            router.unregister(addr).await;

            // Let the writer flush a final message
            drop(msg_tx);
            let mut sender_task = sender_task;
            if tokio::time::timeout(Duration::from_millis(100), &mut sender_task).await.is_err() {
                sender_task.abort();
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.router.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.router.sessions.session_count().await
    }
}

impl Router {
    async fn register(&self, addr: SocketAddr, sender: mpsc::Sender<ServerMessage>) {
        let client = ConnectedClient::new(sender, self.config.max_commands_per_second);
        self.clients.write().await.insert(addr, client);
    }

    /// Drop a connection and take its player out of any session.
    async fn unregister(&self, addr: SocketAddr) {
        let client = self.clients.write().await.remove(&addr);
        if let Some(player_id) = client.and_then(|c| c.player_id()) {
            if self.sessions.leave(&player_id).await.is_ok() {
                debug!("Player {} left its session on disconnect", player_id.short());
            }
        }
    }

    /// Validate a text frame under the client lock, then route it.
    async fn handle_text(&self, addr: SocketAddr, text: &str, sender: &mpsc::Sender<ServerMessage>) {
        let (player_id, result) = {
            let mut clients = self.clients.write().await;
            let Some(client) = clients.get_mut(&addr) else { return };
            client.last_activity = Instant::now();
            let player_id = client.player_id();
            let key = player_id.unwrap_or(ANONYMOUS);
            (player_id, client.validator.validate_text(key, text, client.last_activity))
        };

        match result {
            Ok(Inbound::Command(command)) => self.handle_command(player_id, command, sender).await,
            Ok(Inbound::Control(msg)) => self.handle_client_message(addr, msg, sender).await,
            Err(e) => Self::reject(addr, e, sender).await,
        }
    }

    async fn handle_binary(&self, addr: SocketAddr, data: &[u8], sender: &mpsc::Sender<ServerMessage>) {
        let (player_id, result) = {
            let mut clients = self.clients.write().await;
            let Some(client) = clients.get_mut(&addr) else { return };
            client.last_activity = Instant::now();
            let player_id = client.player_id();
            let key = player_id.unwrap_or(ANONYMOUS);
            (player_id, client.validator.validate_binary(key, data, client.last_activity))
        };

        match result {
            Ok(command) => self.handle_command(player_id, command, sender).await,
            Err(e) => Self::reject(addr, e, sender).await,
        }
    }

    async fn reject(addr: SocketAddr, err: ValidationError, sender: &mpsc::Sender<ServerMessage>) {
        debug!("Rejected frame from {}: {}", addr, err);
        let code = match err {
            ValidationError::RateLimited(_) => ErrorCode::RateLimited,
            _ => ErrorCode::InvalidInput,
        };
        let _ = sender.send(ServerMessage::error(code, err.to_string())).await;
    }

    /// Queue a game command on the sender's session.
    async fn handle_command(
        &self,
        player_id: Option<PlayerId>,
        command: Command,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(player_id) = player_id else {
            let _ = sender.send(ServerMessage::error(ErrorCode::NotAuthenticated, "Must authenticate first")).await;
            return;
        };
        match self.sessions.find_by_participant(&player_id).await {
            Some(session) => session.lock().await.push_command(player_id, command),
            None => {
                let _ = sender.send(ServerMessage::error(ErrorCode::NotInSession, "Not in a session")).await;
            }
        }
    }

    /// Handle a control message.
    async fn handle_client_message(&self, addr: SocketAddr, msg: ClientMessage, sender: &mpsc::Sender<ServerMessage>) {
        if let ClientMessage::Auth(auth) = msg {
            self.handle_auth(addr, auth, sender).await;
            return;
        }
        if let ClientMessage::Ping { timestamp } = msg {
            let _ = sender.send(ServerMessage::Pong { timestamp, server_time: unix_millis() }).await;
            return;
        }

        let player_id = {
            let clients = self.clients.read().await;
            clients.get(&addr).and_then(|c| c.player_id())
        };
        let Some(player_id) = player_id else {
            let _ = sender.send(ServerMessage::error(ErrorCode::NotAuthenticated, "Must authenticate first")).await;
            return;
        };

        let result = match msg {
            ClientMessage::CreateSession(req) => self.handle_create(player_id, req, sender).await,
            ClientMessage::JoinSession { session } => self.handle_join(player_id, &session, sender).await,
            ClientMessage::ListSessions => {
                let sessions = self.sessions.list_public_sessions().await;
                Ok(Some(ServerMessage::SessionList { sessions }))
            }
            ClientMessage::AddAgent => self.handle_add_agent(player_id).await,
            ClientMessage::StartSession => self.handle_start(player_id).await,
            ClientMessage::Leave => self.sessions.leave(&player_id).await.map(|_| None),
            ClientMessage::Auth(_) | ClientMessage::Ping { .. } => Ok(None),
        };

        match result {
            Ok(Some(reply)) => {
                let _ = sender.send(reply).await;
            }
            Ok(None) => {}
            Err(e) => {
                debug!("Request from {} failed: {}", addr, e);
                let _ = sender.send(ServerMessage::error(e.code(), e.to_string())).await;
            }
        }
    }

    /// Handle authentication. A connection authenticates once; later
    /// `AUTH` frames repeat the first result.
    async fn handle_auth(&self, addr: SocketAddr, auth: AuthRequest, sender: &mpsc::Sender<ServerMessage>) {
        let result = {
            let mut clients = self.clients.write().await;
            let Some(client) = clients.get_mut(&addr) else { return };
            match client.identity {
                Some(identity) => Ok(identity),
                None => authenticate(auth.token.as_deref(), &self.auth).map(|identity| {
                    client.identity = Some(identity);
                    client.validator.forget(&ANONYMOUS);
                    identity
                }),
            }
        };

        match result {
            Ok(identity) => {
                debug!("Client {} authenticated as {}", addr, identity.player_id.short());
                let _ = sender.send(ServerMessage::AuthResult(AuthResult {
                    success: true,
                    player_id: Some(identity.player_id.to_uuid_string()),
                    guest: identity.guest,
                    error: None,
                    server_version: self.config.version.clone(),
                })).await;
            }
            Err(e) => {
                debug!("Client {} failed authentication: {}", addr, e);
                let code = match e {
                    AuthError::Expired => ErrorCode::TokenExpired,
                    AuthError::MissingToken => ErrorCode::AuthFailed,
                    _ => ErrorCode::InvalidToken,
                };
                let _ = sender.send(ServerMessage::AuthResult(AuthResult {
                    success: false,
                    player_id: None,
                    guest: false,
                    error: Some(e.to_string()),
                    server_version: self.config.version.clone(),
                })).await;
                let _ = sender.send(ServerMessage::error(code, e.to_string())).await;
            }
        }
    }

    async fn handle_create(
        &self,
        player_id: PlayerId,
        req: CreateSessionRequest,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<Option<ServerMessage>, ManagerError> {
        if self.sessions.find_by_participant(&player_id).await.is_some() {
            return Err(SessionError::AlreadyInSession.into());
        }
        let id = self.sessions.create_session(req.is_public, req.game_mode).await?;
        match self.sessions.join(&id, player_id, sender.clone()).await {
            Ok(info) => {
                info!("Player {} created session {}", player_id.short(), info.friendly_name);
                Ok(Some(ServerMessage::SessionCreated(info)))
            }
            Err(e) => {
                self.sessions.remove(&id).await;
                Err(e)
            }
        }
    }

    async fn handle_join(
        &self,
        player_id: PlayerId,
        reference: &str,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<Option<ServerMessage>, ManagerError> {
        let id = self.sessions.resolve(reference).await?.lock().await.id;
        let info = self.sessions.join(&id, player_id, sender.clone()).await?;
        info!("Player {} joined session {}", player_id.short(), info.friendly_name);
        Ok(Some(ServerMessage::SessionJoined(info)))
    }

    async fn handle_add_agent(&self, player_id: PlayerId) -> Result<Option<ServerMessage>, ManagerError> {
        let id = self.session_of(&player_id).await?;
        let bot_id = self.sessions.add_agent(&id).await?;
        Ok(Some(ServerMessage::AgentAdded { bot_id: bot_id.to_uuid_string() }))
    }

    /// Start the caller's session; `SESSION_STARTED` goes out to every
    /// participant from the session itself.
    async fn handle_start(&self, player_id: PlayerId) -> Result<Option<ServerMessage>, ManagerError> {
        let id = self.session_of(&player_id).await?;
        self.sessions.start_session(&id).await?;
        Ok(None)
    }

    async fn session_of(&self, player_id: &PlayerId) -> Result<SessionId, ManagerError> {
        match self.sessions.find_by_participant(player_id).await {
            Some(session) => Ok(session.lock().await.id),
            None => Err(SessionError::PlayerNotFound.into()),
        }
    }

    /// Drop idle connections and sweep stale sessions.
    async fn run_cleanup_loop(self) {
        let mut interval = interval(self.config.cleanup_interval);

        loop {
            interval.tick().await;

            let now = Instant::now();
            let idle_timeout = self.config.connection_timeout;

            let to_remove: Vec<_> = {
                let clients = self.clients.read().await;
                clients.iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };

            for addr in to_remove {
                self.unregister(addr).await;
                info!("Removed idle client {}", addr);
            }

            self.sessions.cleanup().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BotFactory;
    use crate::game::command::Direction;
    use crate::game::entity::EntityId;
    use crate::game::level::ArenaLevel;
    use crate::network::manager::ManagerConfig;
    use crate::network::protocol::CommandFrame;
    use crate::network::session::SessionState;

    fn manager() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            ManagerConfig::default(),
            Arc::new(ArenaLevel::default()),
            Arc::new(BotFactory),
        ))
    }

    fn router() -> Router {
        Router {
            config: Arc::new(ServerConfig::default()),
            auth: Arc::new(AuthConfig::default()),
            sessions: manager(),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn connect(router: &Router, port: u16) -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(64);
        router.register(addr(port), tx.clone()).await;
        (tx, rx)
    }

    async fn send(router: &Router, port: u16, tx: &mpsc::Sender<ServerMessage>, text: &str) {
        router.handle_text(addr(port), text, tx).await;
    }

    async fn login(router: &Router, port: u16, tx: &mpsc::Sender<ServerMessage>, rx: &mut mpsc::Receiver<ServerMessage>) -> PlayerId {
        send(router, port, tx, r#"{"type":"AUTH"}"#).await;
        match rx.recv().await.unwrap() {
            ServerMessage::AuthResult(result) => {
                assert!(result.success && result.guest);
                PlayerId::from_uuid_str(&result.player_id.unwrap()).unwrap()
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn expect_error(msg: ServerMessage, code: ErrorCode) {
        match msg {
            ServerMessage::Error(e) => assert_eq!(e.code, code),
            other => panic!("expected {:?}, got {:?}", code, other),
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.max_commands_per_second, 60);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: addr(0),
            ..Default::default()
        };
        let server = GameServer::new(config, AuthConfig::default(), manager());

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_requests_before_auth_rejected() {
        let router = router();
        let (tx, mut rx) = connect(&router, 1).await;

        send(&router, 1, &tx, r#"{"type":"LIST_SESSIONS"}"#).await;
        expect_error(rx.recv().await.unwrap(), ErrorCode::NotAuthenticated);

        send(&router, 1, &tx, r#"{"type":"MOVE","entityId":1,"direction":"up"}"#).await;
        expect_error(rx.recv().await.unwrap(), ErrorCode::NotAuthenticated);

        send(&router, 1, &tx, r#"{"type":"PING","timestamp":42}"#).await;
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::Pong { timestamp: 42, .. }));

        send(&router, 1, &tx, "not json").await;
        expect_error(rx.recv().await.unwrap(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_auth_is_sticky() {
        let router = router();
        let (tx, mut rx) = connect(&router, 1).await;
        let first = login(&router, 1, &tx, &mut rx).await;
        let second = login(&router, 1, &tx, &mut rx).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_create_join_start_flow() {
        let router = router();
        let (host_tx, mut host_rx) = connect(&router, 1).await;
        let (guest_tx, mut guest_rx) = connect(&router, 2).await;
        let host = login(&router, 1, &host_tx, &mut host_rx).await;
        let guest = login(&router, 2, &guest_tx, &mut guest_rx).await;

        send(&router, 1, &host_tx, r#"{"type":"CREATE_SESSION","isPublic":false}"#).await;
        let info = match host_rx.recv().await.unwrap() {
            ServerMessage::SessionCreated(info) => info,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(info.state, SessionState::WaitingForPlayers);
        assert_eq!(info.player_count, 1);

        // Creating again while seated is refused
        send(&router, 1, &host_tx, r#"{"type":"CREATE_SESSION"}"#).await;
        expect_error(host_rx.recv().await.unwrap(), ErrorCode::AlreadyInSession);

        let join = format!(r#"{{"type":"JOIN_SESSION","session":"{}"}}"#, info.friendly_name);
        send(&router, 2, &guest_tx, &join).await;
        match guest_rx.recv().await.unwrap() {
            ServerMessage::SessionJoined(joined) => {
                assert_eq!(joined.session_id, info.session_id);
                assert_eq!(joined.player_count, 2);
            }
            other => panic!("unexpected {:?}", other),
        }

        send(&router, 1, &host_tx, r#"{"type":"ADD_AGENT"}"#).await;
        assert!(matches!(host_rx.recv().await.unwrap(), ServerMessage::AgentAdded { .. }));

        send(&router, 2, &guest_tx, r#"{"type":"START_SESSION"}"#).await;
        let entity = match guest_rx.recv().await.unwrap() {
            ServerMessage::SessionStarted { session_id, entity_id } => {
                assert_eq!(session_id, info.session_id);
                entity_id.unwrap()
            }
            other => panic!("unexpected {:?}", other),
        };
        assert!(matches!(host_rx.recv().await.unwrap(), ServerMessage::SessionStarted { .. }));

        // Commands are queued silently; only state updates follow
        let command = format!(r#"{{"type":"MOVE","entityId":{},"direction":"left"}}"#, entity.0);
        send(&router, 2, &guest_tx, &command).await;
        let frame = CommandFrame::from_command(&Command::Move { entity_id: entity, direction: Direction::Right });
        router.handle_binary(addr(2), &frame.to_bytes().unwrap(), &guest_tx).await;
        while let Ok(msg) = guest_rx.try_recv() {
            assert!(matches!(msg, ServerMessage::GameStateUpdate(_)), "unexpected {:?}", msg);
        }

        router.unregister(addr(2)).await;
        let session = router.sessions.find_by_participant(&host).await.unwrap();
        assert!(!session.lock().await.has_player(&guest));
        assert!(router.sessions.find_by_participant(&guest).await.is_none());

        session.lock().await.end_game_session();
    }

    #[tokio::test]
    async fn test_join_unknown_and_command_outside_session() {
        let router = router();
        let (tx, mut rx) = connect(&router, 1).await;
        login(&router, 1, &tx, &mut rx).await;

        send(&router, 1, &tx, r#"{"type":"JOIN_SESSION","session":"brave-otter-07"}"#).await;
        expect_error(rx.recv().await.unwrap(), ErrorCode::SessionNotFound);

        send(&router, 1, &tx, r#"{"type":"JOIN_SESSION","session":"nonsense"}"#).await;
        expect_error(rx.recv().await.unwrap(), ErrorCode::InvalidFriendlyName);

        send(&router, 1, &tx, r#"{"type":"STOP","entityId":3,"direction":"up"}"#).await;
        expect_error(rx.recv().await.unwrap(), ErrorCode::NotInSession);

        send(&router, 1, &tx, r#"{"type":"START_SESSION"}"#).await;
        expect_error(rx.recv().await.unwrap(), ErrorCode::NotInSession);

        send(&router, 1, &tx, r#"{"type":"LEAVE"}"#).await;
        expect_error(rx.recv().await.unwrap(), ErrorCode::NotInSession);
    }

    #[tokio::test]
    async fn test_rate_limit_reported() {
        let router = router();
        let (tx, mut rx) = connect(&router, 1).await;
        login(&router, 1, &tx, &mut rx).await;
        send(&router, 1, &tx, r#"{"type":"CREATE_SESSION","isPublic":false}"#).await;
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::SessionCreated(_)));

        let command = format!(r#"{{"type":"STATE_SHIFT_LEFT","entityId":{}}}"#, EntityId(1).0);
        for _ in 0..60 {
            send(&router, 1, &tx, &command).await;
        }
        assert!(rx.try_recv().is_err());
        send(&router, 1, &tx, &command).await;
        expect_error(rx.recv().await.unwrap(), ErrorCode::RateLimited);
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        use tokio_tungstenite::connect_async;

        let server = Arc::new(GameServer::new(ServerConfig::default(), AuthConfig::default(), manager()));
        let listener = TcpListener::bind(addr(0)).await.unwrap();
        let local = listener.local_addr().unwrap();
        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move { serving.serve(listener).await });

        let (mut ws, _) = connect_async(format!("ws://{}", local)).await.unwrap();
        ws.send(Message::Text(r#"{"type":"AUTH"}"#.into())).await.unwrap();

        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break ServerMessage::from_json(&text).unwrap(),
                _ => continue,
            }
        };
        assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: true, .. })));
        assert_eq!(server.connection_count().await, 1);

        server.shutdown();
        let shutdown = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break ServerMessage::from_json(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection closed early: {:?}", other),
            }
        };
        assert!(matches!(shutdown, ServerMessage::Shutdown { .. }));
        handle.await.unwrap().unwrap();
    }
}
