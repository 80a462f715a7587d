//! Network Layer
//!
//! WebSocket server, lobby and per-session tick loops. Simulation rules live
//! in `game/`; this layer decides when they run and who hears about it.

pub mod auth;
pub mod protocol;
pub mod validator;
pub mod session;
pub mod manager;
pub mod server;

pub use auth::{authenticate, AuthConfig, AuthError, Identity, TokenClaims, validate_token};
pub use protocol::{
    ClientMessage, ClientWorldView, CommandFrame, ErrorCode, GameContext, GameStateUpdate,
    ServerMessage, SessionInfo,
};
pub use validator::{CommandValidator, Inbound, ValidationError};
pub use session::{GameSession, SessionConfig, SessionError, SessionId, SessionState};
pub use manager::{ManagerConfig, ManagerError, SessionManager};
pub use server::{GameServer, ServerConfig, GameServerError};
