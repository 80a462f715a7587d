//! # RPS Arena Server
//!
//! Authoritative session server for RPS Arena, a real-time multiplayer
//! rock-paper-scissors arena.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RPS ARENA SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Seeded randomness                         │
//! │  └── rng.rs      - Xorshift128+ per-session streams          │
//! │                                                              │
//! │  game/           - Entity store and simulation               │
//! │  ├── entity.rs   - Entities, ids, change tracking            │
//! │  ├── command.rs  - Client commands and the command queue     │
//! │  ├── world.rs    - World state and generation                │
//! │  └── systems/    - Physics, RPS, tie-breaker, spawn, score   │
//! │                                                              │
//! │  tiebreak/       - Cohort detection, brackets, round FSM     │
//! │  behavior/       - Behavior-tree engine                      │
//! │  agent/          - Scripted bots driven by behavior trees    │
//! │                                                              │
//! │  network/        - Connections and sessions                  │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── session.rs  - Session lifecycle and tick loop           │
//! │  └── manager.rs  - Lobby: create, join, list, clean up       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tick Loop
//!
//! Each in-progress session ticks at a fixed rate. A tick drains the
//! command queue, runs the system pipeline and broadcasts a
//! `GAMESTATE_UPDATE`: a full checkpoint every
//! `max_ticks_between_checkpoints` ticks, otherwise a delta of what changed
//! since the last checkpoint.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod tiebreak;
pub mod behavior;
pub mod agent;
pub mod network;

// Re-export commonly used types
pub use self::core::rng::SessionRng;
pub use game::{Command, Entity, EntityId, GameMode, PlayerId, RpsState, World};
pub use network::{GameServer, GameSession, SessionManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default session tick rate (Hz)
pub const TICK_RATE: u32 = 30;
