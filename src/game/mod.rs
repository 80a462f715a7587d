//! Game Logic Module
//!
//! The simulation of one session. Nothing in here touches the network or the
//! wall clock; the session feeds in `delta_time` and drains commands.
//!
//! ## Module Structure
//!
//! - `components`: Component data attached to entities
//! - `entity`: Entity store with modified/removed tracking
//! - `command`: Command queue and command application
//! - `world`: Game context (store, clock, grid, RNG)
//! - `level`: Map provider interface and the built-in arena
//! - `collision`: Axis-aligned box tests
//! - `config`: Simulation tuning
//! - `systems`: The per-tick system pipeline

pub mod components;
pub mod entity;
pub mod command;
pub mod world;
pub mod level;
pub mod collision;
pub mod config;
pub mod systems;

// Re-export key types
pub use components::{Avatar, AvatarState, PlayerId, PowerUpType, RpsState, Transform};
pub use entity::{Entity, EntityError, EntityId, EntityStore};
pub use command::{Command, CommandQueue, CommandSender, Direction, QueuedCommand};
pub use world::{GameMode, World};
pub use level::{ArenaLevel, Level};
pub use config::SimulationConfig;
pub use systems::Pipeline;
