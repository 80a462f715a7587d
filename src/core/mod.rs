//! Core primitives shared by every layer.
//!
//! Kept free of game rules so the simulation, agents and network layer can all
//! depend on it.

pub mod rng;

pub use rng::{SessionRng, derive_session_seed};
