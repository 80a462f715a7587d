//! Tie-Breaker Engine
//!
//! Turns a tie between colliding avatars into a small single-elimination
//! tournament.
//!
//! ## Module Structure
//!
//! - `cluster`: Transitive closure over the collision graph
//! - `bracket`: Bracket construction and winner propagation
//! - `fsm`: Per-cohort round state machine

pub mod cluster;
pub mod bracket;
pub mod fsm;

pub use cluster::{resolve_cluster_members, CollisionGraph};
pub use bracket::{create_tie_breaker_bracket, BracketMatch, MatchId, TieBreakerError, TournamentBracket};
pub use fsm::{
    mid_match_tie_breaker_fsm, MatchOutcome, RoundParticipants, TieBreakerPhase, TieBreakerState,
    TieBreakerTimings,
};
