//! Per-Cohort Tie-Breaker FSM
//!
//! ```text
//! Init ──► PlayingRound ──► InterRoundDelay ──► PlayingRound ──► ... ──► Finished
//!                 │                 ▲
//!                 └── any tie ──────┘  (same round is replayed)
//! ```
//!
//! The FSM only moves the bracket forward. What happens to a loser is left to
//! the caller, which receives every decided match as a [`MatchOutcome`].

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::game::components::{CohortState, RpsState, TieBreaker};
use crate::game::entity::EntityId;
use crate::tiebreak::bracket::MatchId;

/// Longest a round may last.
pub const CURR_ROUND_MAX_TICKS: u32 = 90;

/// Shortest a round may last before it can end early.
pub const MIN_TICKS_PER_ROUND: u32 = 15;

/// Pause between rounds (and before a replay).
pub const TICKS_BETWEEN_ROUNDS: u32 = 30;

/// FSM phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TieBreakerPhase {
    /// Bracket not seated yet.
    #[default]
    Init,
    /// Members are choosing.
    PlayingRound,
    /// Pause before the next round or a replay.
    InterRoundDelay,
    /// Champion decided.
    Finished,
}

/// Round timing knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieBreakerTimings {
    /// Hard cap on one round.
    pub curr_round_max_ticks: u32,
    /// A round never resolves earlier than this.
    pub min_ticks_per_round: u32,
    /// Length of the pause between rounds.
    pub ticks_between_rounds: u32,
}

impl Default for TieBreakerTimings {
    fn default() -> Self {
        Self {
            curr_round_max_ticks: CURR_ROUND_MAX_TICKS,
            min_ticks_per_round: MIN_TICKS_PER_ROUND,
            ticks_between_rounds: TICKS_BETWEEN_ROUNDS,
        }
    }
}

/// Progress of one cohort through its bracket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TieBreakerState {
    /// Current phase.
    pub phase: TieBreakerPhase,
    /// 1-based.
    pub curr_round: u32,
    /// Ticks spent in the current phase.
    pub ticks_in_phase: u32,
    /// A tie in this round forces a replay.
    pub has_at_least_one_tie_in_round: bool,
    /// Timing in effect for this cohort.
    pub timings: TieBreakerTimings,
}

impl TieBreakerState {
    /// Fresh state with the given timings.
    pub fn new(timings: TieBreakerTimings) -> Self {
        Self {
            phase: TieBreakerPhase::Init,
            curr_round: 1,
            ticks_in_phase: 0,
            has_at_least_one_tie_in_round: false,
            timings,
        }
    }
}

impl Default for TieBreakerState {
    fn default() -> Self {
        Self::new(TieBreakerTimings::default())
    }
}

/// How the FSM sees the avatars sitting in a bracket.
pub trait RoundParticipants {
    /// Current choice, or `None` if the member no longer exists.
    fn choice(&self, member: EntityId) -> Option<RpsState>;

    /// Whether the member picked a state during this round.
    fn is_locked_in(&self, member: EntityId) -> bool;

    /// Assign a random state to a member who has not picked one.
    fn force_random_choice(&mut self, member: EntityId);

    /// Forget the member's pick once a round is resolved.
    fn clear_lock(&mut self, member: EntityId);
}

/// A decided match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Decided match.
    pub match_id: MatchId,
    /// Advances to the parent match.
    pub winner: EntityId,
    /// Knocked out of the cohort.
    pub loser: EntityId,
}

/// Advance one cohort by one tick.
///
/// `on_complete` fires exactly once, with the champion, on the tick the final
/// match is decided.
pub fn mid_match_tie_breaker_fsm(
    tie_breaker: &mut TieBreaker,
    participants: &mut dyn RoundParticipants,
    on_complete: &mut dyn FnMut(EntityId),
) -> Vec<MatchOutcome> {
    let state = &mut tie_breaker.tie_breaker_state;
    let timings = state.timings;
    let mut outcomes = Vec::new();

    match state.phase {
        TieBreakerPhase::Init => {
            start_round(tie_breaker, participants);
        }
        TieBreakerPhase::PlayingRound => {
            state.ticks_in_phase += 1;
            let ticks = state.ticks_in_phase;
            let round = state.curr_round;

            let expired = ticks >= timings.curr_round_max_ticks;
            let settled = ticks >= timings.min_ticks_per_round
                && tie_breaker
                    .tournament_bracket
                    .playable_matches(round)
                    .iter()
                    .filter_map(|id| tie_breaker.tournament_bracket.get(*id))
                    .flat_map(|m| [m.opponent1, m.opponent2])
                    .flatten()
                    .all(|member| participants.is_locked_in(member));

            if expired || settled {
                outcomes = resolve_round(tie_breaker, participants, on_complete);
            }
        }
        TieBreakerPhase::InterRoundDelay => {
            state.ticks_in_phase += 1;
            if state.ticks_in_phase >= timings.ticks_between_rounds {
                start_round(tie_breaker, participants);
            }
        }
        TieBreakerPhase::Finished => {}
    }

    outcomes
}

fn start_round(tie_breaker: &mut TieBreaker, participants: &mut dyn RoundParticipants) {
    let state = &mut tie_breaker.tie_breaker_state;
    state.phase = TieBreakerPhase::PlayingRound;
    state.ticks_in_phase = 0;
    state.has_at_least_one_tie_in_round = false;

    let round = state.curr_round;
    let bracket = &tie_breaker.tournament_bracket;
    for id in bracket.playable_matches(round) {
        let Some(m) = bracket.get(id) else { continue };
        for member in [m.opponent1, m.opponent2].into_iter().flatten() {
            if !participants.is_locked_in(member) {
                participants.force_random_choice(member);
            }
        }
    }
}

fn resolve_round(
    tie_breaker: &mut TieBreaker,
    participants: &mut dyn RoundParticipants,
    on_complete: &mut dyn FnMut(EntityId),
) -> Vec<MatchOutcome> {
    let round = tie_breaker.tie_breaker_state.curr_round;
    let bracket = &mut tie_breaker.tournament_bracket;
    let mut outcomes = Vec::new();
    let mut tied = false;

    for id in bracket.playable_matches(round) {
        let Some(m) = bracket.get(id) else { continue };
        let (Some(a), Some(b)) = (m.opponent1, m.opponent2) else { continue };

        // A vanished member forfeits
        let winner = match (participants.choice(a), participants.choice(b)) {
            (Some(ca), Some(cb)) if ca == cb => {
                tied = true;
                continue;
            }
            (Some(ca), Some(cb)) => if ca.beats(cb) { a } else { b },
            (None, Some(_)) => b,
            _ => a,
        };
        let loser = if winner == a { b } else { a };

        if bracket.record_winner(id, winner).is_ok() {
            outcomes.push(MatchOutcome { match_id: id, winner, loser });
        }
    }

    for member in bracket.participants(round) {
        participants.clear_lock(member);
    }
    bracket.advance_winners_to_next_round(round);

    let state = &mut tie_breaker.tie_breaker_state;
    state.has_at_least_one_tie_in_round = tied;
    state.ticks_in_phase = 0;

    if tied {
        debug!(round, "tie-breaker round tied, replaying");
        state.phase = TieBreakerPhase::InterRoundDelay;
        return outcomes;
    }

    let root = tie_breaker.tournament_bracket.root();
    match root.and_then(|m| if m.parent_match_id.is_none() { m.winner } else { None }) {
        Some(champion) => {
            state.phase = TieBreakerPhase::Finished;
            tie_breaker.state = CohortState::Finished;
            on_complete(champion);
        }
        None => {
            state.curr_round += 1;
            state.phase = TieBreakerPhase::InterRoundDelay;
        }
    }

    outcomes
}
