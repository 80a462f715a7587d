//! Single-Elimination Bracket
//!
//! Sized to the next power of two above the cohort. Members fill first-round
//! matches from the front; the missing slots become byes in `opponent2` of the
//! trailing matches, so no match is ever two byes. Bye matches resolve on
//! creation.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::entity::EntityId;

/// Bracket-wide match identifier. Round 1 uses the lowest ids.
pub type MatchId = u32;

/// Bracket construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TieBreakerError {
    /// A bracket needs two members.
    #[error("tie-breaker needs at least 2 members, got {0}")]
    NotEnoughMembers(usize),
    /// Unknown match id.
    #[error("match {0} does not exist")]
    UnknownMatch(MatchId),
    /// The proposed winner is not playing in this match.
    #[error("entity {winner} is not an opponent in match {match_id}")]
    NotAnOpponent {
        /// Match.
        match_id: MatchId,
        /// Rejected winner.
        winner: EntityId,
    },
}

/// One node of the bracket tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketMatch {
    /// Unique within the bracket.
    pub id: MatchId,
    /// 1-based round number.
    pub round: u32,
    /// Position inside its round.
    pub index: u32,
    /// Upper seat.
    pub opponent1: Option<EntityId>,
    /// Lower seat.
    pub opponent2: Option<EntityId>,
    /// Set once the match is decided.
    pub winner: Option<EntityId>,
    /// Match the winner advances to. `None` for the final.
    pub parent_match_id: Option<MatchId>,
    /// Upper seat was filled by a bye.
    pub bye_in_opponent1: bool,
    /// Lower seat was filled by a bye.
    pub bye_in_opponent2: bool,
}

impl BracketMatch {
    fn new(id: MatchId, round: u32, index: u32, parent_match_id: Option<MatchId>) -> Self {
        Self {
            id,
            round,
            index,
            opponent1: None,
            opponent2: None,
            winner: None,
            parent_match_id,
            bye_in_opponent1: false,
            bye_in_opponent2: false,
        }
    }

    /// Whether this match has a bye.
    pub fn has_bye(&self) -> bool {
        self.bye_in_opponent1 || self.bye_in_opponent2
    }

    /// Both opponents seated and no winner yet.
    pub fn is_playable(&self) -> bool {
        self.winner.is_none() && self.opponent1.is_some() && self.opponent2.is_some()
    }

    /// The other side of `entity` in this match.
    pub fn opponent_of(&self, entity: EntityId) -> Option<EntityId> {
        if self.opponent1 == Some(entity) {
            self.opponent2
        } else if self.opponent2 == Some(entity) {
            self.opponent1
        } else {
            None
        }
    }
}

/// The full bracket of one cohort.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentBracket {
    /// Number of rounds to a single champion.
    pub rounds: u32,
    /// Matches ordered by round then index.
    pub matches: Vec<BracketMatch>,
}

/// Build the bracket for a cohort.
pub fn create_tie_breaker_bracket(members: &[EntityId]) -> Result<TournamentBracket, TieBreakerError> {
    let n = members.len();
    if n < 2 {
        return Err(TieBreakerError::NotEnoughMembers(n));
    }

    let size = n.next_power_of_two();
    let rounds = size.trailing_zeros();

    // Lay out every round; ids ascend round by round
    let mut matches = Vec::with_capacity(size - 1);
    let mut round_start = 0u32;
    let mut in_round = (size / 2) as u32;
    for round in 1..=rounds {
        let next_start = round_start + in_round;
        for index in 0..in_round {
            let parent = (round < rounds).then_some(next_start + index / 2);
            matches.push(BracketMatch::new(round_start + index, round, index, parent));
        }
        round_start = next_start;
        in_round /= 2;
    }

    // Seat members: full matches first, single-member matches with a bye last
    let first_round = size / 2;
    let byes = size - n;
    let full = first_round - byes;
    let mut seats = members.iter().copied();
    for m in matches.iter_mut().take(first_round) {
        m.opponent1 = seats.next();
        if (m.index as usize) < full {
            m.opponent2 = seats.next();
        } else {
            m.bye_in_opponent2 = true;
            m.winner = m.opponent1;
        }
    }

    let mut bracket = TournamentBracket { rounds, matches };
    bracket.advance_winners_to_next_round(1);
    Ok(bracket)
}

impl TournamentBracket {
    /// Look up a match.
    pub fn get(&self, id: MatchId) -> Option<&BracketMatch> {
        self.matches.get(id as usize)
    }

    /// Matches of a round, in index order.
    pub fn round_matches(&self, round: u32) -> impl Iterator<Item = &BracketMatch> {
        self.matches.iter().filter(move |m| m.round == round)
    }

    /// Ids of matches in `round` that still need to be played.
    pub fn playable_matches(&self, round: u32) -> Vec<MatchId> {
        self.round_matches(round)
            .filter(|m| m.is_playable())
            .map(|m| m.id)
            .collect()
    }

    /// Final match.
    pub fn root(&self) -> Option<&BracketMatch> {
        self.matches.last()
    }

    /// Winner of the final, once decided.
    pub fn champion(&self) -> Option<EntityId> {
        self.root().and_then(|m| m.winner)
    }

    /// Every member still seated in `round`, whether resolved or not.
    pub fn participants(&self, round: u32) -> Vec<EntityId> {
        self.round_matches(round)
            .flat_map(|m| [m.opponent1, m.opponent2])
            .flatten()
            .collect()
    }

    /// Declare the winner of a match.
    pub fn record_winner(&mut self, match_id: MatchId, winner: EntityId) -> Result<(), TieBreakerError> {
        let m = self
            .matches
            .get_mut(match_id as usize)
            .ok_or(TieBreakerError::UnknownMatch(match_id))?;
        if m.opponent1 != Some(winner) && m.opponent2 != Some(winner) {
            return Err(TieBreakerError::NotAnOpponent { match_id, winner });
        }
        m.winner = Some(winner);
        Ok(())
    }

    /// Seat every decided winner of `round` in its parent match.
    ///
    /// Even-indexed children fill `opponent1`, odd ones `opponent2`.
    pub fn advance_winners_to_next_round(&mut self, round: u32) {
        let moves: Vec<(MatchId, u32, EntityId)> = self
            .round_matches(round)
            .filter_map(|m| Some((m.parent_match_id?, m.index, m.winner?)))
            .collect();

        for (parent, child_index, winner) in moves {
            if let Some(p) = self.matches.get_mut(parent as usize) {
                if child_index % 2 == 0 {
                    p.opponent1 = Some(winner);
                } else {
                    p.opponent2 = Some(winner);
                }
            }
        }
    }
}
