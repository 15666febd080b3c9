use thiserror::Error;

use crate::state::room::{Card, Room};
use crate::state::state_machine::PairOutcome;
use crate::store::models::{PlayerId, RoomStatus};

/// Error raised when a pair cannot be evaluated at all.
///
/// These are protocol violations rather than mismatches: a mismatch is a
/// normal outcome, these mean the selection should never have happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// Both indices point at the same card.
    #[error("card {0} cannot be compared against itself")]
    SameCard(usize),
    /// An index does not exist on this board.
    #[error("card index {index} out of bounds for a board of {len}")]
    OutOfBounds {
        /// The offending index.
        index: usize,
        /// Number of cards on the board.
        len: usize,
    },
    /// One of the cards was already resolved.
    #[error("card {0} is already matched")]
    AlreadyMatched(usize),
}

/// Compare the pair keys of two selected cards.
pub fn evaluate_pair(
    cards: &[Card],
    first: usize,
    second: usize,
) -> Result<PairOutcome, EvaluationError> {
    if first == second {
        return Err(EvaluationError::SameCard(first));
    }
    let len = cards.len();
    let first_card = cards
        .get(first)
        .ok_or(EvaluationError::OutOfBounds { index: first, len })?;
    let second_card = cards
        .get(second)
        .ok_or(EvaluationError::OutOfBounds { index: second, len })?;
    if first_card.matched {
        return Err(EvaluationError::AlreadyMatched(first));
    }
    if second_card.matched {
        return Err(EvaluationError::AlreadyMatched(second));
    }

    if first_card.pair_key == second_card.pair_key {
        Ok(PairOutcome::Matched)
    } else {
        Ok(PairOutcome::Mismatched)
    }
}

/// Whether the given player may select the given card right now.
///
/// The shared guard of the selection path: the room must be live, the
/// player must hold the turn, no evaluation may be in flight, and the
/// card must still be face down and unresolved.
pub fn is_selectable(room: &Room, player: PlayerId, index: usize) -> bool {
    if room.status != RoomStatus::Playing || room.processing_match || !room.is_turn_of(player) {
        return false;
    }
    room.cards
        .get(index)
        .is_some_and(|card| !card.revealed && !card.matched)
}
