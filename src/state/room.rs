use std::time::SystemTime;

use crate::store::models::{CardDocument, PlayerId, RoomDocument, RoomId, RoomStatus, Winner};

/// One card of the board as the engine reasons about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    /// Identifier shared by the two cards of a matching pair.
    pub pair_key: String,
    /// Opaque handle to the image content this card shows.
    pub image: String,
    /// Whether the card is currently face up.
    pub revealed: bool,
    /// Whether the card has been permanently resolved.
    pub matched: bool,
}

/// Runtime view of the shared room, decoded from a document snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Primary key of the room.
    pub id: RoomId,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Player who created the room.
    pub player_one: PlayerId,
    /// Second seat, once a seeker has joined.
    pub player_two: Option<PlayerId>,
    /// Pairs resolved by player one.
    pub player_one_score: u32,
    /// Pairs resolved by player two.
    pub player_two_score: u32,
    /// Player currently allowed to act.
    pub current_turn: PlayerId,
    /// Index of the armed first selection, if any.
    pub first_selected: Option<usize>,
    /// Soft mutex raised while a pair is being evaluated.
    pub processing_match: bool,
    /// Outcome, once the match is settled.
    pub winner: Option<Winner>,
    /// The shared board. Empty until player one lays it out.
    pub cards: Vec<Card>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last update timestamp.
    pub updated_at: SystemTime,
}

impl Room {
    /// Whether the given player currently holds the turn.
    pub fn is_turn_of(&self, player: PlayerId) -> bool {
        self.current_turn == player
    }

    /// The other seat, from the given player's perspective. `None` while the
    /// second seat is still open or for a player the room does not reference.
    pub fn opponent_of(&self, player: PlayerId) -> Option<PlayerId> {
        if player == self.player_one {
            self.player_two
        } else if self.player_two == Some(player) {
            Some(self.player_one)
        } else {
            None
        }
    }

    /// Score of the given player. Zero for a player the room does not
    /// reference.
    pub fn score_of(&self, player: PlayerId) -> u32 {
        if player == self.player_one {
            self.player_one_score
        } else if self.player_two == Some(player) {
            self.player_two_score
        } else {
            0
        }
    }

    /// Number of pairs on the board.
    pub fn pairs_total(&self) -> usize {
        self.cards.len() / 2
    }

    /// Whether every card on a laid-out board has been resolved.
    pub fn all_matched(&self) -> bool {
        !self.cards.is_empty() && self.cards.iter().all(|card| card.matched)
    }

    /// Outcome by score comparison: higher score wins, level scores draw.
    pub fn outcome_by_scores(&self) -> Winner {
        if self.player_one_score > self.player_two_score {
            Winner::Player(self.player_one)
        } else if self.player_two_score > self.player_one_score {
            match self.player_two {
                Some(player_two) => Winner::Player(player_two),
                None => Winner::Player(self.player_one),
            }
        } else {
            Winner::Draw
        }
    }
}

impl From<CardDocument> for Card {
    fn from(value: CardDocument) -> Self {
        Self {
            pair_key: value.pair_key,
            image: value.image,
            revealed: value.revealed,
            matched: value.matched,
        }
    }
}

impl From<RoomDocument> for Room {
    fn from(value: RoomDocument) -> Self {
        Self {
            id: value.id,
            status: value.status,
            player_one: value.player_one,
            player_two: value.player_two,
            player_one_score: value.player_one_score,
            player_two_score: value.player_two_score,
            current_turn: value.current_turn,
            first_selected: value.first_selected.map(|index| index as usize),
            processing_match: value.processing_match,
            winner: value.winner.as_deref().and_then(Winner::parse),
            cards: value.cards.into_iter().map(Into::into).collect(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}
