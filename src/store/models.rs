use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::time::SystemTime;
use uuid::Uuid;

/// Stable identifier of a room document.
pub type RoomId = Uuid;

/// Stable identifier of a player, issued by the user directory.
pub type PlayerId = Uuid;

/// Sentinel stored in the winner field when a match ends level.
const DRAW_SENTINEL: &str = "draw";

/// Lifecycle status stored on the room document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Room created, second seat still open.
    Waiting,
    /// Both seats taken, match in progress.
    Playing,
    /// Terminal. The room is never reused afterwards.
    Finished,
}

/// Outcome of a finished match at the document boundary.
///
/// The document stores this as a single string field: a player id, or the
/// literal `"draw"` when the final scores are level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The named player took the match.
    Player(PlayerId),
    /// Both players resolved the same number of pairs.
    Draw,
}

impl Winner {
    /// Wire representation stored in the room document.
    pub fn as_field(&self) -> String {
        match self {
            Winner::Player(id) => id.to_string(),
            Winner::Draw => DRAW_SENTINEL.to_owned(),
        }
    }

    /// Parse the wire representation. An unparseable value yields `None`,
    /// consistent with treating a corrupt field as absent rather than
    /// failing the whole snapshot.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == DRAW_SENTINEL {
            return Some(Winner::Draw);
        }
        Uuid::parse_str(raw).ok().map(Winner::Player)
    }
}

/// One card of the shared board as persisted in the room document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CardDocument {
    /// Identifier shared by the two cards of a matching pair.
    pub pair_key: String,
    /// Opaque handle to the image content this card shows.
    pub image: String,
    /// Whether the card is currently face up.
    pub revealed: bool,
    /// Whether the card has been permanently resolved.
    pub matched: bool,
}

/// The shared room document, one per match.
///
/// Both clients read and write this document through the store; no server
/// process mediates. Plain field writes are last-writer-wins, so nothing
/// here may assume cross-field atomicity outside the store transactions.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomDocument {
    /// Primary key of the room.
    pub id: RoomId,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Player who created the room. Also the player who lays out the board.
    pub player_one: PlayerId,
    /// Second seat. Set exactly once when a seeker joins, never cleared.
    pub player_two: Option<PlayerId>,
    /// Pairs resolved by player one.
    pub player_one_score: u32,
    /// Pairs resolved by player two.
    pub player_two_score: u32,
    /// Player currently allowed to act.
    pub current_turn: PlayerId,
    /// Index of the first card of an unresolved selection, if one is armed.
    pub first_selected: Option<u32>,
    /// Soft mutex raised while a pair is being evaluated.
    pub processing_match: bool,
    /// Outcome field: a player id or the draw sentinel. Absent while live.
    pub winner: Option<String>,
    /// Ordered board. Empty until player one initializes it, fixed length
    /// afterwards.
    pub cards: Vec<CardDocument>,
    /// Creation timestamp for auditing/debugging.
    pub created_at: SystemTime,
    /// Last time the room document was updated.
    pub updated_at: SystemTime,
}

impl RoomDocument {
    /// Build a fresh waiting room for the given creator.
    pub fn waiting(player_one: PlayerId) -> Self {
        let timestamp = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            status: RoomStatus::Waiting,
            player_one,
            player_two: None,
            player_one_score: 0,
            player_two_score: 0,
            current_turn: player_one,
            first_selected: None,
            processing_match: false,
            winner: None,
            cards: Vec::new(),
            created_at: timestamp,
            updated_at: timestamp,
        }
    }
}

/// One last-writer-wins write to a single room field.
///
/// These are the low-contention writes the protocol performs outside
/// transactions; they are also the vocabulary of disconnect commitments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldWrite {
    /// Overwrite the lifecycle status.
    Status(RoomStatus),
    /// Hand the turn to the given player.
    CurrentTurn(PlayerId),
    /// Arm or clear the first selected card index.
    FirstSelected(Option<u32>),
    /// Raise or lower the pair-evaluation flag.
    ProcessingMatch(bool),
    /// Set or clear the outcome field.
    Winner(Option<Winner>),
}

impl FieldWrite {
    /// Apply this write to a document in place.
    pub(crate) fn apply(&self, doc: &mut RoomDocument) {
        match self {
            FieldWrite::Status(status) => doc.status = *status,
            FieldWrite::CurrentTurn(player) => doc.current_turn = *player,
            FieldWrite::FirstSelected(index) => doc.first_selected = *index,
            FieldWrite::ProcessingMatch(flag) => doc.processing_match = *flag,
            FieldWrite::Winner(winner) => doc.winner = winner.map(|w| w.as_field()),
        }
    }
}
