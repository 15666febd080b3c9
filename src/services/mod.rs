/// Per-client orchestration of a live match.
pub mod controller;
/// Board construction from the image catalog.
pub mod deck;
/// Forfeit-on-disconnect commitments.
pub mod disconnect;
/// Pair evaluation and selection guards.
pub mod evaluator;
/// Room lookup and creation for seekers.
pub mod matchmaker;
