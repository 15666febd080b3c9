/// Runtime room and card types decoded from document snapshots.
pub mod room;
/// The turn protocol state machine.
pub mod state_machine;

pub use self::state_machine::{
    AbortError, ApplyError, FinishReason, InvalidTransition, PairOutcome, Plan, PlanError, PlanId,
    RoomEvent, RoomPhase, SelectionPhase, Snapshot, TurnStateMachine,
};
