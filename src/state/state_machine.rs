use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use crate::state::room::Room;
use crate::store::models::RoomStatus;

/// High-level phases a room passes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomPhase {
    /// Second seat open, or board not laid out yet.
    Waiting,
    /// Match in progress; the sub-phase tracks the selection protocol.
    Playing(SelectionPhase),
    /// Terminal: board exhausted, forfeit, or disconnect.
    Finished,
}

/// Fine-grained phase of the selection protocol while playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPhase {
    /// No card armed; the turn holder may select freely.
    Open,
    /// One card face up and unresolved.
    Armed {
        /// Index of the armed card.
        first: usize,
    },
    /// A second card was picked; evaluation is in flight and both players
    /// are blocked.
    Resolving,
}

/// Outcome of evaluating a selected pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// The two cards share a pair key.
    Matched,
    /// The two cards differ; they will be reverted.
    Mismatched,
}

/// Indicates why a room reached the terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Every pair on the board was resolved.
    BoardCleared,
    /// A player left or disconnected before the board was exhausted.
    Forfeit,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Player one laid out the board; turns may begin.
    BoardInitialized,
    /// The turn holder revealed a first card.
    CardArmed {
        /// Index of the revealed card.
        index: usize,
    },
    /// The turn holder revealed a second, different card.
    SecondCardPicked {
        /// Index of the second card.
        index: usize,
    },
    /// The in-flight evaluation resolved.
    PairResolved(PairOutcome),
    /// The turn timer expired and the turn passes to the other player.
    TurnPassed,
    /// The match reached its terminal state.
    Finish(FinishReason),
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event arrived.
    pub from: RoomPhase,
    /// The event that cannot be applied from this phase.
    pub event: RoomEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    /// This doubles as the local input lock: a second selection arriving
    /// before the first round-trip completes is refused here.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// The observed phase moved on while the plan was in flight, usually
    /// because the remote side acted first.
    PhaseMismatch {
        /// Phase when the plan was created.
        expected: RoomPhase,
        /// Current phase.
        actual: RoomPhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version the plan expected to commit.
        expected: usize,
        /// Version the machine would actually commit.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A validated transition that has not been committed yet.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: RoomPhase,
    /// Phase the state machine will transition to.
    pub to: RoomPhase,
    /// Event that triggered this transition.
    pub event: RoomEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: RoomPhase,
    /// Version number (increments on each transition or reconciliation).
    pub version: usize,
    /// Target phase of the pending transition, if one is planned.
    pub pending: Option<RoomPhase>,
}

/// Local mirror of the room's turn protocol.
///
/// Local actions go through [`plan`](TurnStateMachine::plan) /
/// [`apply`](TurnStateMachine::apply) /
/// [`abort`](TurnStateMachine::abort) so a store round-trip can be staged,
/// validated and committed (or rolled back) without racing a second local
/// input. Remote snapshots are authoritative and are folded in through
/// [`reconcile`](TurnStateMachine::reconcile): a plan staged before a
/// reconciliation fails its apply instead of clobbering remote progress.
#[derive(Debug, Clone)]
pub struct TurnStateMachine {
    phase: RoomPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for TurnStateMachine {
    fn default() -> Self {
        Self {
            phase: RoomPhase::Waiting,
            version: 0,
            pending: None,
        }
    }
}

impl RoomPhase {
    /// Derive the phase from a room snapshot.
    ///
    /// A room whose status says playing but whose board is still empty is
    /// treated as waiting: turns cannot begin before player one lays the
    /// board out.
    pub fn of_room(room: &Room) -> Self {
        match room.status {
            RoomStatus::Finished => RoomPhase::Finished,
            RoomStatus::Waiting => RoomPhase::Waiting,
            RoomStatus::Playing if room.cards.is_empty() => RoomPhase::Waiting,
            RoomStatus::Playing => {
                let selection = if room.processing_match {
                    SelectionPhase::Resolving
                } else if let Some(first) = room.first_selected {
                    SelectionPhase::Armed { first }
                } else {
                    SelectionPhase::Open
                };
                RoomPhase::Playing(selection)
            }
        }
    }
}

impl TurnStateMachine {
    /// Create a new state machine initialised in the waiting phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> RoomPhase {
        self.phase.clone()
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase.clone(),
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to.clone()),
        }
    }

    /// Fold in a phase observed on a remote snapshot.
    ///
    /// The remote document is the source of truth; the observed phase is
    /// adopted unconditionally. Returns `true` when the phase actually
    /// changed, in which case the version is bumped so any plan staged
    /// against the previous phase fails its apply.
    pub fn reconcile(&mut self, observed: RoomPhase) -> bool {
        if self.phase == observed {
            return false;
        }
        self.phase = observed;
        self.version += 1;
        true
    }

    /// Plan a transition by validating that the event can be applied from
    /// the current phase. Returns a Plan that can later be applied or
    /// aborted. Refuses to stack a second plan on a pending one.
    pub fn plan(&mut self, event: RoomEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event.clone())
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase.clone(),
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the machine to the next phase.
    /// Returns the new phase after the transition.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<RoomPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase.clone(),
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;
        self.pending = None;

        Ok(self.phase.clone())
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: RoomEvent) -> Result<RoomPhase, InvalidTransition> {
        use RoomPhase::{Finished, Playing, Waiting};
        use SelectionPhase::{Armed, Open, Resolving};

        let next = match (self.phase.clone(), event) {
            (Waiting, RoomEvent::BoardInitialized) => Playing(Open),
            (Playing(Open), RoomEvent::CardArmed { index }) => Playing(Armed { first: index }),
            (Playing(Armed { first }), RoomEvent::SecondCardPicked { index }) if index != first => {
                Playing(Resolving)
            }
            (Playing(Resolving), RoomEvent::PairResolved(_)) => Playing(Open),
            // The timer passes the turn from every playing sub-phase; an
            // in-flight evaluation does not hold the turn open.
            (Playing(_), RoomEvent::TurnPassed) => Playing(Open),
            (Waiting, RoomEvent::Finish(..)) => Finished,
            (Playing(_), RoomEvent::Finish(..)) => Finished,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{CardDocument, RoomDocument};
    use uuid::Uuid;

    fn apply(sm: &mut TurnStateMachine, event: RoomEvent) -> RoomPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_waiting() {
        let sm = TurnStateMachine::new();
        assert_eq!(sm.phase(), RoomPhase::Waiting);
    }

    #[test]
    fn full_happy_path_through_a_match() {
        let mut sm = TurnStateMachine::new();

        assert_eq!(
            apply(&mut sm, RoomEvent::BoardInitialized),
            RoomPhase::Playing(SelectionPhase::Open)
        );
        assert_eq!(
            apply(&mut sm, RoomEvent::CardArmed { index: 0 }),
            RoomPhase::Playing(SelectionPhase::Armed { first: 0 })
        );
        assert_eq!(
            apply(&mut sm, RoomEvent::SecondCardPicked { index: 2 }),
            RoomPhase::Playing(SelectionPhase::Resolving)
        );
        assert_eq!(
            apply(&mut sm, RoomEvent::PairResolved(PairOutcome::Matched)),
            RoomPhase::Playing(SelectionPhase::Open)
        );
        assert_eq!(
            apply(&mut sm, RoomEvent::Finish(FinishReason::BoardCleared)),
            RoomPhase::Finished
        );
    }

    #[test]
    fn mismatch_resolution_reopens_the_selection() {
        let mut sm = TurnStateMachine::new();
        apply(&mut sm, RoomEvent::BoardInitialized);
        apply(&mut sm, RoomEvent::CardArmed { index: 1 });
        apply(&mut sm, RoomEvent::SecondCardPicked { index: 3 });

        assert_eq!(
            apply(&mut sm, RoomEvent::PairResolved(PairOutcome::Mismatched)),
            RoomPhase::Playing(SelectionPhase::Open)
        );
    }

    #[test]
    fn picking_the_armed_card_again_is_invalid() {
        let mut sm = TurnStateMachine::new();
        apply(&mut sm, RoomEvent::BoardInitialized);
        apply(&mut sm, RoomEvent::CardArmed { index: 2 });

        let err = sm
            .plan(RoomEvent::SecondCardPicked { index: 2 })
            .unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(
                    invalid.from,
                    RoomPhase::Playing(SelectionPhase::Armed { first: 2 })
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn timer_expiry_reverts_an_armed_selection() {
        let mut sm = TurnStateMachine::new();
        apply(&mut sm, RoomEvent::BoardInitialized);
        apply(&mut sm, RoomEvent::CardArmed { index: 5 });

        assert_eq!(
            apply(&mut sm, RoomEvent::TurnPassed),
            RoomPhase::Playing(SelectionPhase::Open)
        );
    }

    #[test]
    fn timer_expiry_cancels_an_in_flight_resolution() {
        let mut sm = TurnStateMachine::new();
        apply(&mut sm, RoomEvent::BoardInitialized);
        apply(&mut sm, RoomEvent::CardArmed { index: 0 });
        apply(&mut sm, RoomEvent::SecondCardPicked { index: 2 });

        assert_eq!(
            apply(&mut sm, RoomEvent::TurnPassed),
            RoomPhase::Playing(SelectionPhase::Open)
        );
    }

    #[test]
    fn pending_plan_refuses_further_plans() {
        let mut sm = TurnStateMachine::new();
        let _plan = sm.plan(RoomEvent::BoardInitialized).unwrap();
        assert_eq!(
            sm.snapshot().pending,
            Some(RoomPhase::Playing(SelectionPhase::Open))
        );

        let err = sm.plan(RoomEvent::BoardInitialized).unwrap_err();
        assert_eq!(err, PlanError::AlreadyPending);
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = TurnStateMachine::new();
        let plan = sm.plan(RoomEvent::BoardInitialized).unwrap();
        sm.abort(plan.id).unwrap();
        assert!(sm.plan(RoomEvent::BoardInitialized).is_ok());
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut sm = TurnStateMachine::new();
        let err = sm
            .plan(RoomEvent::PairResolved(PairOutcome::Matched))
            .unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, RoomPhase::Waiting);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reconcile_adopts_remote_progress_and_fails_stale_plans() {
        let mut sm = TurnStateMachine::new();
        apply(&mut sm, RoomEvent::BoardInitialized);

        let plan = sm.plan(RoomEvent::CardArmed { index: 0 }).unwrap();

        // The opponent acted first; the remote snapshot wins.
        let changed = sm.reconcile(RoomPhase::Playing(SelectionPhase::Resolving));
        assert!(changed);

        let err = sm.apply(plan.id).unwrap_err();
        assert!(matches!(err, ApplyError::PhaseMismatch { .. }));
        assert_eq!(sm.phase(), RoomPhase::Playing(SelectionPhase::Resolving));
    }

    #[test]
    fn reconcile_with_an_unchanged_phase_keeps_pending_plans_valid() {
        let mut sm = TurnStateMachine::new();
        apply(&mut sm, RoomEvent::BoardInitialized);

        let plan = sm.plan(RoomEvent::CardArmed { index: 4 }).unwrap();
        let changed = sm.reconcile(RoomPhase::Playing(SelectionPhase::Open));
        assert!(!changed);

        // The echo of our own pending write must not invalidate the plan.
        assert_eq!(
            sm.apply(plan.id).unwrap(),
            RoomPhase::Playing(SelectionPhase::Armed { first: 4 })
        );
    }

    #[test]
    fn phase_derivation_tracks_the_document() {
        let mut doc = RoomDocument::waiting(Uuid::new_v4());
        let room: Room = doc.clone().into();
        assert_eq!(RoomPhase::of_room(&room), RoomPhase::Waiting);

        doc.player_two = Some(Uuid::new_v4());
        doc.status = RoomStatus::Playing;
        let room: Room = doc.clone().into();
        // Joined but no board yet: still waiting from the protocol's view.
        assert_eq!(RoomPhase::of_room(&room), RoomPhase::Waiting);

        doc.cards = vec![
            CardDocument {
                pair_key: "a".into(),
                image: "img".into(),
                revealed: false,
                matched: false,
            };
            2
        ];
        let room: Room = doc.clone().into();
        assert_eq!(
            RoomPhase::of_room(&room),
            RoomPhase::Playing(SelectionPhase::Open)
        );

        doc.first_selected = Some(1);
        let room: Room = doc.clone().into();
        assert_eq!(
            RoomPhase::of_room(&room),
            RoomPhase::Playing(SelectionPhase::Armed { first: 1 })
        );

        doc.processing_match = true;
        let room: Room = doc.clone().into();
        assert_eq!(
            RoomPhase::of_room(&room),
            RoomPhase::Playing(SelectionPhase::Resolving)
        );

        doc.status = RoomStatus::Finished;
        let room: Room = doc.into();
        assert_eq!(RoomPhase::of_room(&room), RoomPhase::Finished);
    }
}
