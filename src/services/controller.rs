use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::catalog::CardImageCatalog;
use crate::config::EngineConfig;
use crate::directory::UserDirectory;
use crate::error::ServiceError;
use crate::services::deck;
use crate::services::disconnect::DisconnectGuard;
use crate::services::evaluator;
use crate::services::matchmaker::RoomMatchmaker;
use crate::state::room::Room;
use crate::state::state_machine::{
    FinishReason, PairOutcome, RoomEvent, RoomPhase, SelectionPhase, TurnStateMachine,
};
use crate::store::client::RoomClient;
use crate::store::models::{FieldWrite, PlayerId, RoomId, RoomStatus, Winner};
use crate::store::{RoomStore, RoomUpdates, SessionId};

/// How long one staged store round-trip may take before the action is
/// abandoned.
const ACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine-to-UI event.
#[derive(Debug)]
pub enum GameNotice {
    /// Fresh full snapshot of the room; render the board from this.
    Snapshot(Room),
    /// The match settled. Emitted exactly once per session.
    Finished {
        /// Outcome of the match.
        winner: Winner,
    },
    /// The session ended abnormally; leave the game screen.
    Aborted(ServiceError),
}

enum Command {
    Select { index: usize },
    Resolve { first: usize, second: usize },
    Revert { first: usize, second: usize },
    Leave,
}

/// Cloneable input surface of a running game session.
#[derive(Clone)]
#[derive(Debug)]
pub struct GameHandle {
    commands: mpsc::UnboundedSender<Command>,
    room: RoomId,
    player: PlayerId,
}

impl GameHandle {
    /// Request selecting the card at `index`. Invalid or out-of-turn
    /// selections are ignored by the controller.
    pub fn select_card(&self, index: usize) {
        let _ = self.commands.send(Command::Select { index });
    }

    /// Leave the game. Forfeits to the opponent while the match is live.
    pub fn leave(&self) {
        let _ = self.commands.send(Command::Leave);
    }

    /// The room this session plays in.
    pub fn room_id(&self) -> RoomId {
        self.room
    }

    /// The local player.
    pub fn player_id(&self) -> PlayerId {
        self.player
    }
}

/// A matched and running game session.
#[derive(Debug)]
pub struct LiveGame {
    /// Input surface for the UI layer.
    pub handle: GameHandle,
    /// Engine-to-UI notices, ending when the session tears down.
    pub notices: mpsc::UnboundedReceiver<GameNotice>,
    /// The driving task; completes after teardown.
    pub driver: JoinHandle<()>,
    session: SessionId,
}

impl LiveGame {
    /// The store session this game runs on.
    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// Per-client orchestrator of one match.
///
/// Owns the subscription, the turn timer, the selection protocol and the
/// terminal bookkeeping for a single player's view of a room. All inputs
/// funnel through one task, so the only concurrency the protocol has to
/// survive is the remote opponent racing the shared store.
pub struct GameController {
    store: Arc<dyn RoomStore>,
    directory: Arc<dyn UserDirectory>,
    catalog: Arc<dyn CardImageCatalog>,
    config: EngineConfig,
    player: PlayerId,
    session: SessionId,
    client: RoomClient,
    machine: TurnStateMachine,
    guard: DisconnectGuard,
    room: Option<Room>,
    turn_deadline: Option<Instant>,
    /// The pair currently awaiting resolution. Scheduled resolutions
    /// carry their indices back and are dropped when they no longer
    /// match, so a timed-out selection cannot resolve late.
    in_flight: Option<(usize, usize)>,
    board_init_started: bool,
    finish_announced: bool,
    notices: mpsc::UnboundedSender<GameNotice>,
    internal: mpsc::UnboundedSender<Command>,
}

impl GameController {
    /// Find or create a room for `player` and spawn the driving task.
    ///
    /// Verifies the image catalog can cover the configured board before
    /// touching the room collection, so a client that could never lay a
    /// board out does not leave orphaned rooms behind.
    pub async fn launch(
        store: Arc<dyn RoomStore>,
        directory: Arc<dyn UserDirectory>,
        catalog: Arc<dyn CardImageCatalog>,
        config: EngineConfig,
        player: PlayerId,
    ) -> Result<LiveGame, ServiceError> {
        let images = catalog.all_images().await?;
        let available = deck::distinct_images(&images).len();
        if available < config.pairs_per_board {
            return Err(ServiceError::CatalogExhausted {
                needed: config.pairs_per_board,
                available,
            });
        }

        let matchmaker = RoomMatchmaker::new(store.clone());
        let room = matchmaker.find_or_create(player).await?;

        let client = RoomClient::new(store.clone(), room.id);
        let updates = match client.subscribe().await {
            Ok(updates) => updates,
            Err(err) => {
                let _ = matchmaker.cancel(room.id).await;
                return Err(err.into());
            }
        };

        let session = match store.open_session().await {
            Ok(session) => session,
            Err(err) => {
                let _ = matchmaker.cancel(room.id).await;
                return Err(err.into());
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let controller = GameController {
            guard: DisconnectGuard::new(store.clone(), session),
            store,
            directory,
            catalog,
            config,
            player,
            session,
            client,
            machine: TurnStateMachine::new(),
            room: None,
            turn_deadline: None,
            in_flight: None,
            board_init_started: false,
            finish_announced: false,
            notices: notice_tx,
            internal: command_tx.clone(),
        };

        let handle = GameHandle {
            commands: command_tx,
            room: room.id,
            player,
        };
        let driver = tokio::spawn(controller.run(updates, command_rx));

        Ok(LiveGame {
            handle,
            notices: notice_rx,
            driver,
            session,
        })
    }

    async fn run(mut self, mut updates: RoomUpdates, mut commands: mpsc::UnboundedReceiver<Command>) {
        let outcome = self.drive(&mut updates, &mut commands).await;
        if let Err(err) = outcome {
            error!(room = %self.client.room_id(), error = %err, "game session failed");
            let _ = self.notices.send(GameNotice::Aborted(err));
        }
        self.teardown().await;
    }

    async fn drive(
        &mut self,
        updates: &mut RoomUpdates,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), ServiceError> {
        loop {
            let deadline = self.turn_deadline;
            tokio::select! {
                snapshot = updates.next() => match snapshot {
                    Some(doc) => self.on_snapshot(doc.into()).await?,
                    None => {
                        if self.finish_announced {
                            return Ok(());
                        }
                        return Err(ServiceError::SubscriptionClosed);
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Select { index }) => self.on_select(index).await,
                    Some(Command::Resolve { first, second }) => self.on_resolve(first, second).await,
                    Some(Command::Revert { first, second }) => self.on_revert(first, second).await,
                    // A dropped handle counts as leaving.
                    Some(Command::Leave) | None => {
                        self.on_leave().await;
                        return Ok(());
                    }
                },
                _ = turn_timer(deadline) => self.on_turn_timeout().await,
            }
        }
    }

    /// Fold one observed snapshot into the local session.
    async fn on_snapshot(&mut self, room: Room) -> Result<(), ServiceError> {
        let phase = RoomPhase::of_room(&room);
        if self.machine.reconcile(phase.clone()) {
            debug!(room = %room.id, ?phase, "room phase changed");
        }

        self.restart_turn_timer(&room, &phase);

        if room.status != RoomStatus::Finished {
            if let Some(opponent) = room.opponent_of(self.player) {
                if let Err(err) = self.guard.arm(room.id, opponent).await {
                    warn!(room = %room.id, error = %err, "could not arm forfeit-on-disconnect");
                }
            }
        }

        let _ = self.notices.send(GameNotice::Snapshot(room.clone()));

        self.maybe_init_board(&room).await?;
        self.maybe_finish(&room).await;

        self.room = Some(room);
        Ok(())
    }

    /// The timer follows every observed turn change while the match is
    /// live; both clients keep one for display, but only the turn holder
    /// acts on expiry.
    fn restart_turn_timer(&mut self, room: &Room, phase: &RoomPhase) {
        match phase {
            RoomPhase::Playing(_) => {
                let turn_changed = self
                    .room
                    .as_ref()
                    .is_none_or(|previous| previous.current_turn != room.current_turn);
                if turn_changed || self.turn_deadline.is_none() {
                    self.turn_deadline = Some(Instant::now() + self.config.turn_timeout);
                }
            }
            RoomPhase::Waiting | RoomPhase::Finished => self.turn_deadline = None,
        }
    }

    /// Player one lays the board out the first time the room is observed
    /// playing with no cards. A setup failure tears the room down: the
    /// opponent has already joined, so deleting the room is what ends
    /// their subscription and gets them off the dead match.
    async fn maybe_init_board(&mut self, room: &Room) -> Result<(), ServiceError> {
        if self.board_init_started
            || room.player_one != self.player
            || room.status != RoomStatus::Playing
            || !room.cards.is_empty()
        {
            return Ok(());
        }
        self.board_init_started = true;

        if let Err(err) = self.lay_out_board().await {
            warn!(room = %room.id, error = %err, "board setup failed, abandoning the room");
            let matchmaker = RoomMatchmaker::new(self.store.clone());
            match matchmaker.abandon_setup(room.id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(room = %room.id, "abandoned room was no longer eligible for teardown");
                }
                Err(abandon_err) => {
                    warn!(room = %room.id, error = %abandon_err, "could not tear the room down");
                }
            }
            return Err(err);
        }
        Ok(())
    }

    async fn lay_out_board(&mut self) -> Result<(), ServiceError> {
        let images = self.catalog.all_images().await?;
        let cards = deck::build_deck(&images, self.config.pairs_per_board)?;
        let me = self.player;

        self.run_planned(RoomEvent::BoardInitialized, |client| async move {
            let wrote = client.init_board(cards, me).await?;
            if !wrote {
                debug!("board was already laid out");
            }
            Ok(())
        })
        .await
    }

    /// A card tapped locally. Anything inconsistent with the current
    /// snapshot or phase is dropped here, before any store traffic.
    async fn on_select(&mut self, index: usize) {
        let Some(room) = self.room.clone() else {
            debug!(index, "selection before the first snapshot");
            return;
        };
        if !evaluator::is_selectable(&room, self.player, index) {
            debug!(room = %room.id, index, "selection ignored");
            return;
        }

        let result = match self.machine.phase() {
            RoomPhase::Playing(SelectionPhase::Open) => self.arm_first_card(index).await,
            RoomPhase::Playing(SelectionPhase::Armed { first }) if first != index => {
                self.pick_second_card(first, index).await
            }
            phase => {
                debug!(?phase, index, "selection ignored in this phase");
                return;
            }
        };

        match result {
            Ok(()) => {}
            Err(ServiceError::InvalidState(reason)) => {
                // Usually a double tap racing the first round-trip.
                debug!(index, %reason, "selection refused");
            }
            Err(err) => warn!(index, error = %err, "card selection failed"),
        }
    }

    async fn arm_first_card(&mut self, index: usize) -> Result<(), ServiceError> {
        self.run_planned(RoomEvent::CardArmed { index }, |client| async move {
            client.update_card_status(index, true, false).await?;
            client
                .update_field(FieldWrite::FirstSelected(Some(index as u32)))
                .await?;
            Ok(())
        })
        .await
    }

    async fn pick_second_card(&mut self, first: usize, second: usize) -> Result<(), ServiceError> {
        self.run_planned(RoomEvent::SecondCardPicked { index: second }, |client| async move {
            client.update_card_status(second, true, false).await?;
            client
                .update_field(FieldWrite::ProcessingMatch(true))
                .await?;
            Ok(())
        })
        .await?;

        // Let both clients render the flip before resolving.
        self.in_flight = Some((first, second));
        self.schedule(self.config.reveal_grace, Command::Resolve { first, second });
        Ok(())
    }

    /// The reveal grace elapsed; settle the pair.
    async fn on_resolve(&mut self, first: usize, second: usize) {
        if self.in_flight != Some((first, second)) {
            debug!(first, second, "stale resolution dropped");
            return;
        }
        let Some(room) = self.room.clone() else { return };
        if room.status != RoomStatus::Playing {
            debug!(room = %room.id, "resolution overtaken by the room ending");
            return;
        }

        let outcome = match evaluator::evaluate_pair(&room.cards, first, second) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(first, second, error = %err, "pair cannot be evaluated, releasing the flag");
                self.in_flight = None;
                let _ = self
                    .client
                    .update_field(FieldWrite::FirstSelected(None))
                    .await;
                let _ = self
                    .client
                    .update_field(FieldWrite::ProcessingMatch(false))
                    .await;
                return;
            }
        };

        match outcome {
            PairOutcome::Matched => match self.settle_match(first, second).await {
                Ok(()) => self.in_flight = None,
                Err(err) => warn!(error = %err, "match settlement failed"),
            },
            PairOutcome::Mismatched => {
                self.schedule(self.config.mismatch_grace, Command::Revert { first, second });
            }
        }
    }

    /// A genuine match: resolve both cards, score, keep the turn, and
    /// settle the room when the board is exhausted.
    async fn settle_match(&mut self, first: usize, second: usize) -> Result<(), ServiceError> {
        let me = self.player;
        self.run_planned(
            RoomEvent::PairResolved(PairOutcome::Matched),
            |client| async move {
                client.update_card_status(first, true, true).await?;
                client.update_card_status(second, true, true).await?;
                let doc = client.increment_score(me).await?;
                client.update_field(FieldWrite::FirstSelected(None)).await?;
                client
                    .update_field(FieldWrite::ProcessingMatch(false))
                    .await?;

                let room: Room = doc.into();
                if room.all_matched() {
                    let winner = room.outcome_by_scores();
                    client
                        .update_field(FieldWrite::Winner(Some(winner)))
                        .await?;
                    client
                        .update_field(FieldWrite::Status(RoomStatus::Finished))
                        .await?;
                }
                Ok(())
            },
        )
        .await
    }

    /// The mismatch grace elapsed; flip the pair back and pass the turn.
    async fn on_revert(&mut self, first: usize, second: usize) {
        if self.in_flight != Some((first, second)) {
            debug!(first, second, "stale revert dropped");
            return;
        }
        let Some(room) = self.room.clone() else { return };
        if room.status != RoomStatus::Playing {
            return;
        }
        let Some(opponent) = room.opponent_of(self.player) else {
            warn!(room = %room.id, "no opponent to hand the turn to");
            return;
        };

        let result = self
            .run_planned(
                RoomEvent::PairResolved(PairOutcome::Mismatched),
                |client| async move {
                    client.update_card_status(first, false, false).await?;
                    client.update_card_status(second, false, false).await?;
                    client.update_field(FieldWrite::FirstSelected(None)).await?;
                    client
                        .update_field(FieldWrite::CurrentTurn(opponent))
                        .await?;
                    client
                        .update_field(FieldWrite::ProcessingMatch(false))
                        .await?;
                    Ok(())
                },
            )
            .await;
        match result {
            Ok(()) => self.in_flight = None,
            Err(err) => warn!(error = %err, "mismatch revert failed"),
        }
    }

    /// The turn timer expired. Only the turn holder writes the pass; two
    /// independent timers would double-flip the turn. The pass is
    /// unconditional: an in-flight evaluation does not hold the turn
    /// open, its pair is reverted and the scheduled resolution is
    /// dropped when it arrives.
    async fn on_turn_timeout(&mut self) {
        self.turn_deadline = None;
        let Some(room) = self.room.clone() else { return };
        if room.status != RoomStatus::Playing || !room.is_turn_of(self.player) {
            return;
        }
        let Some(opponent) = room.opponent_of(self.player) else {
            return;
        };

        info!(room = %room.id, "turn timer expired, passing the turn");
        let resolving = self.in_flight;
        let armed = room.first_selected;
        let result = self
            .run_planned(RoomEvent::TurnPassed, |client| async move {
                if let Some((first, second)) = resolving {
                    client.update_card_status(first, false, false).await?;
                    client.update_card_status(second, false, false).await?;
                    client.update_field(FieldWrite::FirstSelected(None)).await?;
                    client
                        .update_field(FieldWrite::ProcessingMatch(false))
                        .await?;
                } else if let Some(index) = armed {
                    client.update_card_status(index, false, false).await?;
                    client.update_field(FieldWrite::FirstSelected(None)).await?;
                }
                client
                    .update_field(FieldWrite::CurrentTurn(opponent))
                    .await?;
                Ok(())
            })
            .await;
        match result {
            Ok(()) => self.in_flight = None,
            Err(err) => warn!(error = %err, "turn pass failed"),
        }
    }

    /// Terminal bookkeeping, exactly once: drop the forfeit commitment,
    /// record the win, and tell the UI.
    async fn maybe_finish(&mut self, room: &Room) {
        if room.status != RoomStatus::Finished || self.finish_announced {
            return;
        }
        self.finish_announced = true;
        self.turn_deadline = None;
        self.in_flight = None;

        if let Err(err) = self.guard.disarm(room.id).await {
            warn!(room = %room.id, error = %err, "could not disarm forfeit-on-disconnect");
        }

        let winner = room.winner.unwrap_or_else(|| room.outcome_by_scores());
        if winner == Winner::Player(self.player) {
            // Fire and forget; at-least-once is acceptable for the tally.
            let directory = self.directory.clone();
            let me = self.player;
            tokio::spawn(async move {
                if let Err(err) = directory.increment_wins(me).await {
                    warn!(player = %me, error = %err, "win could not be recorded");
                }
            });
        }

        info!(room = %room.id, winner = ?winner, "match finished");
        let _ = self.notices.send(GameNotice::Finished { winner });
    }

    /// Explicit exit. A live match forfeits to the remaining player; an
    /// unmatched waiting room is destroyed instead of lingering.
    async fn on_leave(&mut self) {
        let Some(room) = self.room.clone() else { return };
        match room.status {
            RoomStatus::Waiting if room.player_two.is_none() => {
                let matchmaker = RoomMatchmaker::new(self.store.clone());
                if let Err(err) = matchmaker.cancel(room.id).await {
                    warn!(room = %room.id, error = %err, "could not cancel the waiting room");
                }
            }
            RoomStatus::Playing => {
                let Some(opponent) = room.opponent_of(self.player) else {
                    return;
                };
                let result = self
                    .run_planned(
                        RoomEvent::Finish(FinishReason::Forfeit),
                        |client| async move {
                            client
                                .update_field(FieldWrite::Winner(Some(Winner::Player(opponent))))
                                .await?;
                            client
                                .update_field(FieldWrite::Status(RoomStatus::Finished))
                                .await?;
                            Ok(())
                        },
                    )
                    .await;
                if let Err(err) = result {
                    warn!(room = %room.id, error = %err, "forfeit on leave failed");
                }
            }
            RoomStatus::Waiting | RoomStatus::Finished => {}
        }
    }

    async fn teardown(&mut self) {
        let room = self.client.room_id();
        if let Err(err) = self.guard.disarm(room).await {
            warn!(%room, error = %err, "could not disarm forfeit-on-disconnect during teardown");
        }
        self.client.stop_listening();
        if let Err(err) = self.store.close_session(self.session).await {
            warn!(error = %err, "store session close failed");
        }
        info!(%room, player = %self.player, "left the room context");
    }

    /// Stage a local transition, run the store round-trip, then commit or
    /// roll the transition back. The pending plan blocks further local
    /// input until the round-trip settles.
    async fn run_planned<F, Fut>(&mut self, event: RoomEvent, work: F) -> Result<(), ServiceError>
    where
        F: FnOnce(RoomClient) -> Fut,
        Fut: Future<Output = Result<(), ServiceError>>,
    {
        let plan = self.machine.plan(event.clone())?;

        let outcome = match time::timeout(ACTION_TIMEOUT, work(self.client.clone())).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        };

        match outcome {
            Ok(()) => {
                if let Err(apply_err) = self.machine.apply(plan.id) {
                    // The room moved on mid-action; snapshots are authoritative.
                    debug!(?event, error = ?apply_err, "planned action overtaken by remote progress");
                }
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = self.machine.abort(plan.id) {
                    warn!(?event, error = ?abort_err, "failed to abort planned action");
                }
                Err(err)
            }
        }
    }

    fn schedule(&self, delay: Duration, command: Command) {
        let tx = self.internal.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(command);
        });
    }
}

async fn turn_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CardImage, CatalogError, StaticImageCatalog};
    use crate::directory::InMemoryUserDirectory;
    use crate::store::memory::MemoryRoomStore;
    use futures::future::BoxFuture;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct World {
        store: MemoryRoomStore,
        directory: Arc<InMemoryUserDirectory>,
        catalog: Arc<StaticImageCatalog>,
        config: EngineConfig,
    }

    fn images(count: usize) -> Vec<CardImage> {
        (0..count)
            .map(|i| CardImage {
                id: format!("img-{i}"),
                content: format!("content-{i}"),
            })
            .collect()
    }

    fn world(image_count: usize) -> World {
        World {
            store: MemoryRoomStore::new(),
            directory: Arc::new(InMemoryUserDirectory::new()),
            catalog: Arc::new(StaticImageCatalog::from_pairs(
                (0..image_count).map(|i| (format!("img-{i}"), format!("content-{i}"))),
            )),
            config: EngineConfig {
                pairs_per_board: 2,
                turn_timeout: Duration::from_secs(20),
                reveal_grace: Duration::from_millis(50),
                mismatch_grace: Duration::from_millis(80),
            },
        }
    }

    /// Catalog whose pool the test can swap out mid-game.
    struct SharedCatalog {
        pool: Mutex<Vec<CardImage>>,
    }

    impl SharedCatalog {
        fn with_images(count: usize) -> Self {
            Self {
                pool: Mutex::new(images(count)),
            }
        }

        fn set(&self, count: usize) {
            *self.pool.lock().unwrap() = images(count);
        }
    }

    impl CardImageCatalog for SharedCatalog {
        fn all_images(&self) -> BoxFuture<'static, Result<Vec<CardImage>, CatalogError>> {
            let pool = self.pool.lock().unwrap().clone();
            Box::pin(async move { Ok(pool) })
        }
    }

    async fn launch(world: &World, player: PlayerId) -> LiveGame {
        GameController::launch(
            Arc::new(world.store.clone()),
            world.directory.clone(),
            world.catalog.clone(),
            world.config.clone(),
            player,
        )
        .await
        .expect("launch game")
    }

    async fn next_snapshot(game: &mut LiveGame) -> Room {
        loop {
            match game.notices.recv().await.expect("notices ended") {
                GameNotice::Snapshot(room) => return room,
                _ => continue,
            }
        }
    }

    async fn wait_for(game: &mut LiveGame, predicate: impl Fn(&Room) -> bool) -> Room {
        loop {
            let room = next_snapshot(game).await;
            if predicate(&room) {
                return room;
            }
        }
    }

    async fn wait_for_finish(game: &mut LiveGame) -> Winner {
        loop {
            match game.notices.recv().await.expect("notices ended") {
                GameNotice::Finished { winner } => return winner,
                _ => continue,
            }
        }
    }

    async fn wait_for_abort(game: &mut LiveGame) -> ServiceError {
        loop {
            match game.notices.recv().await.expect("notices ended") {
                GameNotice::Aborted(err) => return err,
                _ => continue,
            }
        }
    }

    /// Indices of the two cards sharing the first pair key, and of the
    /// remaining pair.
    fn pairs_of(room: &Room) -> ((usize, usize), (usize, usize)) {
        let key = &room.cards[0].pair_key;
        let (same, other): (Vec<usize>, Vec<usize>) =
            (0..room.cards.len()).partition(|&i| room.cards[i].pair_key == *key);
        ((same[0], same[1]), (other[0], other[1]))
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_the_board_crowns_the_scorer_on_both_clients() {
        let w = world(4);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        w.directory.register(a, "Alma");
        w.directory.register(b, "Bo");

        let mut game_a = launch(&w, a).await;
        let mut game_b = launch(&w, b).await;

        assert_eq!(game_a.handle.player_id(), a);

        let board = wait_for(&mut game_a, |room| !room.cards.is_empty()).await;
        assert_eq!(board.current_turn, a);
        assert_eq!(board.pairs_total(), 2);
        let ((i, j), (k, l)) = pairs_of(&board);

        game_a.handle.select_card(i);
        game_a.handle.select_card(j);

        let after_first = wait_for(&mut game_a, |room| {
            room.cards[i].matched && !room.processing_match
        })
        .await;
        // A genuine match scores and keeps the turn.
        assert_eq!(after_first.score_of(a), 1);
        assert_eq!(after_first.current_turn, a);
        assert!(
            (after_first.player_one_score + after_first.player_two_score) as usize
                <= after_first.pairs_total()
        );

        game_a.handle.select_card(k);
        game_a.handle.select_card(l);

        assert_eq!(wait_for_finish(&mut game_a).await, Winner::Player(a));
        assert_eq!(wait_for_finish(&mut game_b).await, Winner::Player(a));

        // The winner's client records the win, fire and forget.
        let mut wins = w.directory.wins_of(a);
        for _ in 0..20 {
            if wins == Some(1) {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
            wins = w.directory.wins_of(a);
        }
        assert_eq!(wins, Some(1));
        assert_eq!(w.directory.wins_of(b), Some(0));

        game_a.handle.leave();
        game_b.handle.leave();
    }

    #[tokio::test(start_paused = true)]
    async fn a_mismatch_reverts_the_cards_and_passes_the_turn() {
        let w = world(4);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut game_a = launch(&w, a).await;
        let mut game_b = launch(&w, b).await;

        let board = wait_for(&mut game_a, |room| !room.cards.is_empty()).await;
        let ((i, _), (j, _)) = pairs_of(&board);

        game_a.handle.select_card(i);
        game_a.handle.select_card(j);

        let reverted = wait_for(&mut game_a, |room| {
            room.current_turn == b && !room.processing_match
        })
        .await;
        assert!(!reverted.cards[i].revealed && !reverted.cards[i].matched);
        assert!(!reverted.cards[j].revealed && !reverted.cards[j].matched);
        assert_eq!(reverted.first_selected, None);
        assert_eq!(reverted.score_of(a), 0);

        let seen_by_b = wait_for(&mut game_b, |room| room.current_turn == b).await;
        assert!(!seen_by_b.processing_match);

        game_a.handle.leave();
        game_b.handle.leave();
    }

    #[tokio::test(start_paused = true)]
    async fn turn_timeout_reverts_an_armed_card_and_passes_the_turn() {
        let w = world(4);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut game_a = launch(&w, a).await;
        let game_b = launch(&w, b).await;

        let board = wait_for(&mut game_a, |room| !room.cards.is_empty()).await;
        let ((i, _), _) = pairs_of(&board);

        game_a.handle.select_card(i);
        wait_for(&mut game_a, |room| room.first_selected == Some(i)).await;

        // No second selection: the timer must fire, revert and pass.
        let passed = wait_for(&mut game_a, |room| room.current_turn == b).await;
        assert!(!passed.cards[i].revealed);
        assert_eq!(passed.first_selected, None);

        game_a.handle.leave();
        game_b.handle.leave();
    }

    #[tokio::test(start_paused = true)]
    async fn turn_timeout_cancels_an_in_flight_evaluation() {
        let mut w = world(4);
        // The timer must fire while the pair is still awaiting its grace.
        w.config.turn_timeout = Duration::from_millis(200);
        w.config.reveal_grace = Duration::from_secs(30);
        w.config.mismatch_grace = Duration::from_secs(30);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut game_a = launch(&w, a).await;
        let game_b = launch(&w, b).await;

        let board = wait_for(&mut game_a, |room| !room.cards.is_empty()).await;
        let ((i, j), _) = pairs_of(&board);

        // A matching pair, but its resolution never gets to run.
        game_a.handle.select_card(i);
        game_a.handle.select_card(j);
        wait_for(&mut game_a, |room| room.processing_match).await;

        let passed = wait_for(&mut game_a, |room| {
            room.current_turn == b && !room.processing_match
        })
        .await;
        assert!(!passed.cards[i].revealed && !passed.cards[i].matched);
        assert!(!passed.cards[j].revealed && !passed.cards[j].matched);
        assert_eq!(passed.first_selected, None);
        assert_eq!(passed.score_of(a), 0);

        game_a.handle.leave();
        game_b.handle.leave();
    }

    #[tokio::test(start_paused = true)]
    async fn board_setup_failure_tears_the_room_down_for_both_clients() {
        let w = world(4);
        let catalog = Arc::new(SharedCatalog::with_images(4));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut game_a = GameController::launch(
            Arc::new(w.store.clone()),
            w.directory.clone(),
            catalog.clone(),
            w.config.clone(),
            a,
        )
        .await
        .expect("launch first player");
        let room_id = game_a.handle.room_id();

        let mut game_b = GameController::launch(
            Arc::new(w.store.clone()),
            w.directory.clone(),
            catalog.clone(),
            w.config.clone(),
            b,
        )
        .await
        .expect("launch second player");

        // The catalog dries up before player one can lay the board out.
        catalog.set(1);

        let err_a = wait_for_abort(&mut game_a).await;
        assert!(matches!(err_a, ServiceError::CatalogExhausted { .. }));

        // The deleted room ends the opponent's subscription, which is how
        // their client learns the match is off.
        let err_b = wait_for_abort(&mut game_b).await;
        assert!(matches!(err_b, ServiceError::SubscriptionClosed));
        assert!(w.store.room(room_id).await.is_err());

        let _ = (&mut game_a.driver).await;
        let _ = (&mut game_b.driver).await;
    }

    #[tokio::test(start_paused = true)]
    async fn a_dropped_client_forfeits_to_the_opponent() {
        let w = world(4);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        w.directory.register(a, "Alma");
        w.directory.register(b, "Bo");

        let mut game_a = launch(&w, a).await;
        let mut game_b = launch(&w, b).await;

        // Both clients observe the live board, so A's guard is armed.
        wait_for(&mut game_a, |room| !room.cards.is_empty()).await;
        wait_for(&mut game_b, |room| !room.cards.is_empty()).await;

        // The app dies without running any teardown code.
        game_a.driver.abort();
        w.store.close_session(game_a.session()).await.unwrap();

        assert_eq!(wait_for_finish(&mut game_b).await, Winner::Player(b));

        game_b.handle.leave();
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_a_live_match_forfeits_to_the_opponent() {
        let w = world(4);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        w.directory.register(a, "Alma");
        w.directory.register(b, "Bo");

        let mut game_a = launch(&w, a).await;
        let mut game_b = launch(&w, b).await;

        wait_for(&mut game_a, |room| !room.cards.is_empty()).await;

        game_a.handle.leave();

        assert_eq!(wait_for_finish(&mut game_b).await, Winner::Player(b));
        game_b.handle.leave();
    }

    #[tokio::test(start_paused = true)]
    async fn the_finish_notice_is_emitted_exactly_once() {
        let w = world(4);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        w.directory.register(a, "Alma");
        w.directory.register(b, "Bo");

        let mut game_a = launch(&w, a).await;
        let mut game_b = launch(&w, b).await;

        let board = wait_for(&mut game_a, |room| !room.cards.is_empty()).await;
        let ((i, j), (k, l)) = pairs_of(&board);
        game_a.handle.select_card(i);
        game_a.handle.select_card(j);
        wait_for(&mut game_a, |room| room.cards[i].matched).await;
        game_a.handle.select_card(k);
        game_a.handle.select_card(l);

        wait_for_finish(&mut game_b).await;

        // A redundant write after the finish must not re-announce it.
        w.store
            .write_field(game_b.handle.room_id(), FieldWrite::ProcessingMatch(false))
            .await
            .unwrap();

        game_b.handle.leave();
        let mut finishes = 0;
        while let Some(notice) = game_b.notices.recv().await {
            if matches!(notice, GameNotice::Finished { .. }) {
                finishes += 1;
            }
        }
        assert_eq!(finishes, 0);

        game_a.handle.leave();
    }

    #[tokio::test(start_paused = true)]
    async fn a_short_catalog_refuses_to_matchmake() {
        let w = world(1);
        let err = GameController::launch(
            Arc::new(w.store.clone()),
            w.directory.clone(),
            w.catalog.clone(),
            w.config.clone(),
            Uuid::new_v4(),
        )
        .await
        .unwrap_err();

        match err {
            ServiceError::CatalogExhausted { needed, available } => {
                assert_eq!((needed, available), (2, 1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(w.store.room_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_an_unmatched_room_destroys_it() {
        let w = world(4);
        let a = Uuid::new_v4();

        let mut game_a = launch(&w, a).await;
        let room_id = game_a.handle.room_id();
        wait_for(&mut game_a, |room| room.id == room_id).await;

        game_a.handle.leave();
        let _ = (&mut game_a.driver).await;

        assert!(w.store.room(room_id).await.is_err());
    }
}
