//! Per-conversation event loop. Owns every piece of reconciliation state and is the only
//! task that mutates it; push events, commands and timer deadlines are serialized here.

use crate::accumulator::AudioAccumulator;
use crate::api::{ChatApi, ChatSnapshot};
use crate::applier::TurnApplier;
use crate::artifact::ArtifactStore;
use crate::config::ReconcileConfig;
use crate::escalation::{EscalationState, EscalationTimer, Transition};
use crate::pending::{JoinOutcome, PendingTurnTable};
use crate::playback::{AudioPlayer, PlaybackGuard, PlaybackRequest};
use crate::push::{PushChannel, PushEvent};
use crate::reconciler::{PullReconciler, ReconcileReport, StopReason};
use crate::types::{
    AudioHalf, ConnectionStatus, ConversationId, ConversationMode, ErrorKind, ObservedError,
    ParleyError, Result, Turn, TurnId,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_error::SpanTrace;

pub enum KernelCommand {
    Send { text: String },
    ManualRefresh,
    SetPlaybackSuppressed(bool),
    PlaybackFinished,
    Replay { turn_id: TurnId },
    Snapshot { resp: oneshot::Sender<ConversationSnapshot> },
    Close,
}

/// Completion of network work the kernel started. Tags let the loop tell results that
/// still matter from ones overtaken by a newer send, a timeout or a stopped poll.
enum IoOutcome {
    Subscribed {
        attempt: u64,
        result: Result<mpsc::Receiver<PushEvent>>,
    },
    Sent {
        epoch: u64,
        result: Result<()>,
    },
    Fetched {
        purpose: FetchPurpose,
        result: Result<ChatSnapshot>,
    },
}

#[derive(Debug, Clone, Copy)]
enum FetchPurpose {
    History,
    Poll { cycle: u64 },
    Refresh { epoch: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    TurnAppended(Turn),
    /// A previously appended turn received its audio late.
    AudioAttached(Turn),
    WaitingForResponse(bool),
    /// Stage one elapsed: dismissible spinner.
    SoftTimeout,
    /// Stage two elapsed: refresh affordance.
    HardTimeout,
    ConnectionBanner(ConnectionStatus),
    ErrorBanner { kind: ErrorKind, message: String },
    MessageLimitReached,
    Escalation(EscalationState),
}

#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub turns: Vec<Turn>,
    pub escalation: EscalationState,
    pub polling: bool,
    pub pending: usize,
    pub connection: ConnectionStatus,
    pub mode: ConversationMode,
}

/// External collaborators a conversation talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub push: Arc<dyn PushChannel>,
    pub api: Arc<dyn ChatApi>,
    pub store: Arc<dyn ArtifactStore>,
    pub player: Arc<dyn AudioPlayer>,
}

#[derive(Clone)]
pub struct KernelHandle {
    tx_cmd: mpsc::Sender<KernelCommand>,
    tx_ui: broadcast::Sender<UiEvent>,
    cancel: CancellationToken,
}

fn kernel_stopped() -> ObservedError {
    ParleyError::Internal("conversation kernel stopped".to_string(), SpanTrace::capture()).into()
}

impl KernelHandle {
    async fn command(&self, cmd: KernelCommand) -> Result<()> {
        self.tx_cmd.send(cmd).await.map_err(|_| kernel_stopped())
    }

    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.command(KernelCommand::Send { text: text.into() }).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.command(KernelCommand::ManualRefresh).await
    }

    pub async fn set_playback_suppressed(&self, suppressed: bool) -> Result<()> {
        self.command(KernelCommand::SetPlaybackSuppressed(suppressed)).await
    }

    pub async fn playback_finished(&self) -> Result<()> {
        self.command(KernelCommand::PlaybackFinished).await
    }

    pub async fn replay(&self, turn_id: TurnId) -> Result<()> {
        self.command(KernelCommand::Replay { turn_id }).await
    }

    pub async fn snapshot(&self) -> Result<ConversationSnapshot> {
        let (resp, rx) = oneshot::channel();
        self.command(KernelCommand::Snapshot { resp }).await?;
        rx.await.map_err(|_| kernel_stopped())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx_ui.subscribe()
    }

    /// Graceful close through the command queue.
    pub async fn close(&self) -> Result<()> {
        self.command(KernelCommand::Close).await
    }

    /// Immediate teardown, e.g. when switching conversations.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct ConversationKernel {
    conversation_id: ConversationId,
    mode: ConversationMode,
    connection: ConnectionStatus,
    applier: TurnApplier,
    pending: PendingTurnTable,
    accumulator: AudioAccumulator,
    escalation: EscalationTimer,
    reconciler: PullReconciler,
    playback: PlaybackGuard,
    push: Arc<dyn PushChannel>,
    api: Arc<dyn ChatApi>,
    store: Arc<dyn ArtifactStore>,
    tx_ui: broadcast::Sender<UiEvent>,
    rx_cmd: mpsc::Receiver<KernelCommand>,
    rx_push: Option<mpsc::Receiver<PushEvent>>,
    io: JoinSet<IoOutcome>,
    push_attempt: u64,
    subscribing: bool,
    send_epoch: u64,
    queued_sends: VecDeque<(u64, String)>,
    refreshing: bool,
    cancel: CancellationToken,
}

impl ConversationKernel {
    pub fn new(
        conversation_id: ConversationId,
        mode: ConversationMode,
        config: &ReconcileConfig,
        collaborators: Collaborators,
        tx_ui: broadcast::Sender<UiEvent>,
        rx_cmd: mpsc::Receiver<KernelCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conversation_id,
            mode,
            connection: ConnectionStatus::Disconnected,
            applier: TurnApplier::new(),
            pending: PendingTurnTable::new(config.released_capacity),
            accumulator: AudioAccumulator::new(),
            escalation: EscalationTimer::new(config.stage_one, config.stage_two),
            reconciler: PullReconciler::new(
                config.processed_capacity,
                config.poll_interval,
                config.poll_interval_after_refresh,
                config.max_polling_duration,
            ),
            playback: PlaybackGuard::new(collaborators.player, config.played_capacity),
            push: collaborators.push,
            api: collaborators.api,
            store: collaborators.store,
            tx_ui,
            rx_cmd,
            rx_push: None,
            io: JoinSet::new(),
            push_attempt: 0,
            subscribing: false,
            send_epoch: 0,
            queued_sends: VecDeque::new(),
            refreshing: false,
            cancel,
        }
    }

    pub fn spawn(
        conversation_id: ConversationId,
        mode: ConversationMode,
        config: &ReconcileConfig,
        collaborators: Collaborators,
    ) -> (KernelHandle, JoinHandle<()>) {
        let (tx_cmd, rx_cmd) = mpsc::channel(32);
        let (tx_ui, _) = broadcast::channel(256);
        let cancel = CancellationToken::new();
        let kernel = Self::new(
            conversation_id,
            mode,
            config,
            collaborators,
            tx_ui.clone(),
            rx_cmd,
            cancel.clone(),
        );
        let handle = KernelHandle {
            tx_cmd,
            tx_ui,
            cancel,
        };
        (handle, tokio::spawn(kernel.run()))
    }

    pub async fn run(mut self) {
        let span = tracing::info_span!("conversation", conversation_id = %self.conversation_id);
        async move {
            tracing::info!("Conversation kernel started ({:?} mode)", self.mode);
            self.ensure_push();
            self.spawn_fetch(FetchPurpose::History);

            loop {
                let escalation_deadline = self.escalation.deadline();
                let poll_deadline = self.reconciler.next_deadline();

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    // Push events already queued are applied before any later command.
                    event = recv_push(&mut self.rx_push) => match event {
                        Some(event) => self.handle_push(event).await,
                        None => self.on_push_closed(),
                    },
                    Some(joined) = self.io.join_next(), if !self.io.is_empty() => match joined {
                        Ok(outcome) => self.on_io(outcome).await,
                        Err(e) => tracing::error!("Kernel I/O task failed: {}", e),
                    },
                    cmd = self.rx_cmd.recv() => match cmd {
                        Some(KernelCommand::Close) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    },
                    _ = sleep_until(escalation_deadline) => self.on_escalation_deadline().await,
                    _ = sleep_until(poll_deadline) => self.on_poll_tick().await,
                }
            }

            self.teardown().await;
            tracing::info!("Conversation kernel stopped");
        }
        .instrument(span)
        .await
    }

    async fn handle_command(&mut self, cmd: KernelCommand) {
        match cmd {
            KernelCommand::Send { text } => self.send(text),
            KernelCommand::ManualRefresh => self.manual_refresh(),
            KernelCommand::SetPlaybackSuppressed(suppressed) => {
                self.playback.set_suppressed(suppressed);
                if !suppressed {
                    self.playback.resume().await;
                }
            }
            KernelCommand::PlaybackFinished => {
                self.playback.resume().await;
            }
            KernelCommand::Replay { turn_id } => {
                match self.applier.get(&turn_id).and_then(PlaybackRequest::from_turn) {
                    Some(request) => {
                        self.playback.replay(request).await;
                    }
                    None => tracing::debug!(target: "playback", "Nothing to replay for {}", turn_id.short()),
                }
            }
            KernelCommand::Snapshot { resp } => {
                let _ = resp.send(self.snapshot());
            }
            KernelCommand::Close => {}
        }
    }

    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            turns: self.applier.turns().to_vec(),
            escalation: self.escalation.state(),
            polling: self.reconciler.is_active(),
            pending: self.pending.len(),
            connection: self.connection,
            mode: self.mode,
        }
    }

    // --- Network I/O ---

    async fn on_io(&mut self, outcome: IoOutcome) {
        match outcome {
            IoOutcome::Subscribed { attempt, result } => self.on_subscribed(attempt, result),
            IoOutcome::Sent { epoch, result } => self.on_sent(epoch, result),
            IoOutcome::Fetched { purpose, result } => match purpose {
                FetchPurpose::History => self.on_history(result),
                FetchPurpose::Poll { cycle } => self.on_poll_fetched(cycle, result).await,
                FetchPurpose::Refresh { epoch } => self.on_refresh_fetched(epoch, result).await,
            },
        }
    }

    fn spawn_fetch(&mut self, purpose: FetchPurpose) {
        let api = self.api.clone();
        let conversation_id = self.conversation_id.clone();
        self.io.spawn(
            async move {
                let result = api.fetch(&conversation_id).await;
                IoOutcome::Fetched { purpose, result }
            }
            .in_current_span(),
        );
    }

    // --- Sending ---

    /// Escalation starts at the command, not when the message reaches the service; a
    /// slow connect or send still counts against the stage deadlines.
    fn send(&mut self, text: String) {
        self.send_epoch += 1;
        self.escalation.on_send(Instant::now());
        self.reconciler.stop(StopReason::Cancelled);
        self.emit(UiEvent::WaitingForResponse(true));
        self.emit_escalation();

        self.queued_sends.push_back((self.send_epoch, text));
        self.ensure_push();
        if !self.subscribing {
            self.flush_sends();
        }
    }

    /// Hands queued messages to the service. Normally runs once the push subscription
    /// settled; escalation flushes early so the pull path has something to find.
    fn flush_sends(&mut self) {
        while let Some((epoch, text)) = self.queued_sends.pop_front() {
            let api = self.api.clone();
            let conversation_id = self.conversation_id.clone();
            self.io.spawn(
                async move {
                    let result = api.send(&conversation_id, &text).await;
                    IoOutcome::Sent { epoch, result }
                }
                .in_current_span(),
            );
        }
    }

    fn on_sent(&mut self, epoch: u64, result: Result<()>) {
        let Err(e) = result else {
            tracing::debug!("Message delivered to service");
            return;
        };
        tracing::error!("Send failed: {}", e.inner);
        if epoch == self.send_epoch {
            self.reconciler.stop(StopReason::Cancelled);
            self.escalation.resolve();
            self.emit(UiEvent::WaitingForResponse(false));
            self.emit_escalation();
        }
        self.emit_error(&e.inner, ErrorKind::Send);
    }

    fn ensure_push(&mut self) {
        if self.rx_push.is_some() || self.subscribing {
            return;
        }
        self.push_attempt += 1;
        self.subscribing = true;
        self.set_connection(ConnectionStatus::Connecting);

        let attempt = self.push_attempt;
        let push = self.push.clone();
        let conversation_id = self.conversation_id.clone();
        self.io.spawn(
            async move {
                let result = push.subscribe(&conversation_id).await;
                IoOutcome::Subscribed { attempt, result }
            }
            .in_current_span(),
        );
    }

    fn on_subscribed(&mut self, attempt: u64, result: Result<mpsc::Receiver<PushEvent>>) {
        if attempt != self.push_attempt {
            // Severed while connecting; dropping the receiver ends that stream.
            tracing::debug!(target: "push", "Discarding superseded subscription attempt {}", attempt);
            return;
        }
        self.subscribing = false;
        match result {
            Ok(rx) => {
                self.rx_push = Some(rx);
                self.set_connection(ConnectionStatus::Connected);
            }
            Err(e) => {
                // Escalation keeps running; the pull path can still recover the reply.
                tracing::warn!(target: "push", "Push subscription failed: {}", e.inner);
                self.set_connection(ConnectionStatus::Error);
            }
        }
        self.flush_sends();
    }

    /// Drops the live subscription or the attempt in flight.
    async fn sever_push(&mut self) {
        self.push_attempt += 1;
        self.subscribing = false;
        self.push.close(&self.conversation_id).await;
        self.rx_push = None;
    }

    fn on_push_closed(&mut self) {
        self.rx_push = None;
        if self.connection == ConnectionStatus::Connected {
            self.set_connection(ConnectionStatus::Disconnected);
        }
    }

    fn on_history(&mut self, result: Result<ChatSnapshot>) {
        match result {
            Ok(snapshot) => {
                let mut loaded = 0;
                for turn in snapshot.turns.into_iter().filter(|t| !t.is_greeting()) {
                    if self.applier.append_turn(turn.clone()).is_some() {
                        loaded += 1;
                        self.emit(UiEvent::TurnAppended(turn));
                    }
                }
                tracing::info!("Loaded {} turns of history", loaded);
            }
            Err(e) => {
                tracing::warn!("Could not load history: {}", e.inner);
                self.emit_error(&e.inner, ErrorKind::Fetch);
            }
        }
    }

    // --- Push dispatch ---

    async fn handle_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::AudioChunk { bytes, alignment } => {
                if self.mode == ConversationMode::TextOnly {
                    return;
                }
                self.accumulator.on_chunk(&bytes, alignment.as_ref());
            }
            PushEvent::Final { turn_id } => self.on_final(turn_id).await,
            PushEvent::AssistantText(turn) => self.on_text_half(turn).await,
            PushEvent::UserMessage(turn) => {
                if turn.is_greeting() {
                    tracing::debug!(target: "push", "Skipping conversation greeting");
                    return;
                }
                self.apply_turn(turn).await;
            }
            PushEvent::Error { kind, message } => {
                tracing::warn!(target: "push", "Service reported {:?}: {}", kind, message);
                self.resolve_send();
                if kind == ErrorKind::MessageLimitReached {
                    self.emit(UiEvent::MessageLimitReached);
                } else {
                    self.emit(UiEvent::ErrorBanner { kind, message });
                }
            }
            PushEvent::Connection(status) => self.set_connection(status),
            PushEvent::Auxiliary { kind } => {
                tracing::trace!(target: "push", "Ignoring auxiliary '{}' event", kind);
            }
            PushEvent::Control => {}
        }
    }

    async fn on_final(&mut self, turn_id: Option<TurnId>) {
        if self.mode == ConversationMode::TextOnly {
            self.accumulator.discard();
            return;
        }

        if self.accumulator.is_empty() {
            tracing::debug!(target: "accumulator", "Final without buffered audio");
            if let Some(id) = &turn_id {
                if let Some(turn) = self.pending.on_audio_failed(id) {
                    self.apply_turn(turn).await;
                }
            }
            return;
        }

        if let Some(id) = &turn_id {
            if self.applier.get(id).is_some_and(|t| t.audio_uri.is_some()) {
                tracing::debug!(target: "accumulator", "Turn {} already has audio; discarding chunks", id.short());
                self.accumulator.discard();
                return;
            }
        }

        match self
            .accumulator
            .on_final(turn_id.as_ref(), self.store.as_ref())
            .await
        {
            Ok(audio) => {
                let outcome = self.pending.on_audio_half(turn_id, audio);
                self.on_join(outcome).await;
            }
            Err(e) => {
                // Only this turn's audio is lost; its text still goes through.
                tracing::error!(target: "accumulator", "{}", e.inner);
                if let Some(id) = &turn_id {
                    if let Some(turn) = self.pending.on_audio_failed(id) {
                        self.apply_turn(turn).await;
                    }
                }
            }
        }
    }

    async fn on_text_half(&mut self, turn: Turn) {
        if self.mode == ConversationMode::TextOnly {
            self.apply_turn(turn).await;
            return;
        }

        let turn_id = turn.turn_id.clone();
        if let Some(id) = &turn_id {
            if self.applier.contains(id) {
                tracing::debug!(target: "pending", "Text half for applied turn {} ignored", id.short());
                return;
            }
        }

        let outcome = self.pending.on_text_half(turn);
        self.on_join(outcome).await;

        if self.escalation.releases_text_only() {
            if let Some(turn) = turn_id.as_ref().and_then(|id| self.pending.release(id)) {
                self.apply_turn(turn).await;
            }
        }
    }

    async fn on_join(&mut self, outcome: JoinOutcome) {
        match outcome {
            JoinOutcome::Completed(turn) => self.apply_turn(turn).await,
            JoinOutcome::BackFill { turn_id, audio } => self.backfill(&turn_id, audio).await,
            JoinOutcome::Pending | JoinOutcome::Dropped => {}
        }
    }

    // --- Applying ---

    async fn apply_turn(&mut self, turn: Turn) {
        if self.applier.append_turn(turn.clone()).is_none() {
            if let (Some(id), Some(uri)) = (&turn.turn_id, &turn.audio_uri) {
                let audio = AudioHalf {
                    audio_uri: uri.clone(),
                    timing: turn.timing.clone().unwrap_or_default(),
                };
                self.backfill(id, audio).await;
            }
            return;
        }

        self.emit(UiEvent::TurnAppended(turn.clone()));
        if turn.is_assistant() {
            if let Some(request) = PlaybackRequest::from_turn(&turn) {
                self.playback.try_play(request).await;
            }
            self.resolve_send();
        }
    }

    async fn backfill(&mut self, turn_id: &TurnId, audio: AudioHalf) {
        let Some(turn) = self.applier.backfill_audio(turn_id, audio).cloned() else {
            return;
        };
        self.emit(UiEvent::AudioAttached(turn.clone()));
        if let Some(request) = PlaybackRequest::from_turn(&turn) {
            self.playback.try_play(request).await;
        }
    }

    fn resolve_send(&mut self) {
        self.reconciler.stop(StopReason::Satisfied);
        if self.escalation.resolve() {
            self.emit(UiEvent::WaitingForResponse(false));
            self.emit_escalation();
        }
    }

    // --- Escalation and polling ---

    async fn on_escalation_deadline(&mut self) {
        let now = Instant::now();
        match self.escalation.on_deadline(now) {
            Some(Transition::EnteredPolling) => {
                self.emit(UiEvent::SoftTimeout);
                self.emit_escalation();
                if !self.queued_sends.is_empty() {
                    tracing::warn!(target: "push", "Push still connecting at stage one; sending anyway");
                    self.flush_sends();
                }
                self.release_pending_text().await;
                if self.escalation.is_outstanding() {
                    self.reconciler.start(now, false);
                }
            }
            Some(Transition::TimedOut) => self.on_timed_out().await,
            None => {}
        }
    }

    async fn release_pending_text(&mut self) {
        for turn in self.pending.release_text_only() {
            self.apply_turn(turn).await;
        }
    }

    async fn on_timed_out(&mut self) {
        self.release_pending_text().await;
        if self.escalation.state() != EscalationState::TimedOut {
            return;
        }

        self.reconciler.stop(StopReason::TimedOut);
        self.flush_sends();
        self.sever_push().await;
        self.set_connection(ConnectionStatus::Disconnected);
        self.emit(UiEvent::HardTimeout);
        self.emit(UiEvent::WaitingForResponse(false));
        self.emit_escalation();
    }

    async fn on_poll_tick(&mut self) {
        if self.reconciler.ceiling_reached(Instant::now()) {
            self.reconciler.stop(StopReason::Ceiling);
            self.on_poll_exhausted().await;
            return;
        }
        let cycle = self.reconciler.begin_cycle();
        self.spawn_fetch(FetchPurpose::Poll { cycle });
    }

    async fn on_poll_fetched(&mut self, cycle: u64, result: Result<ChatSnapshot>) {
        if !self.reconciler.accepts(cycle) {
            tracing::debug!(target: "reconciler", "Discarding fetch from a stopped poll");
            return;
        }
        match result {
            Ok(snapshot) => {
                let report = self
                    .reconciler
                    .fold(snapshot, &mut self.applier, &mut self.playback)
                    .await;
                self.absorb_report(report).await;
                self.reconciler.schedule_next(Instant::now());
            }
            Err(e) => {
                // No mid-cycle retry.
                tracing::warn!(target: "reconciler", "Poll cycle aborted: {}", e.inner);
                self.reconciler.stop(StopReason::FetchFailed);
                self.on_poll_exhausted().await;
            }
        }
    }

    /// Folds the side effects of a pull cycle into the push-side state.
    async fn absorb_report(&mut self, report: ReconcileReport) {
        for turn in &report.appended {
            if let Some(id) = &turn.turn_id {
                if let Some(audio) = self.pending.settle(id) {
                    self.backfill(id, audio).await;
                }
            }
            self.emit(UiEvent::TurnAppended(turn.clone()));
        }
        if report.assistant_found {
            self.resolve_send();
        }
    }

    /// Polling ended without finding the reply. When a stage-two deadline is still armed it
    /// owns the timeout; otherwise (refresh-driven polling) time out here.
    async fn on_poll_exhausted(&mut self) {
        if self.escalation.state() == EscalationState::Polling && self.escalation.deadline().is_none() {
            self.escalation.force_timeout();
            self.on_timed_out().await;
        }
    }

    fn manual_refresh(&mut self) {
        if self.refreshing {
            tracing::debug!(target: "reconciler", "Refresh already in flight");
            return;
        }
        tracing::info!(target: "reconciler", "Manual refresh");
        self.escalation.cancel_timers();
        self.reconciler.stop(StopReason::Cancelled);
        self.refreshing = true;
        self.spawn_fetch(FetchPurpose::Refresh {
            epoch: self.send_epoch,
        });
    }

    async fn on_refresh_fetched(&mut self, epoch: u64, result: Result<ChatSnapshot>) {
        self.refreshing = false;
        let found = match result {
            Ok(snapshot) => {
                let report = self
                    .reconciler
                    .fold(snapshot, &mut self.applier, &mut self.playback)
                    .await;
                let found = report.assistant_found;
                self.absorb_report(report).await;
                found
            }
            Err(e) => {
                tracing::warn!(target: "reconciler", "Refresh fetch failed: {}", e.inner);
                false
            }
        };

        // A send issued meanwhile owns the escalation now.
        if epoch != self.send_epoch {
            return;
        }

        // With nothing outstanding, the cycle alone satisfies a refresh.
        let awaiting_reply = self.escalation.state() != EscalationState::Idle;
        if found || !awaiting_reply {
            self.escalation.resolve();
            self.emit_escalation();
            return;
        }

        self.escalation.enter_polling_after_refresh();
        self.emit_escalation();
        self.reconciler.start_deferred(Instant::now(), true);
    }

    async fn teardown(&mut self) {
        self.io.abort_all();
        self.queued_sends.clear();
        self.reconciler.stop(StopReason::Cancelled);
        self.escalation.resolve();
        self.accumulator.discard();
        self.pending.clear();
        self.playback.stop().await;
        self.sever_push().await;
    }

    // --- UI ---

    fn emit(&self, event: UiEvent) {
        let _ = self.tx_ui.send(event);
    }

    fn emit_escalation(&self) {
        self.emit(UiEvent::Escalation(self.escalation.state()));
    }

    fn emit_error(&self, err: &ParleyError, fallback: ErrorKind) {
        self.emit(UiEvent::ErrorBanner {
            kind: err.user_facing().unwrap_or(fallback),
            message: err.to_string(),
        });
    }

    fn set_connection(&mut self, status: ConnectionStatus) {
        if self.connection == status {
            return;
        }
        tracing::debug!(target: "push", "Connection {} -> {}", self.connection, status);
        self.connection = status;
        self.emit(UiEvent::ConnectionBanner(status));
    }
}

async fn recv_push(rx: &mut Option<mpsc::Receiver<PushEvent>>) -> Option<PushEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
