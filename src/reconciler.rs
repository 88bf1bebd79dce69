//! Pull-side recovery: periodically fetches full conversation state and folds in
//! turns the push channel never delivered.

use crate::api::ChatSnapshot;
use crate::applier::TurnApplier;
use crate::bounded_set::BoundedIdSet;
use crate::playback::{PlayOutcome, PlaybackGuard, PlaybackRequest};
use crate::types::Turn;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub appended: Vec<Turn>,
    pub played: usize,
    /// An assistant turn was folded in; the outstanding send is satisfied.
    pub assistant_found: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Satisfied,
    Ceiling,
    FetchFailed,
    TimedOut,
    Cancelled,
}

pub struct PullReconciler {
    processed: BoundedIdSet,
    active: bool,
    interval: Duration,
    nominal_interval: Duration,
    fast_interval: Duration,
    ceiling: Duration,
    started_at: Option<Instant>,
    next_tick: Option<Instant>,
    /// Bumped on every stop so fetches started by an earlier run are recognizable.
    cycle: u64,
}

impl PullReconciler {
    pub fn new(
        processed_capacity: usize,
        interval: Duration,
        fast_interval: Duration,
        ceiling: Duration,
    ) -> Self {
        Self {
            processed: BoundedIdSet::new(processed_capacity),
            active: false,
            interval,
            nominal_interval: interval,
            fast_interval,
            ceiling,
            started_at: None,
            next_tick: None,
            cycle: 0,
        }
    }

    /// Idempotent while active. The first cycle is due immediately.
    pub fn start(&mut self, now: Instant, after_refresh: bool) {
        if self.active {
            return;
        }
        self.interval = if after_refresh {
            self.fast_interval
        } else {
            self.nominal_interval
        };
        tracing::info!(target: "reconciler", "Polling started (every {:?})", self.interval);
        self.active = true;
        self.started_at = Some(now);
        self.next_tick = Some(now);
    }

    /// Like `start`, but the first cycle waits one interval. Used after a refresh cycle
    /// that just ran.
    pub fn start_deferred(&mut self, now: Instant, after_refresh: bool) {
        if self.active {
            return;
        }
        self.start(now, after_refresh);
        self.next_tick = Some(now + self.interval);
    }

    pub fn stop(&mut self, reason: StopReason) {
        if self.active {
            tracing::info!(target: "reconciler", "Polling stopped: {:?}", reason);
        }
        self.active = false;
        self.started_at = None;
        self.next_tick = None;
        self.cycle += 1;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The earlier of the next tick and the polling ceiling. While a fetch is in flight
    /// only the ceiling is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.active {
            return None;
        }
        let ceiling = self.started_at.map(|started| started + self.ceiling);
        match (self.next_tick, ceiling) {
            (Some(tick), Some(ceiling)) => Some(tick.min(ceiling)),
            (tick, ceiling) => tick.or(ceiling),
        }
    }

    pub fn ceiling_reached(&self, now: Instant) -> bool {
        match self.started_at {
            Some(started) => self.active && now >= started + self.ceiling,
            None => false,
        }
    }

    /// Schedules the next tick one interval from `now`.
    pub fn schedule_next(&mut self, now: Instant) {
        if self.active {
            self.next_tick = Some(now + self.interval);
        }
    }

    /// Disarms the tick for the fetch about to be issued and returns the cycle to tag it with.
    pub fn begin_cycle(&mut self) -> u64 {
        self.next_tick = None;
        self.cycle
    }

    /// Whether a fetch tagged with `cycle` still belongs to the running poll.
    pub fn accepts(&self, cycle: u64) -> bool {
        self.active && cycle == self.cycle
    }

    pub fn mark_processed(&mut self, turn: &Turn) {
        if let Some(id) = &turn.turn_id {
            self.processed.insert(id.clone());
        }
    }

    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    /// Diffs one fetched snapshot against known ids and folds in what is new. Works
    /// whether or not polling is active, so a manual refresh goes through here too.
    pub async fn fold(
        &mut self,
        snapshot: ChatSnapshot,
        applier: &mut TurnApplier,
        playback: &mut PlaybackGuard,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for turn in snapshot.turns {
            let Some(turn_id) = turn.turn_id.clone() else {
                continue;
            };
            if self.processed.contains(&turn_id) || applier.contains(&turn_id) {
                continue;
            }

            self.processed.insert(turn_id.clone());
            if turn.is_greeting() {
                continue;
            }
            if turn.is_assistant() {
                report.assistant_found = true;
            }

            if applier.append_turn(turn.clone()).is_none() {
                continue;
            }
            tracing::info!(
                target: "reconciler",
                "Recovered {:?} turn {} via pull (audio: {})",
                turn.role,
                turn_id.short(),
                turn.audio_uri.is_some()
            );

            if turn.is_assistant() {
                if let Some(request) = PlaybackRequest::from_turn(&turn) {
                    if playback.try_play(request).await == PlayOutcome::Started {
                        report.played += 1;
                    }
                }
            }
            report.appended.push(turn);
        }

        report
    }
}
