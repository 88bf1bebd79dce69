//! Per-send delivery watchdog: passive push-waiting, then polling, then a hard timeout.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    Idle,
    AwaitingFirstStage,
    Polling,
    TimedOut,
}

impl fmt::Display for EscalationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingFirstStage => write!(f, "awaiting_first_stage"),
            Self::Polling => write!(f, "polling"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// What the owner must do after a deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Stage one elapsed: start the pull reconciler and release text-only halves.
    EnteredPolling,
    /// Stage two elapsed: stop the reconciler and sever the push subscription.
    TimedOut,
}

/// Holds at most one armed deadline; the owning event loop sleeps until it and then
/// calls `on_deadline`.
pub struct EscalationTimer {
    state: EscalationState,
    deadline: Option<Instant>,
    stage_one: Duration,
    stage_two: Duration,
}

impl EscalationTimer {
    pub fn new(stage_one: Duration, stage_two: Duration) -> Self {
        Self {
            state: EscalationState::Idle,
            deadline: None,
            stage_one,
            stage_two,
        }
    }

    /// A new send always restarts the machine, whatever state the previous send left.
    pub fn on_send(&mut self, now: Instant) {
        if self.state != EscalationState::Idle {
            tracing::debug!(target: "escalation", "Resetting {} for new send", self.state);
        }
        self.state = EscalationState::AwaitingFirstStage;
        self.deadline = Some(now + self.stage_one);
    }

    pub fn on_deadline(&mut self, now: Instant) -> Option<Transition> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }

        match self.state {
            EscalationState::AwaitingFirstStage => {
                self.state = EscalationState::Polling;
                self.deadline = Some(deadline + self.stage_two);
                tracing::info!(target: "escalation", "No push delivery after {:?}; polling", self.stage_one);
                Some(Transition::EnteredPolling)
            }
            EscalationState::Polling => {
                self.force_timeout();
                Some(Transition::TimedOut)
            }
            EscalationState::Idle | EscalationState::TimedOut => {
                self.deadline = None;
                None
            }
        }
    }

    /// The terminal turn for the outstanding send arrived through either channel.
    /// Returns false when nothing was outstanding.
    pub fn resolve(&mut self) -> bool {
        let was_outstanding = self.is_outstanding();
        if was_outstanding {
            tracing::debug!(target: "escalation", "Send resolved in state {}", self.state);
        }
        self.state = EscalationState::Idle;
        self.deadline = None;
        was_outstanding
    }

    /// Manual refresh: drop armed deadlines but keep the state until the refresh cycle decides.
    pub fn cancel_timers(&mut self) {
        self.deadline = None;
    }

    /// After an unsatisfied manual refresh, the reconciler owns the remaining wait.
    pub fn enter_polling_after_refresh(&mut self) {
        self.state = EscalationState::Polling;
        self.deadline = None;
    }

    pub fn force_timeout(&mut self) {
        tracing::warn!(target: "escalation", "Delivery timed out");
        self.state = EscalationState::TimedOut;
        self.deadline = None;
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_outstanding(&self) -> bool {
        matches!(
            self.state,
            EscalationState::AwaitingFirstStage | EscalationState::Polling
        )
    }

    /// Pending text halves must not wait for audio once escalation got this far.
    pub fn releases_text_only(&self) -> bool {
        matches!(
            self.state,
            EscalationState::Polling | EscalationState::TimedOut
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> EscalationTimer {
        EscalationTimer::new(Duration::from_secs(10), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_stage_escalation() {
        let mut t = timer();
        let start = Instant::now();
        t.on_send(start);
        assert_eq!(t.state(), EscalationState::AwaitingFirstStage);
        assert_eq!(t.deadline(), Some(start + Duration::from_secs(10)));

        assert_eq!(t.on_deadline(start + Duration::from_secs(9)), None);
        assert_eq!(
            t.on_deadline(start + Duration::from_secs(10)),
            Some(Transition::EnteredPolling)
        );
        assert_eq!(t.state(), EscalationState::Polling);
        assert_eq!(t.deadline(), Some(start + Duration::from_secs(15)));

        assert_eq!(
            t.on_deadline(start + Duration::from_secs(15)),
            Some(Transition::TimedOut)
        );
        assert_eq!(t.state(), EscalationState::TimedOut);
        assert!(t.deadline().is_none());
        assert!(t.releases_text_only());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_cancels_deadline() {
        let mut t = timer();
        t.on_send(Instant::now());
        assert!(t.resolve());
        assert_eq!(t.state(), EscalationState::Idle);
        assert!(t.deadline().is_none());
        assert!(!t.resolve());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_send_resets_timed_out() {
        let mut t = timer();
        t.force_timeout();
        let now = Instant::now();
        t.on_send(now);
        assert_eq!(t.state(), EscalationState::AwaitingFirstStage);
        assert_eq!(t.deadline(), Some(now + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_path_leaves_no_deadline() {
        let mut t = timer();
        t.on_send(Instant::now());
        t.cancel_timers();
        assert_eq!(t.state(), EscalationState::AwaitingFirstStage);
        t.enter_polling_after_refresh();
        assert_eq!(t.state(), EscalationState::Polling);
        assert!(t.deadline().is_none());
    }
}
