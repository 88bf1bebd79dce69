use crate::bounded_set::BoundedIdSet;
use crate::types::{Result, TimingEntry, Turn, TurnId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub turn_id: TurnId,
    pub audio_uri: String,
    pub timing: Vec<TimingEntry>,
    pub text: String,
}

impl PlaybackRequest {
    /// None for turns that have nothing to play.
    pub fn from_turn(turn: &Turn) -> Option<Self> {
        Some(Self {
            turn_id: turn.turn_id.clone()?,
            audio_uri: turn.audio_uri.clone()?,
            timing: turn.timing.clone().unwrap_or_default(),
            text: turn.content.clone(),
        })
    }
}

/// External player. At most one active playback; starting a new one stops the previous.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, request: &PlaybackRequest) -> Result<()>;
    fn is_playing(&self) -> bool;
    async fn pause(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    AlreadyPlayed,
    /// Queued until `resume` because playback is suppressed or the player is busy.
    Deferred,
    Failed,
}

/// Guarantees at most one playback per turn id per session across push and pull.
pub struct PlaybackGuard {
    played: BoundedIdSet,
    player: Arc<dyn AudioPlayer>,
    suppressed: bool,
    deferred: VecDeque<PlaybackRequest>,
}

impl PlaybackGuard {
    pub fn new(player: Arc<dyn AudioPlayer>, capacity: usize) -> Self {
        Self {
            played: BoundedIdSet::new(capacity),
            player,
            suppressed: false,
            deferred: VecDeque::new(),
        }
    }

    pub async fn try_play(&mut self, request: PlaybackRequest) -> PlayOutcome {
        if self.played.contains(&request.turn_id) {
            tracing::debug!(target: "playback", "Turn {} already played; skipping", request.turn_id.short());
            return PlayOutcome::AlreadyPlayed;
        }

        if self.suppressed || self.player.is_playing() {
            if !self.deferred.iter().any(|r| r.turn_id == request.turn_id) {
                tracing::debug!(target: "playback", "Deferring playback of {}", request.turn_id.short());
                self.deferred.push_back(request);
            }
            return PlayOutcome::Deferred;
        }

        self.start(request).await
    }

    async fn start(&mut self, request: PlaybackRequest) -> PlayOutcome {
        // Marked before handing off; a failed play is not retried.
        self.played.insert(request.turn_id.clone());
        match self.player.play(&request).await {
            Ok(()) => {
                tracing::info!(target: "playback", "Playing turn {}", request.turn_id.short());
                PlayOutcome::Started
            }
            Err(e) => {
                tracing::error!(target: "playback", "Player rejected turn {}: {}", request.turn_id.short(), e);
                PlayOutcome::Failed
            }
        }
    }

    pub fn set_suppressed(&mut self, suppressed: bool) {
        self.suppressed = suppressed;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Starts the next deferred request that has not been played in the meantime.
    pub async fn resume(&mut self) -> Option<PlayOutcome> {
        if self.suppressed || self.player.is_playing() {
            return None;
        }
        while let Some(request) = self.deferred.pop_front() {
            if self.played.contains(&request.turn_id) {
                continue;
            }
            return Some(self.start(request).await);
        }
        None
    }

    /// Explicit user replay; bypasses the dedup set.
    pub async fn replay(&mut self, request: PlaybackRequest) -> PlayOutcome {
        self.player.pause().await;
        self.played.insert(request.turn_id.clone());
        match self.player.play(&request).await {
            Ok(()) => PlayOutcome::Started,
            Err(e) => {
                tracing::error!(target: "playback", "Replay of {} failed: {}", request.turn_id.short(), e);
                PlayOutcome::Failed
            }
        }
    }

    pub fn has_played(&self, turn_id: &TurnId) -> bool {
        self.played.contains(turn_id)
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub async fn stop(&mut self) {
        self.deferred.clear();
        self.player.pause().await;
    }
}

/// Player for headless runs: records what would be played.
#[derive(Default)]
pub struct LoggingPlayer {
    playing: AtomicBool,
}

#[async_trait]
impl AudioPlayer for LoggingPlayer {
    async fn play(&self, request: &PlaybackRequest) -> Result<()> {
        tracing::info!(
            target: "playback",
            "▶ {} ({} words): {}",
            request.audio_uri,
            request.timing.len(),
            crate::str_utils::preview(&request.text, 60)
        );
        self.playing.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    async fn pause(&self) {
        self.playing.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPlayer {
        plays: Mutex<Vec<TurnId>>,
        busy: AtomicBool,
    }

    #[async_trait]
    impl AudioPlayer for RecordingPlayer {
        async fn play(&self, request: &PlaybackRequest) -> Result<()> {
            self.plays.lock().unwrap().push(request.turn_id.clone());
            Ok(())
        }

        fn is_playing(&self) -> bool {
            self.busy.load(Ordering::Relaxed)
        }

        async fn pause(&self) {}
    }

    fn request(id: &str) -> PlaybackRequest {
        PlaybackRequest {
            turn_id: id.into(),
            audio_uri: format!("file:///tmp/{}.mp3", id),
            timing: vec![],
            text: "hello".into(),
        }
    }

    #[tokio::test]
    async fn test_try_play_fires_once() {
        let player = Arc::new(RecordingPlayer::default());
        let mut guard = PlaybackGuard::new(player.clone(), 100);

        assert_eq!(guard.try_play(request("t3")).await, PlayOutcome::Started);
        assert_eq!(guard.try_play(request("t3")).await, PlayOutcome::AlreadyPlayed);
        assert_eq!(guard.try_play(request("t3")).await, PlayOutcome::AlreadyPlayed);
        assert_eq!(player.plays.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_playback_is_deferred_then_resumed() {
        let player = Arc::new(RecordingPlayer::default());
        let mut guard = PlaybackGuard::new(player.clone(), 100);
        guard.set_suppressed(true);

        assert_eq!(guard.try_play(request("t1")).await, PlayOutcome::Deferred);
        assert_eq!(guard.try_play(request("t1")).await, PlayOutcome::Deferred);
        assert_eq!(guard.deferred_len(), 1);
        assert!(!guard.has_played(&"t1".into()));

        assert_eq!(guard.resume().await, None);
        guard.set_suppressed(false);
        assert_eq!(guard.resume().await, Some(PlayOutcome::Started));
        assert_eq!(guard.resume().await, None);
        assert_eq!(player.plays.lock().unwrap().as_slice(), &[TurnId::from("t1")]);
    }

    #[tokio::test]
    async fn test_busy_player_defers() {
        let player = Arc::new(RecordingPlayer::default());
        player.busy.store(true, Ordering::Relaxed);
        let mut guard = PlaybackGuard::new(player.clone(), 100);
        assert_eq!(guard.try_play(request("t1")).await, PlayOutcome::Deferred);
        assert!(player.plays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_bypasses_dedup() {
        let player = Arc::new(RecordingPlayer::default());
        let mut guard = PlaybackGuard::new(player.clone(), 100);
        guard.try_play(request("t1")).await;
        assert_eq!(guard.replay(request("t1")).await, PlayOutcome::Started);
        assert_eq!(player.plays.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_request_requires_audio() {
        assert!(PlaybackRequest::from_turn(&Turn::assistant("t2", "text only")).is_none());
    }
}
