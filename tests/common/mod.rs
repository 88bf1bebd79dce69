#![allow(dead_code)]

use async_trait::async_trait;
use parley::api::{ChatApi, ChatSnapshot};
use parley::artifact::ArtifactStore;
use parley::kernel::{Collaborators, ConversationKernel, KernelHandle, UiEvent};
use parley::playback::{AudioPlayer, PlaybackRequest};
use parley::push::{PushChannel, PushEvent};
use parley::types::{ConversationId, ConversationMode, ParleyError, Result, Turn, TurnId};
use parley::ReconcileConfig;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct FakePush {
    senders: Mutex<Vec<mpsc::Sender<PushEvent>>>,
    pub subscribes: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_subscribe: AtomicBool,
    pub subscribe_delay: Mutex<Duration>,
}

impl FakePush {
    pub async fn deliver(&self, event: PushEvent) {
        let tx = self.senders.lock().unwrap().last().cloned();
        match tx {
            Some(tx) => tx.send(event).await.expect("kernel dropped push receiver"),
            None => panic!("no live push subscription"),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        !self.senders.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl PushChannel for FakePush {
    async fn subscribe(&self, _: &ConversationId) -> Result<mpsc::Receiver<PushEvent>> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.subscribe_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ParleyError::Channel("connection refused".into()).into());
        }
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn close(&self, _: &ConversationId) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.senders.lock().unwrap().clear();
    }
}

#[derive(Default)]
pub struct FakeApi {
    pub remote: Mutex<Vec<Turn>>,
    pub fetches: AtomicUsize,
    pub sends: Mutex<Vec<String>>,
    pub fail_fetch: AtomicBool,
    pub fail_send: AtomicBool,
    pub fetch_delay: Mutex<Duration>,
}

impl FakeApi {
    pub fn publish(&self, turn: Turn) {
        self.remote.lock().unwrap().push(turn);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn fetch(&self, _: &ConversationId) -> Result<ChatSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ParleyError::Fetch("503 Service Unavailable".into()).into());
        }
        Ok(ChatSnapshot {
            turns: self.remote.lock().unwrap().clone(),
        })
    }

    async fn send(&self, _: &ConversationId, text: &str) -> Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ParleyError::Send("500 Internal Server Error".into()).into());
        }
        self.sends.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub writes: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ParleyError::ArtifactWrite {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            }
            .into());
        }
        self.writes.lock().unwrap().push((key.to_string(), bytes.to_vec()));
        Ok(format!("mem://{}", key))
    }
}

#[derive(Default)]
pub struct RecordingPlayer {
    pub plays: Mutex<Vec<TurnId>>,
}

impl RecordingPlayer {
    pub fn play_count(&self, id: &str) -> usize {
        self.plays
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.0 == id)
            .count()
    }

    pub fn total(&self) -> usize {
        self.plays.lock().unwrap().len()
    }
}

#[async_trait]
impl AudioPlayer for RecordingPlayer {
    async fn play(&self, request: &PlaybackRequest) -> Result<()> {
        self.plays.lock().unwrap().push(request.turn_id.clone());
        Ok(())
    }

    fn is_playing(&self) -> bool {
        false
    }

    async fn pause(&self) {}
}

pub struct Harness {
    pub handle: KernelHandle,
    pub task: JoinHandle<()>,
    pub push: Arc<FakePush>,
    pub api: Arc<FakeApi>,
    pub store: Arc<MemoryStore>,
    pub player: Arc<RecordingPlayer>,
    pub rx_ui: broadcast::Receiver<UiEvent>,
}

impl Harness {
    pub fn start(mode: ConversationMode) -> Self {
        Self::start_with(mode, FakePush::default(), FakeApi::default())
    }

    pub fn start_with(mode: ConversationMode, push: FakePush, api: FakeApi) -> Self {
        let push = Arc::new(push);
        let api = Arc::new(api);
        let store = Arc::new(MemoryStore::default());
        let player = Arc::new(RecordingPlayer::default());
        let collaborators = Collaborators {
            push: push.clone(),
            api: api.clone(),
            store: store.clone(),
            player: player.clone(),
        };
        let (handle, task) = ConversationKernel::spawn(
            ConversationId::from("42"),
            mode,
            &ReconcileConfig::default(),
            collaborators,
        );
        let rx_ui = handle.subscribe();
        Self {
            handle,
            task,
            push,
            api,
            store,
            player,
            rx_ui,
        }
    }

    /// Everything published on the UI channel so far.
    pub fn ui_events(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx_ui.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn turns(&self) -> Vec<Turn> {
        self.handle.snapshot().await.expect("kernel alive").turns
    }
}

/// Lets the kernel and its I/O tasks drain everything already queued without moving the
/// paused clock far.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}
