use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TurnId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl From<String> for TurnId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TurnId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TurnId {
    pub fn short(&self) -> &str {
        crate::str_utils::prefix_chars(&self.0, 8)
    }
}

impl ConversationId {
    pub fn short(&self) -> &str {
        crate::str_utils::prefix_chars(&self.0, 6)
    }
}

/// --- CORE ROLES ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One timed unit (usually a word) of a spoken turn, relative to the start of its audio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingEntry {
    pub unit: String,
    pub start_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    /// Null only transiently, e.g. for a locally echoed user turn the service has not numbered yet.
    pub turn_id: Option<TurnId>,
    pub role: Role,
    pub content: String,
    pub audio_uri: Option<String>,
    pub timing: Option<Vec<TimingEntry>>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(turn_id: Option<TurnId>, role: Role, content: impl Into<String>) -> Self {
        Self {
            turn_id,
            role,
            content: content.into(),
            audio_uri: None,
            timing: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(turn_id: impl Into<TurnId>, content: impl Into<String>) -> Self {
        Self::new(Some(turn_id.into()), Role::Assistant, content)
    }

    pub fn user(turn_id: impl Into<TurnId>, content: impl Into<String>) -> Self {
        Self::new(Some(turn_id.into()), Role::User, content)
    }

    pub fn with_audio(mut self, audio: AudioHalf) -> Self {
        self.audio_uri = Some(audio.audio_uri);
        self.timing = Some(audio.timing);
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn is_greeting(&self) -> bool {
        self.role == Role::User && self.content == crate::constants::GREETING_TURN_CONTENT
    }

    pub fn short_id(&self) -> &str {
        match &self.turn_id {
            Some(id) => id.short(),
            None => "<none>",
        }
    }
}

/// The audio half of an assistant turn: a persisted artifact plus its word timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioHalf {
    pub audio_uri: String,
    pub timing: Vec<TimingEntry>,
}

/// Character-level alignment as streamed alongside each audio fragment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CharAlignment {
    #[serde(default)]
    pub chars: Vec<String>,
    #[serde(default, deserialize_with = "crate::wire::rounded_millis")]
    pub char_start_times_ms: Vec<u64>,
    #[serde(default, deserialize_with = "crate::wire::rounded_millis")]
    pub char_durations_ms: Vec<u64>,
}

impl CharAlignment {
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// End of the last character, or zero when nothing has been recorded.
    pub fn end_ms(&self) -> u64 {
        match (
            self.char_start_times_ms.last(),
            self.char_durations_ms.last(),
        ) {
            (Some(start), Some(duration)) => start + duration,
            (Some(start), None) => *start,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    #[default]
    Voice,
    TextOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Channel,
    Fetch,
    ArtifactWrite,
    Send,
    Provider,
    MessageLimitReached,
}

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Push channel error: {0}")]
    Channel(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Artifact write failed for {key}: {source}")]
    ArtifactWrite {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Send failed: {0}")]
    Send(String),

    #[error("No pending text to pair with id-less audio {0}")]
    MissingCorrelation(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio payload decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

impl ParleyError {
    /// The banner a failure should surface as, if any. Correlation misses are log-only.
    pub fn user_facing(&self) -> Option<ErrorKind> {
        match self {
            Self::Channel(_) | Self::WebSocket(_) => Some(ErrorKind::Channel),
            Self::Fetch(_) | Self::Network(_) => Some(ErrorKind::Fetch),
            Self::ArtifactWrite { .. } => Some(ErrorKind::ArtifactWrite),
            Self::Send(_) => Some(ErrorKind::Send),
            Self::MissingCorrelation(_) => None,
            Self::Serialization(_)
            | Self::Io(_)
            | Self::Decode(_)
            | Self::Config(_)
            | Self::Internal(_, _) => None,
        }
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: ParleyError,
    pub span_trace: SpanTrace,
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<ParleyError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;
