use crate::constants::{ACCEPTED_AUDIO_TYPES, AUXILIARY_EVENT_TYPES, MESSAGE_LIMIT_ERROR_TYPE};
use crate::types::{CharAlignment, ConnectionStatus, ConversationId, ErrorKind, Result, Role, Turn, TurnId};
use crate::wire::WireTurn;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

/// A decoded push-channel event. Every branch of the kernel's dispatch consumes exactly one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// One streamed audio fragment. `bytes` is empty when the fragment's type is not kept.
    AudioChunk {
        bytes: Bytes,
        alignment: Option<CharAlignment>,
    },
    /// Terminal audio event for a turn; the id may be missing.
    Final { turn_id: Option<TurnId> },
    /// Text half of an assistant turn.
    AssistantText(Turn),
    UserMessage(Turn),
    Error { kind: ErrorKind, message: String },
    Connection(ConnectionStatus),
    /// Message types handled outside the reconciliation core.
    Auxiliary { kind: String },
    /// Transport-level frames: welcome, ping, subscription confirmations.
    Control,
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Opens (or reopens) the subscription for a conversation and returns its event stream.
    async fn subscribe(&self, conversation_id: &ConversationId) -> Result<mpsc::Receiver<PushEvent>>;

    /// Severs the subscription. The receiver returned by `subscribe` ends afterwards.
    async fn close(&self, conversation_id: &ConversationId);
}

const CONTROL_TYPES: &[&str] = &[
    "welcome",
    "ping",
    "confirm_subscription",
    "reject_subscription",
    "disconnect",
];

/// Decodes one text frame. Returns `None` (after logging) for anything that cannot be understood.
pub fn parse_push_frame(frame: &str) -> Option<PushEvent> {
    let value: Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(target: "push", "Dropping non-JSON frame: {}", e);
            return None;
        }
    };

    if let Some(kind) = value.get("type").and_then(|t| t.as_str()) {
        if CONTROL_TYPES.contains(&kind) {
            return Some(PushEvent::Control);
        }
    }

    // Cable data frames wrap the payload in `message`; bare payloads are accepted as-is.
    let payload = match value.get("message") {
        Some(inner @ Value::Object(_)) if value.get("identifier").is_some() => inner,
        _ => &value,
    };

    match parse_payload(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(target: "push", "Dropping malformed push payload: {}", e);
            None
        }
    }
}

fn parse_payload(payload: &Value) -> Result<Option<PushEvent>> {
    let kind = payload.get("type").and_then(|t| t.as_str()).unwrap_or_default();

    if CONTROL_TYPES.contains(&kind) {
        return Ok(Some(PushEvent::Control));
    }

    if AUXILIARY_EVENT_TYPES.contains(&kind) {
        return Ok(Some(PushEvent::Auxiliary {
            kind: kind.to_string(),
        }));
    }

    let event = match kind {
        "audio" => parse_audio_chunk(payload)?,
        "final" => PushEvent::Final {
            turn_id: id_field(payload, "chat_message_id"),
        },
        "user_chat_message" => {
            let message = payload.get("message").cloned().unwrap_or(Value::Null);
            let turn: Turn = serde_json::from_value::<WireTurn>(message)?.into();
            PushEvent::UserMessage(turn)
        }
        "error" => parse_error(payload),
        _ => {
            let message = payload
                .get("message")
                .and_then(|m| m.get("chat_message"))
                .or_else(|| payload.get("chat_message"));
            let Some(message) = message else {
                tracing::debug!(target: "push", "Ignoring push payload of type {:?} without a chat message", kind);
                return Ok(None);
            };
            let turn: Turn = serde_json::from_value::<WireTurn>(message.clone())?.into();
            match turn.role {
                Role::Assistant => PushEvent::AssistantText(turn),
                Role::User => PushEvent::UserMessage(turn),
            }
        }
    };

    Ok(Some(event))
}

fn parse_audio_chunk(payload: &Value) -> Result<PushEvent> {
    let audio = payload.get("audio").cloned().unwrap_or(Value::Null);

    // A bad alignment costs the fragment its timing, never its bytes.
    let alignment = match audio.get("normalizedAlignment") {
        Some(v) if !v.is_null() => match serde_json::from_value::<CharAlignment>(v.clone()) {
            Ok(alignment) => Some(alignment),
            Err(e) => {
                tracing::warn!(target: "push", "Ignoring unreadable alignment: {}", e);
                None
            }
        },
        _ => None,
    };

    let audio_type = audio
        .get("audioType")
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    let keep_bytes = ACCEPTED_AUDIO_TYPES.iter().any(|t| audio_type.contains(t));

    let bytes = match audio.get("audio").and_then(|a| a.as_str()) {
        Some(encoded) if keep_bytes => Bytes::from(B64.decode(encoded)?),
        Some(_) => {
            tracing::debug!(target: "push", "Skipping audio fragment of type {:?}", audio_type);
            Bytes::new()
        }
        None => Bytes::new(),
    };

    Ok(PushEvent::AudioChunk { bytes, alignment })
}

fn parse_error(payload: &Value) -> PushEvent {
    let error_type = payload
        .get("error_type")
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    let message = payload
        .get("message")
        .or_else(|| payload.get("error"))
        .and_then(|m| m.as_str())
        .unwrap_or("AI provider error")
        .to_string();
    let kind = if error_type == MESSAGE_LIMIT_ERROR_TYPE {
        ErrorKind::MessageLimitReached
    } else {
        ErrorKind::Provider
    };
    PushEvent::Error { kind, message }
}

fn id_field(payload: &Value, key: &str) -> Option<TurnId> {
    match payload.get(key)? {
        Value::String(s) if !s.is_empty() => Some(TurnId(s.clone())),
        Value::Number(n) => Some(TurnId(n.to_string())),
        _ => None,
    }
}
