//! Service-side representations of turns, shared by the push and pull paths.

use crate::types::{Role, TimingEntry, Turn, TurnId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTurn {
    #[serde(default, deserialize_with = "string_or_number")]
    pub chat_message_id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub word_timings: Option<WireWordTimings>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Word timing as the service stores it: three parallel arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WireWordTimings {
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub word_start_times_ms: Vec<f64>,
    #[serde(default)]
    pub word_durations_ms: Vec<f64>,
}

impl WireWordTimings {
    pub fn into_entries(self) -> Vec<TimingEntry> {
        self.words
            .into_iter()
            .zip(self.word_start_times_ms)
            .zip(self.word_durations_ms)
            .map(|((unit, start), duration)| TimingEntry {
                unit,
                start_ms: round_ms(start),
                duration_ms: round_ms(duration),
            })
            .collect()
    }
}

impl From<WireTurn> for Turn {
    fn from(wire: WireTurn) -> Self {
        let audio_uri = wire.audio_url.filter(|url| !url.is_empty());
        Self {
            turn_id: wire.chat_message_id.filter(|id| !id.is_empty()).map(TurnId),
            role: wire.role,
            content: wire.content.unwrap_or_default(),
            timing: wire.word_timings.map(WireWordTimings::into_entries),
            audio_uri,
            created_at: wire.created_at.unwrap_or_else(Utc::now),
        }
    }
}

fn round_ms(value: f64) -> u64 {
    value.max(0.0).round() as u64
}

/// The service sends millisecond offsets as JSON numbers that may be fractional.
pub(crate) fn rounded_millis<'de, D>(deserializer: D) -> std::result::Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<f64>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values.into_iter().map(round_ms).collect())
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
