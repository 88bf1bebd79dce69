use std::time::Duration;

/// Escalation: passive push-waiting before the pull path is engaged.
pub const STAGE_ONE_TIMEOUT: Duration = Duration::from_secs(10);
/// Escalation: additional wait after polling starts before the hard timeout.
pub const STAGE_TWO_TIMEOUT: Duration = Duration::from_secs(5);

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const POLL_INTERVAL_AFTER_REFRESH: Duration = Duration::from_secs(1);
/// Absolute cap on a single polling run, regardless of escalation state.
pub const MAX_POLLING_DURATION: Duration = Duration::from_secs(20);

pub const MAX_PROCESSED_MESSAGES: usize = 200;
pub const MAX_PLAYED_AUDIO_MESSAGES: usize = 100;
/// Released-without-audio ids remembered so late audio can still back-fill.
pub const MAX_RELEASED_TEXT_HALVES: usize = 50;

/// Push channel defaults
pub const PUSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const PUSH_CONNECT_ATTEMPTS: u32 = 3;
pub const PUSH_RETRY_DELAY_MS: u64 = 1000;
pub const PUSH_EVENT_BUFFER: usize = 256;
pub const CABLE_CHANNEL_NAME: &str = "ChatChannel";

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const CHATS_PATH: &str = "/api/v1/chats";

/// The client opens every conversation with this user turn; it is never displayed,
/// whichever path delivers it. Matched exactly.
pub const GREETING_TURN_CONTENT: &str = "Hi";

/// Characters that terminate a word when deriving word timing from char alignment.
pub const WORD_DELIMITERS: &[&str] = &[
    " ", ",", ".", "!", "?", ";", ":", "¿", "¡", "、", "。", "！", "？",
];

/// Audio fragment types whose bytes are kept.
pub const ACCEPTED_AUDIO_TYPES: &[&str] = &["mp3", "mpeg"];
pub const ARTIFACT_EXTENSION: &str = "mp3";

/// Push message types the reconciliation core does not consume.
pub const AUXILIARY_EVENT_TYPES: &[&str] = &[
    "translation",
    "suggested_reply",
    "guided_mode",
    "correction",
    "correction_explanation",
    "alternative_response",
    "slow_audio",
];

pub const MESSAGE_LIMIT_ERROR_TYPE: &str = "message_limit_reached";
