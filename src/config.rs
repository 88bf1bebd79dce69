use crate::constants::*;
use crate::types::{ConversationMode, ParleyError, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the chat service (pull endpoint and message sends).
    #[arg(long, env = "PARLEY_BASE_URL", default_value = "http://127.0.0.1:3000")]
    pub base_url: String,
    /// Push channel WebSocket URL.
    #[arg(long, env = "PARLEY_WS_URL", default_value = "ws://127.0.0.1:3000/cable")]
    pub ws_url: String,
    #[arg(long, env = "PARLEY_CONVERSATION_ID")]
    pub conversation_id: String,
    /// Bearer token for the chat service; also passed to the push channel as `token=`.
    #[arg(long, env = "PARLEY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Directory where finalized audio artifacts are written.
    #[arg(long, env = "PARLEY_ARTIFACT_DIR", default_value = "audio")]
    pub artifact_dir: PathBuf,
    #[arg(long, env = "PARLEY_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
    /// Message to send once the conversation is live.
    #[arg(long)]
    pub message: Option<String>,
    #[arg(long, default_value_t = false)]
    pub text_only: bool,
    #[arg(long, default_value_t = STAGE_ONE_TIMEOUT.as_secs())]
    pub stage_one_secs: u64,
    #[arg(long, default_value_t = STAGE_TWO_TIMEOUT.as_secs())]
    pub stage_two_secs: u64,
    #[arg(long, default_value_t = POLL_INTERVAL.as_millis() as u64)]
    pub poll_interval_ms: u64,
    #[arg(long, default_value_t = MAX_POLLING_DURATION.as_secs())]
    pub max_polling_secs: u64,
    #[arg(long, default_value_t = FETCH_TIMEOUT.as_secs())]
    pub fetch_timeout_secs: u64,
}

impl Args {
    pub fn mode(&self) -> ConversationMode {
        if self.text_only {
            ConversationMode::TextOnly
        } else {
            ConversationMode::Voice
        }
    }

    pub fn reconcile_config(&self) -> Result<ReconcileConfig> {
        let config = ReconcileConfig {
            stage_one: Duration::from_secs(self.stage_one_secs),
            stage_two: Duration::from_secs(self.stage_two_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_polling_duration: Duration::from_secs(self.max_polling_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            ..ReconcileConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// Timings and bounds for one conversation's delivery reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub stage_one: Duration,
    pub stage_two: Duration,
    pub poll_interval: Duration,
    pub poll_interval_after_refresh: Duration,
    pub max_polling_duration: Duration,
    pub processed_capacity: usize,
    pub played_capacity: usize,
    pub released_capacity: usize,
    pub push_connect_timeout: Duration,
    pub push_connect_attempts: u32,
    pub push_retry_delay_ms: u64,
    pub fetch_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stage_one: STAGE_ONE_TIMEOUT,
            stage_two: STAGE_TWO_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            poll_interval_after_refresh: POLL_INTERVAL_AFTER_REFRESH,
            max_polling_duration: MAX_POLLING_DURATION,
            processed_capacity: MAX_PROCESSED_MESSAGES,
            played_capacity: MAX_PLAYED_AUDIO_MESSAGES,
            released_capacity: MAX_RELEASED_TEXT_HALVES,
            push_connect_timeout: PUSH_CONNECT_TIMEOUT,
            push_connect_attempts: PUSH_CONNECT_ATTEMPTS,
            push_retry_delay_ms: PUSH_RETRY_DELAY_MS,
            fetch_timeout: FETCH_TIMEOUT,
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("stage_one", self.stage_one),
            ("stage_two", self.stage_two),
            ("poll_interval", self.poll_interval),
            ("poll_interval_after_refresh", self.poll_interval_after_refresh),
            ("max_polling_duration", self.max_polling_duration),
            ("push_connect_timeout", self.push_connect_timeout),
            ("fetch_timeout", self.fetch_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ParleyError::Config(format!("{} must be non-zero", name)).into());
            }
        }

        if self.processed_capacity == 0 || self.played_capacity == 0 {
            return Err(ParleyError::Config("id set capacities must be non-zero".into()).into());
        }

        if self.push_connect_attempts == 0 {
            return Err(ParleyError::Config("push_connect_attempts must be at least 1".into()).into());
        }

        if self.max_polling_duration < self.poll_interval {
            return Err(ParleyError::Config(format!(
                "max_polling_duration ({:?}) is shorter than poll_interval ({:?})",
                self.max_polling_duration, self.poll_interval
            ))
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_escalation_policy() {
        let config = ReconcileConfig::default();
        assert_eq!(config.stage_one, Duration::from_secs(10));
        assert_eq!(config.stage_two, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.poll_interval_after_refresh, Duration::from_secs(1));
        assert_eq!(config.max_polling_duration, Duration::from_secs(20));
        assert_eq!(config.processed_capacity, 200);
        assert_eq!(config.played_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ceiling_shorter_than_interval_is_rejected() {
        let config = ReconcileConfig {
            max_polling_duration: Duration::from_millis(500),
            ..ReconcileConfig::default()
        };
        match config.validate() {
            Err(e) => assert!(matches!(e.inner, ParleyError::Config(_))),
            Ok(()) => panic!("Expected Config error"),
        }
    }

    #[test]
    fn test_args_build_config() {
        let args = Args::parse_from([
            "parley",
            "--conversation-id",
            "42",
            "--stage-one-secs",
            "3",
            "--text-only",
        ]);
        assert_eq!(args.mode(), ConversationMode::TextOnly);
        match args.reconcile_config() {
            Ok(config) => assert_eq!(config.stage_one, Duration::from_secs(3)),
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    }
}
