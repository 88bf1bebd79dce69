//! Pull endpoint and message sends against the chat service.

use crate::constants::CHATS_PATH;
use crate::types::{ConversationId, ParleyError, Result, Turn};
use crate::wire::WireTurn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Full current conversation state as returned by the pull endpoint, append-only ordered.
#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    pub turns: Vec<Turn>,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch(&self, conversation_id: &ConversationId) -> Result<ChatSnapshot>;
    async fn send(&self, conversation_id: &ConversationId, text: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    messages: Vec<WireTurn>,
}

#[derive(Debug, Serialize)]
struct SendBody<'a> {
    query: &'a str,
}

pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn chat_url(&self, conversation_id: &ConversationId) -> String {
        format!("{}{}/{}", self.base_url, CHATS_PATH, conversation_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch(&self, conversation_id: &ConversationId) -> Result<ChatSnapshot> {
        let response = self
            .authorize(self.client.get(self.chat_url(conversation_id)))
            .send()
            .await
            .map_err(|e| ParleyError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(text) => text,
                Err(_) => "Unknown error".to_string(),
            };
            return Err(ParleyError::Fetch(format!(
                "{}: {}",
                status,
                crate::str_utils::preview(&body, 200)
            ))
            .into());
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::Fetch(format!("invalid chat payload: {}", e)))?;

        tracing::trace!(target: "reconciler", "Fetched {} turns for {}", chat.messages.len(), conversation_id.short());
        Ok(ChatSnapshot {
            turns: chat.messages.into_iter().map(Turn::from).collect(),
        })
    }

    async fn send(&self, conversation_id: &ConversationId, text: &str) -> Result<()> {
        let response = self
            .authorize(self.client.put(self.chat_url(conversation_id)))
            .json(&SendBody { query: text })
            .send()
            .await
            .map_err(|e| ParleyError::Send(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = match response.text().await {
                Ok(text) => text,
                Err(_) => "Unknown error".to_string(),
            };
            Err(ParleyError::Send(format!("{}: {}", status, crate::str_utils::preview(&body, 200))).into())
        }
    }
}
