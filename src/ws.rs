//! ActionCable-style WebSocket push channel.

use crate::constants::{CABLE_CHANNEL_NAME, PUSH_EVENT_BUFFER};
use crate::push::{parse_push_frame, PushChannel, PushEvent};
use crate::retry::RetryPolicy;
use crate::types::{ConnectionStatus, ConversationId, ParleyError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

pub struct CableChannel {
    url: String,
    connect_timeout: Duration,
    retry: RetryPolicy,
    subscriptions: Mutex<HashMap<ConversationId, CancellationToken>>,
}

impl CableChannel {
    pub fn new(
        url: impl Into<String>,
        token: Option<&str>,
        connect_timeout: Duration,
        connect_attempts: u32,
        retry_delay_ms: u64,
    ) -> Self {
        let url = url.into();
        let url = match token {
            Some(token) if url.contains('?') => format!("{}&token={}", url, token),
            Some(token) => format!("{}?token={}", url, token),
            None => url,
        };
        Self {
            url,
            connect_timeout,
            retry: RetryPolicy::new(connect_attempts, retry_delay_ms),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, conversation_id: &ConversationId, token: CancellationToken) {
        let previous = match self.subscriptions.lock() {
            Ok(mut subs) => subs.insert(conversation_id.clone(), token),
            Err(_) => None,
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
    }
}

/// Identifier string ActionCable expects, itself JSON encoded inside the command.
pub fn subscription_identifier(conversation_id: &ConversationId) -> String {
    serde_json::json!({
        "channel": CABLE_CHANNEL_NAME,
        "chat_id": conversation_id.0,
    })
    .to_string()
}

pub fn subscribe_command(conversation_id: &ConversationId) -> String {
    serde_json::json!({
        "command": "subscribe",
        "identifier": subscription_identifier(conversation_id),
    })
    .to_string()
}

#[async_trait]
impl PushChannel for CableChannel {
    async fn subscribe(&self, conversation_id: &ConversationId) -> Result<mpsc::Receiver<PushEvent>> {
        let connect_timeout = self.connect_timeout;
        let url = self.url.clone();
        let ws_stream = self
            .retry
            .execute_with_retry(|| {
                let url = url.clone();
                async move {
                    match tokio::time::timeout(connect_timeout, connect_async(url)).await {
                        Ok(Ok((stream, _))) => Ok(stream),
                        Ok(Err(e)) => Err(ParleyError::WebSocket(e).into()),
                        Err(_) => Err(ParleyError::Channel(format!(
                            "connect timed out after {:?}",
                            connect_timeout
                        ))
                        .into()),
                    }
                }
            })
            .await?;

        let (mut write, mut read) = ws_stream.split();
        write
            .send(Message::Text(subscribe_command(conversation_id)))
            .await?;
        tracing::info!(target: "push", "Subscribed to conversation {}", conversation_id.short());

        let (tx, rx) = mpsc::channel(PUSH_EVENT_BUFFER);
        let cancel = CancellationToken::new();
        self.register(conversation_id, cancel.clone());
        let conversation = conversation_id.clone();

        tokio::spawn(async move {
            let _ = tx.send(PushEvent::Connection(ConnectionStatus::Connected)).await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(target: "push", "Subscription for {} severed", conversation.short());
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let Some(event) = parse_push_frame(&text) else {
                                continue;
                            };
                            if matches!(event, PushEvent::Control) {
                                continue;
                            }
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::warn!(target: "push", "Push channel closed by server");
                            let _ = tx.send(PushEvent::Connection(ConnectionStatus::Disconnected)).await;
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::error!(target: "push", "Push channel error: {}", e);
                            let _ = tx.send(PushEvent::Connection(ConnectionStatus::Error)).await;
                            break;
                        }
                        // Ping/pong are answered by tungstenite.
                        Some(Ok(_)) => {}
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn close(&self, conversation_id: &ConversationId) {
        let token = match self.subscriptions.lock() {
            Ok(mut subs) => subs.remove(conversation_id),
            Err(_) => None,
        };
        if let Some(token) = token {
            token.cancel();
        }
    }
}
