use async_trait::async_trait;
use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("no one is listening on session {0}")]
    NoAudience(String),
    #[error("player {0} is unreachable")]
    Unreachable(String),
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// セッション参加者へのメッセージ送信口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn broadcast(&self, session_id: &str, text: &str) -> Result<(), DeliveryError>;

    async fn send_direct(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<(), DeliveryError>;
}

/// WebSocket クライアントへ流すメッセージ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    pub message_type: String,
    pub session_id: String,
    pub target_player_id: Option<String>,
    pub content: String,
    pub timestamp: String,
}

impl OutboundMessage {
    fn to_ws(&self) -> Result<Message, DeliveryError> {
        serde_json::to_string(self)
            .map(Message::Text)
            .map_err(|e| DeliveryError::Failed(e.to_string()))
    }
}

/// セッション単位とプレイヤー単位の broadcast チャネルで配信する
#[derive(Clone, Default)]
pub struct ChannelNotifier {
    sessions: Arc<AsyncMutex<HashMap<String, broadcast::Sender<Message>>>>,
    players: Arc<AsyncMutex<HashMap<String, broadcast::Sender<Message>>>>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_channel(&self, session_id: &str) -> broadcast::Sender<Message> {
        get_or_create(&self.sessions, session_id).await
    }

    pub async fn player_channel(&self, user_id: &str) -> broadcast::Sender<Message> {
        get_or_create(&self.players, user_id).await
    }

    /// 終了したセッションのチャネルと、参加者の個別チャネルを捨てる
    pub async fn close_session(&self, session_id: &str, players: &[String]) {
        self.sessions.lock().await.remove(session_id);
        let mut channels = self.players.lock().await;
        for user_id in players {
            channels.remove(user_id);
        }
    }
}

async fn get_or_create(
    channels: &AsyncMutex<HashMap<String, broadcast::Sender<Message>>>,
    key: &str,
) -> broadcast::Sender<Message> {
    let mut channels = channels.lock().await;
    if let Some(channel) = channels.get(key) {
        channel.clone()
    } else {
        let (tx, _) = broadcast::channel(1000);
        channels.insert(key.to_string(), tx.clone());
        tx
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn broadcast(&self, session_id: &str, text: &str) -> Result<(), DeliveryError> {
        let tx = self.session_channel(session_id).await;
        let message = OutboundMessage {
            message_type: "broadcast".to_string(),
            session_id: session_id.to_string(),
            target_player_id: None,
            content: text.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        tx.send(message.to_ws()?)
            .map(|_| ())
            .map_err(|_| DeliveryError::NoAudience(session_id.to_string()))
    }

    async fn send_direct(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let tx = self.player_channel(user_id).await;
        let message = OutboundMessage {
            message_type: "direct".to_string(),
            session_id: session_id.to_string(),
            target_player_id: Some(user_id.to_string()),
            content: text.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        tx.send(message.to_ws()?)
            .map(|_| ())
            .map_err(|_| DeliveryError::Unreachable(user_id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Broadcast(String),
    Direct { user_id: String, text: String },
}

/// 送ったメッセージを記録するだけの送信口
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Notice)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<(String, Notice)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter_map(|(_, notice)| match notice {
                Notice::Broadcast(text) => Some(text),
                Notice::Direct { .. } => None,
            })
            .collect()
    }

    pub fn directs_to(&self, user_id: &str) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter_map(|(_, notice)| match notice {
                Notice::Direct { user_id: to, text } if to == user_id => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }

    fn push(&self, session_id: &str, notice: Notice) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((session_id.to_string(), notice));
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn broadcast(&self, session_id: &str, text: &str) -> Result<(), DeliveryError> {
        self.push(session_id, Notice::Broadcast(text.to_string()));
        Ok(())
    }

    async fn send_direct(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<(), DeliveryError> {
        self.push(
            session_id,
            Notice::Direct {
                user_id: user_id.to_string(),
                text: text.to_string(),
            },
        );
        Ok(())
    }
}
