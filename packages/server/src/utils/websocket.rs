use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::services::game_service;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub player_id: Option<String>,
}

/// クライアントから受け取るメッセージ
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum ClientMessage {
    /// 人狼同士の相談
    WolfChat { content: String },
    /// 状況確認
    Status,
}

pub async fn handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, params.player_id))
}

pub async fn handle_socket(
    ws: WebSocket,
    state: AppState,
    room_id: String,
    player_id: Option<String>,
) {
    info!(
        "New WebSocket connection established for room: {} (player {:?})",
        room_id, player_id
    );
    let mut room_rx = state.channels.session_channel(&room_id).await.subscribe();
    let mut private_rx = match &player_id {
        Some(id) => Some(state.channels.player_channel(id).await.subscribe()),
        None => None,
    };

    let (mut sender, mut receiver) = ws.split();
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::channel::<String>(32);

    let receive_state = state.clone();
    let receive_player = player_id.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let reply = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => handle_client_message(&receive_state, receive_player.as_deref(), message).await,
                Err(e) => Some(format!("メッセージのフォーマットが不正です: {}", e)),
            };
            if let Some(reply) = reply {
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
        }
    });

    let room_id_for_send = room_id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                msg = room_rx.recv() => forward(msg),
                msg = recv_private(&mut private_rx) => forward(msg),
                reply = reply_rx.recv() => match reply {
                    Some(text) => Some(Message::Text(
                        serde_json::json!({
                            "message_type": "reply",
                            "content": text,
                            "timestamp": chrono::Utc::now().to_rfc3339(),
                        })
                        .to_string(),
                    )),
                    None => None,
                },
            };
            let Some(msg) = next else { break };
            if let Err(e) = sender.send(msg).await {
                warn!("Error sending message in room {}: {}", room_id_for_send, e);
                break;
            }
        }
    });

    let (receive_result, send_result) = tokio::join!(receive_task, send_task);
    for (half, result) in [("receive", receive_result), ("send", send_result)] {
        if let Err(e) = result {
            warn!("WebSocket {} task for room {} failed: {}", half, room_id, e);
        }
    }
    info!("WebSocket connection closed for room: {}", room_id);
}

fn forward(msg: Result<Message, broadcast::error::RecvError>) -> Option<Message> {
    match msg {
        Ok(msg) => Some(msg),
        // 取りこぼしがあっても接続は維持する
        Err(broadcast::error::RecvError::Lagged(skipped)) => Some(Message::Text(
            serde_json::json!({
                "message_type": "lagged",
                "content": format!("{}件のメッセージを取りこぼしました", skipped),
            })
            .to_string(),
        )),
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

async fn recv_private(
    rx: &mut Option<broadcast::Receiver<Message>>,
) -> Result<Message, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_client_message(
    state: &AppState,
    player_id: Option<&str>,
    message: ClientMessage,
) -> Option<String> {
    let Some(player_id) = player_id else {
        return Some("player_id を指定して接続してください".to_string());
    };
    match message {
        ClientMessage::WolfChat { content } => {
            match game_service::wolf_chat(state, player_id, &content).await {
                Ok(()) => None,
                Err(e) => Some(e.to_string()),
            }
        }
        ClientMessage::Status => match game_service::status_for_player(state, player_id).await {
            Ok(summary) => Some(summary.to_string()),
            Err(e) => Some(e.to_string()),
        },
    }
}
