use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{
    error::GameError,
    models::{
        command::{CreateGameRequest, JoinGameRequest, PlayerRequest},
        game::GameSummary,
    },
    services::game_service,
    state::AppState,
    utils::websocket,
};

pub fn routes(state: AppState) -> Router {
    Router::new()
        // ゲーム作成（作成者がホストになる）
        // curl -X POST http://localhost:8080/api/room/create -H 'Content-Type: application/json' -d '{"owner_id":"u1","nickname":"Alice"}'
        .route("/create", post(create_room))
        // 参加者募集中のゲームから退出
        // curl -X POST http://localhost:8080/api/room/leave -H 'Content-Type: application/json' -d '{"player_id":"u2"}'
        .route("/leave", post(leave_room))
        // ゲームの状況
        // curl http://localhost:8080/api/room/{roomid}
        .route("/:roomid", get(get_room_info))
        // ゲーム参加
        // curl -X POST http://localhost:8080/api/room/{roomid}/join -H 'Content-Type: application/json' -d '{"player_id":"u2","nickname":"Bob"}'
        .route("/:roomid/join", post(join_room))
        // WebSocket接続（全体通知と本人宛ての通知を受け取る）
        // websocat "ws://localhost:8080/api/room/{roomid}/ws?player_id=u1"
        .route("/:roomid/ws", get(websocket::handler))
        .with_state(state)
}

pub async fn create_room(
    State(state): State<AppState>,
    Json(request): Json<CreateGameRequest>,
) -> Result<Json<Value>, GameError> {
    let game = game_service::create_game(&state, request).await?;
    Ok(Json(json!({
        "session_id": game.session_id,
        "host_id": game.state.host_id,
        "slot": "01",
    })))
}

async fn get_room_info(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<GameSummary>, GameError> {
    let summary = game_service::status(&state, &room_id).await?;
    Ok(Json(summary))
}

pub async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<JoinGameRequest>,
) -> Result<Json<Value>, GameError> {
    let slot =
        game_service::join_game(&state, &room_id, &request.player_id, &request.nickname).await?;
    Ok(Json(json!({
        "session_id": room_id,
        "slot": slot.to_string(),
    })))
}

pub async fn leave_room(
    State(state): State<AppState>,
    Json(request): Json<PlayerRequest>,
) -> Result<Json<Value>, GameError> {
    game_service::leave_game(&state, &request.player_id).await?;
    Ok(Json(json!({ "message": "退出しました" })))
}
