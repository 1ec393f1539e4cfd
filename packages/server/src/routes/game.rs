use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::state::AppState;
use crate::{
    error::GameError,
    models::{
        command::{AbilityRequest, NightActionRequest, PlayerRequest, TextRequest, VoteRequest},
        game::GameSummary,
    },
    services::game_service,
};

pub fn routes(state: AppState) -> Router {
    Router::new()
        .nest(
            "/:roomid",
            Router::new()
                // ゲーム開始（ホストのみ）
                // curl -X POST http://localhost:8080/api/game/{roomid}/start -H 'Content-Type: application/json' -d '{"player_id":"u1"}'
                .route("/start", post(start_game))
                // 強制終了（ホストまたは管理者）
                .route("/end", post(end_game_handler))
                .route("/state", get(get_game_state)),
        )
        // プレイヤーの操作。セッションはプレイヤーIDから引く
        .nest(
            "/actions",
            Router::new()
                // curl -X POST http://localhost:8080/api/game/actions/night-action -H 'Content-Type: application/json' -d '{"player_id":"u2","role":"SEER","kind":"check","target":"03"}'
                .route("/night-action", post(night_action_handler))
                // curl -X POST http://localhost:8080/api/game/actions/vote -H 'Content-Type: application/json' -d '{"voter_id":"u2","target":"03"}'
                .route("/vote", post(cast_vote_handler))
                .route("/ability", post(ability_handler))
                .route("/end-speech", post(end_speech_handler))
                .route("/self-destruct", post(self_destruct_handler))
                .route("/wolf-chat", post(wolf_chat_handler))
                .route("/status", post(player_status_handler)),
        )
        .with_state(state)
}

pub async fn start_game(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<PlayerRequest>,
) -> Result<Json<Value>, GameError> {
    game_service::start_game(&state, &room_id, &request.player_id).await?;
    Ok(Json(json!({ "message": "ゲームを開始しました" })))
}

pub async fn get_game_state(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<GameSummary>, GameError> {
    Ok(Json(game_service::status(&state, &room_id).await?))
}

async fn end_game_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<PlayerRequest>,
) -> Result<Json<Value>, GameError> {
    game_service::force_end(&state, &room_id, &request.player_id).await?;
    Ok(Json(json!({ "message": "ゲームを終了しました" })))
}

async fn night_action_handler(
    State(state): State<AppState>,
    Json(request): Json<NightActionRequest>,
) -> Result<Json<Value>, GameError> {
    let message = game_service::submit_night_action(
        &state,
        &request.player_id,
        &request.role,
        request.kind,
        &request.target,
    )
    .await?;
    Ok(Json(json!({ "message": message })))
}

async fn cast_vote_handler(
    State(state): State<AppState>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<Value>, GameError> {
    let message = game_service::submit_vote(&state, &request.voter_id, &request.target).await?;
    Ok(Json(json!({ "message": message })))
}

async fn ability_handler(
    State(state): State<AppState>,
    Json(request): Json<AbilityRequest>,
) -> Result<Json<Value>, GameError> {
    game_service::submit_ability(
        &state,
        &request.player_id,
        request.kind,
        request.target.as_deref(),
    )
    .await?;
    Ok(Json(json!({ "message": "能力を処理しました" })))
}

async fn end_speech_handler(
    State(state): State<AppState>,
    Json(request): Json<PlayerRequest>,
) -> Result<Json<Value>, GameError> {
    game_service::end_speech(&state, &request.player_id).await?;
    Ok(Json(json!({ "message": "発言を終了しました" })))
}

async fn self_destruct_handler(
    State(state): State<AppState>,
    Json(request): Json<PlayerRequest>,
) -> Result<Json<Value>, GameError> {
    game_service::self_destruct(&state, &request.player_id).await?;
    Ok(Json(json!({ "message": "自爆しました" })))
}

async fn wolf_chat_handler(
    State(state): State<AppState>,
    Json(request): Json<TextRequest>,
) -> Result<Json<Value>, GameError> {
    game_service::wolf_chat(&state, &request.player_id, &request.text).await?;
    Ok(Json(json!({ "message": "送信しました" })))
}

async fn player_status_handler(
    State(state): State<AppState>,
    Json(request): Json<PlayerRequest>,
) -> Result<Json<GameSummary>, GameError> {
    Ok(Json(
        game_service::status_for_player(&state, &request.player_id).await?,
    ))
}
