use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::player::Slot;
use crate::services::session_store::StoreError;

/// プレイヤーの操作を拒否する理由。メッセージはそのまま呼び出し元に返される
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("現在のフェーズではこの操作はできません")]
    WrongPhase,
    #[error("あなたの役職ではこの操作はできません")]
    WrongRole,
    #[error("死亡しているため操作できません")]
    DeadActor,
    #[error("ゲームに参加していません")]
    NotInGame,
    #[error("{0}番のプレイヤーは存在しないか、既に死亡しています")]
    InvalidTarget(Slot),
    #[error("席番号の形式が正しくありません: {0}")]
    InvalidSlot(String),
    #[error("自分自身を対象にすることはできません")]
    SelfTarget,
    #[error("二晩続けて同じプレイヤーを護衛することはできません")]
    RepeatProtect,
    #[error("既に投票済みです")]
    AlreadyVoted,
    #[error("今夜は既に行動済みです")]
    AlreadyActed,
    #[error("{0}は既に使用済みです")]
    PotionUsed(&'static str),
    #[error("救命薬は今夜襲撃されたプレイヤーにしか使えません")]
    NotAttackTarget,
    #[error("決選投票の対象者にのみ投票できます")]
    NotRunoffCandidate,
    #[error("正体が明かされた愚者は投票できません")]
    VotingBarred,
    #[error("ホストのみがこの操作を行えます")]
    NotHost,
    #[error("この操作を行う権限がありません")]
    NotAuthorized,
    #[error("このグループでは既にゲームが存在します")]
    GameAlreadyExists,
    #[error("ゲームは既に開始しているため参加できません")]
    NotJoinable,
    #[error("既にゲームに参加しています")]
    AlreadyJoined,
    #[error("別のゲームに参加中です")]
    InAnotherGame,
    #[error("席に空きがありません")]
    NoFreeSlot,
    #[error("{0}人ではゲームを開始できません")]
    UnsupportedPlayerCount(usize),
    #[error("現在の発言者ではありません")]
    NotCurrentSpeaker,
    #[error("実行待ちの能力がありません")]
    NoPendingAbility,
    #[error("メッセージが空です")]
    EmptyMessage,
}

#[derive(Debug, Error)]
pub enum GameError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("ゲームが見つかりません: {0}")]
    NotFound(String),
    #[error("同時に操作が行われたため処理できませんでした（{attempts}回試行）。もう一度お試しください")]
    Conflict { attempts: u32 },
    #[error("ゲームの整合性エラー: {0}")]
    Integrity(String),
    #[error("ストレージエラー: {0}")]
    Storage(#[from] StoreError),
}

impl IntoResponse for GameError {
    fn into_response(self) -> Response {
        let status = match &self {
            GameError::Validation(_) => StatusCode::BAD_REQUEST,
            GameError::NotFound(_) => StatusCode::NOT_FOUND,
            GameError::Conflict { .. } => StatusCode::CONFLICT,
            GameError::Integrity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GameError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
