use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GameError, ValidationError};
use crate::models::{
    command::{AbilityKind, CreateGameRequest, NightActionKind, VoteChoice},
    game::{Game, GamePhase, GameSummary},
    player::Slot,
    role::Role,
};
use crate::services::notifier::Notice;
use crate::services::phase_service::{self, Effects, PhaseContext};
use crate::services::session_store::{update_with_retry, StoreError};
use crate::services::vote_resolver::{all_votes_in, record_vote};
use crate::state::AppState;

fn context(state: &AppState, now: DateTime<Utc>) -> PhaseContext<'_> {
    PhaseContext {
        config: &state.config,
        registry: &state.registry,
        rng: state.rng.as_ref(),
        now,
    }
}

/// プレイヤー操作の共通処理。最終操作時刻を更新し、競合時は再試行する
pub async fn update_game<T, F>(
    state: &AppState,
    session_id: &str,
    mut mutate: F,
) -> Result<(Game, T), GameError>
where
    F: FnMut(&mut Game, &PhaseContext<'_>) -> Result<T, GameError> + Send,
    T: Send,
{
    let now = state.clock.now();
    let ctx = context(state, now);
    update_with_retry(
        state.store.as_ref(),
        session_id,
        state.config.save_retries,
        |game| {
            game.state.last_activity = now;
            mutate(game, &ctx)
        },
    )
    .await
}

/// 保存済みの変更に対する通知を配信する。届かなくてもゲームは続ける
pub async fn publish(state: &AppState, session_id: &str, effects: Effects) {
    for notice in effects.notices {
        let result = match &notice {
            Notice::Broadcast(text) => state.notifier.broadcast(session_id, text).await,
            Notice::Direct { user_id, text } => {
                state.notifier.send_direct(session_id, user_id, text).await
            }
        };
        if let Err(e) = result {
            warn!("Failed to deliver message in session {}: {}", session_id, e);
        }
    }

    if effects.ended {
        teardown(state, session_id).await;
    }
}

async fn teardown(state: &AppState, session_id: &str) {
    let players: Vec<String> = match state.store.load(session_id).await {
        Ok(Some(versioned)) => versioned
            .value
            .players
            .into_iter()
            .map(|p| p.user_id)
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("Failed to load session {} for teardown: {}", session_id, e);
            Vec::new()
        }
    };
    match state.store.delete(session_id).await {
        Ok(_) => info!("Session {} torn down", session_id),
        Err(e) => warn!("Failed to delete session {}: {}", session_id, e),
    }
    state.channels.close_session(session_id, &players).await;
}

async fn session_of(state: &AppState, user_id: &str) -> Result<String, GameError> {
    state
        .store
        .session_for_player(user_id)
        .await?
        .ok_or_else(|| ValidationError::NotInGame.into())
}

fn parse_slot(text: &str) -> Result<Slot, ValidationError> {
    text.parse::<Slot>()
        .map_err(|_| ValidationError::InvalidSlot(text.trim().to_string()))
}

/// 申告された役職を解釈する。ID（SEER など）でも表示名でもよい
fn parse_role(game: &Game, text: &str) -> Option<Role> {
    let text = text.trim();
    Role::from_id(text).or_else(|| {
        Role::ALL
            .iter()
            .copied()
            .find(|role| game.role_name(*role) == text)
    })
}

pub async fn create_game(state: &AppState, request: CreateGameRequest) -> Result<Game, GameError> {
    if state
        .store
        .session_for_player(&request.owner_id)
        .await?
        .is_some()
    {
        return Err(ValidationError::InAnotherGame.into());
    }

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let game = Game::new(
        session_id.clone(),
        request.owner_id,
        request.nickname,
        request.preset,
        state.config.tie_policy,
        state.clock.now(),
    );

    match state.store.insert(&game).await {
        Ok(_) => {}
        Err(StoreError::AlreadyExists) => return Err(ValidationError::GameAlreadyExists.into()),
        Err(StoreError::PlayerTaken(_)) => return Err(ValidationError::InAnotherGame.into()),
        Err(e) => return Err(e.into()),
    }
    info!("Session {} created by {}", session_id, game.state.host_id);

    let mut effects = Effects::new();
    effects.broadcast(format!(
        "{}がゲームを作成しました。参加を受け付けています。",
        game.label(&game.state.host_id)
    ));
    publish(state, &session_id, effects).await;
    Ok(game)
}

pub async fn join_game(
    state: &AppState,
    session_id: &str,
    player_id: &str,
    nickname: &str,
) -> Result<Slot, GameError> {
    match state.store.session_for_player(player_id).await? {
        Some(current) if current == session_id => {
            return Err(ValidationError::AlreadyJoined.into())
        }
        Some(_) => return Err(ValidationError::InAnotherGame.into()),
        None => {}
    }

    let (game, slot) = update_game(state, session_id, |game, _| {
        Ok(game.add_player(player_id, nickname)?)
    })
    .await?;

    let mut effects = Effects::new();
    effects.broadcast(format!(
        "{}({}番)が参加しました（現在{}人）",
        nickname,
        slot,
        game.players.len()
    ));
    publish(state, session_id, effects).await;
    Ok(slot)
}

/// 募集中のゲームから抜ける。ホストが抜けた場合は解散する
pub async fn leave_game(state: &AppState, player_id: &str) -> Result<(), GameError> {
    let session_id = session_of(state, player_id).await?;
    let (_, effects) = update_game(state, &session_id, |game, _| {
        game.ensure_phase(&[GamePhase::Waiting])?;
        let label = game.label(player_id);
        let mut effects = Effects::new();
        if game.is_host(player_id) {
            effects.broadcast(format!("ホストの{}が退出したため、ゲームは解散しました", label));
            game.state.phase = GamePhase::Ended;
            effects.ended = true;
        } else {
            game.remove_player(player_id)
                .ok_or(ValidationError::NotInGame)?;
            effects.broadcast(format!(
                "{}が退出しました（現在{}人）",
                label,
                game.players.len()
            ));
        }
        Ok(effects)
    })
    .await?;

    publish(state, &session_id, effects).await;
    Ok(())
}

pub async fn start_game(state: &AppState, session_id: &str, requester: &str) -> Result<(), GameError> {
    let result = update_game(state, session_id, |game, ctx| {
        if !game.is_host(requester) {
            return Err(ValidationError::NotHost.into());
        }
        phase_service::begin_game(game, ctx)
    })
    .await;

    let (_, effects) = result.map_err(|e| {
        if let GameError::Integrity(reason) = &e {
            warn!("Failed to start session {}: {}", session_id, reason);
        }
        e
    })?;
    publish(state, session_id, effects).await;
    Ok(())
}

/// 夜の行動。セッションはプレイヤー索引から引く
pub async fn submit_night_action(
    state: &AppState,
    player_id: &str,
    role: &str,
    kind: NightActionKind,
    target: &str,
) -> Result<String, GameError> {
    let session_id = session_of(state, player_id).await?;
    let slot = parse_slot(target)?;

    let (_, message) = update_game(state, &session_id, |game, ctx| {
        let actor = game.living_actor(player_id)?;
        let actual = actor.role.ok_or(ValidationError::WrongRole)?;
        let claimed = parse_role(game, role).ok_or(ValidationError::WrongRole)?;
        // 人狼陣営はどの役職名で申告しても襲撃に参加できる
        if claimed != actual && !(claimed.is_wolf() && actual.is_wolf()) {
            return Err(ValidationError::WrongRole.into());
        }
        Ok(ctx
            .registry
            .behavior(actual)
            .validate_and_record(game, player_id, slot, kind)?)
    })
    .await?;

    debug!("Night action {} by {} in {}", kind, player_id, session_id);
    Ok(message)
}

/// 投票する。投票権を持つ全員が投票した時点で締め切る
pub async fn submit_vote(state: &AppState, voter_id: &str, target: &str) -> Result<String, GameError> {
    let session_id = session_of(state, voter_id).await?;
    let choice: VoteChoice = target
        .parse()
        .map_err(|_| ValidationError::InvalidSlot(target.trim().to_string()))?;

    let (_, effects) = update_game(state, &session_id, |game, ctx| {
        record_vote(game, voter_id, choice)?;
        let mut effects = Effects::new();
        if all_votes_in(game) {
            debug!("All votes are in for session {}", game.session_id);
            phase_service::resolve_vote_phase(game, ctx, &mut effects);
        }
        Ok(effects)
    })
    .await?;

    publish(state, &session_id, effects).await;
    Ok(match choice {
        VoteChoice::Abstain => "棄権しました".to_string(),
        VoteChoice::Target(slot) => format!("{}番に投票しました", slot),
    })
}

/// ハンターの銃撃・狼王の道連れ。対象が "00" または省略なら放棄
pub async fn submit_ability(
    state: &AppState,
    player_id: &str,
    kind: AbilityKind,
    target: Option<&str>,
) -> Result<(), GameError> {
    let session_id = session_of(state, player_id).await?;
    let slot = match target.map(str::trim) {
        None | Some("") | Some("0") | Some("00") => None,
        Some(text) => Some(parse_slot(text)?),
    };

    let (_, effects) = update_game(state, &session_id, |game, ctx| {
        let target_id = phase_service::validate_ability(game, player_id, kind, slot)?;
        let mut effects = Effects::new();
        phase_service::resolve_ability(game, ctx, target_id, &mut effects);
        Ok(effects)
    })
    .await?;

    publish(state, &session_id, effects).await;
    Ok(())
}

pub async fn end_speech(state: &AppState, player_id: &str) -> Result<(), GameError> {
    let session_id = session_of(state, player_id).await?;
    let (_, effects) = update_game(state, &session_id, |game, ctx| {
        game.ensure_phase(&[GamePhase::DaySpeak])?;
        let speaker = game.current_speaker().map(|p| p.user_id.as_str());
        if speaker != Some(player_id) {
            return Err(ValidationError::NotCurrentSpeaker.into());
        }
        let mut effects = Effects::new();
        phase_service::advance_speaker(game, ctx, &mut effects);
        Ok(effects)
    })
    .await?;

    publish(state, &session_id, effects).await;
    Ok(())
}

pub async fn self_destruct(state: &AppState, player_id: &str) -> Result<(), GameError> {
    let session_id = session_of(state, player_id).await?;
    let (_, effects) = update_game(state, &session_id, |game, ctx| {
        Ok(phase_service::self_destruct(game, ctx, player_id)?)
    })
    .await?;

    publish(state, &session_id, effects).await;
    Ok(())
}

/// 人狼同士の相談。状態は変更しない
pub async fn wolf_chat(state: &AppState, player_id: &str, text: &str) -> Result<(), GameError> {
    let session_id = session_of(state, player_id).await?;
    let game = load(state, &session_id).await?;
    let effects = phase_service::wolf_chat(&game, player_id, text)?;
    publish(state, &session_id, effects).await;
    Ok(())
}

/// ホストまたは管理者による強制終了
pub async fn force_end(state: &AppState, session_id: &str, requester: &str) -> Result<(), GameError> {
    let is_admin = state.config.is_admin(requester);
    let (_, effects) = update_game(state, session_id, |game, _| {
        let reason = if game.is_host(requester) {
            "ホストによる終了"
        } else if is_admin {
            "管理者による終了"
        } else {
            return Err(ValidationError::NotAuthorized.into());
        };
        Ok(phase_service::force_end(game, reason))
    })
    .await?;

    publish(state, session_id, effects).await;
    Ok(())
}

/// 放置されたセッションをシステムが終了する。保存直前にも放置を確かめ、
/// その間に操作があれば何もせず false を返す
pub async fn end_if_idle(
    state: &AppState,
    session_id: &str,
    idle_timeout: Duration,
) -> Result<bool, GameError> {
    let now = state.clock.now();
    let (game, effects) = update_with_retry(
        state.store.as_ref(),
        session_id,
        state.config.save_retries,
        |game| {
            if now - game.state.last_activity < idle_timeout {
                return Ok(None);
            }
            Ok(Some(phase_service::force_end(game, "長時間操作がなかったため")))
        },
    )
    .await?;

    match effects {
        Some(effects) => {
            publish(state, session_id, effects).await;
            Ok(true)
        }
        None => {
            debug!(
                "Session {} became active again at {}, keeping it",
                session_id, game.state.last_activity
            );
            Ok(false)
        }
    }
}

async fn load(state: &AppState, session_id: &str) -> Result<Game, GameError> {
    state
        .store
        .load(session_id)
        .await?
        .map(|versioned| versioned.value)
        .ok_or_else(|| GameError::NotFound(session_id.to_string()))
}

pub async fn status(state: &AppState, session_id: &str) -> Result<GameSummary, GameError> {
    let game = load(state, session_id).await?;
    Ok(game.summary(state.clock.now()))
}

pub async fn status_for_player(state: &AppState, player_id: &str) -> Result<GameSummary, GameError> {
    let session_id = session_of(state, player_id).await?;
    status(state, &session_id).await
}

/// 期限切れの処理。取得した期限が現在のフェーズのものでなければ捨てる
pub async fn handle_deadline(
    state: &AppState,
    session_id: &str,
    due_at: DateTime<Utc>,
) -> Result<bool, GameError> {
    let is_current =
        |game: &Game| game.state.deadline.map(|d| d.timestamp_millis()) == Some(due_at.timestamp_millis());

    let game = load(state, session_id).await?;
    if !is_current(&game) {
        debug!(
            "Discarding stale deadline {} for session {} (phase {:?})",
            due_at, session_id, game.state.phase
        );
        return Ok(false);
    }

    let ctx = context(state, state.clock.now());
    let (game, effects) = update_with_retry(
        state.store.as_ref(),
        session_id,
        state.config.save_retries,
        |game| {
            if !is_current(game) {
                return Ok(None);
            }
            Ok(Some(phase_service::on_timeout(game, &ctx)))
        },
    )
    .await?;

    match effects {
        Some(effects) => {
            info!(
                "Deadline reached in session {}, now {:?} (day {})",
                session_id, game.state.phase, game.state.day
            );
            publish(state, session_id, effects).await;
            Ok(true)
        }
        None => Ok(false),
    }
}
