use chrono::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::GameError;
use crate::services::game_service;
use crate::state::AppState;

/// 一回の走査で処理する期限の上限
const SWEEP_BATCH: usize = 64;

/// 期限切れのセッションを探して一件ずつ取得・処理する。処理した件数を返す
pub async fn sweep_once(state: &AppState) -> Result<usize, GameError> {
    let now = state.clock.now();
    let due = state.store.due_deadlines(now, SWEEP_BATCH).await?;
    let mut handled = 0;

    for (session_id, due_at) in due {
        // 取得できるのは一つのワーカーだけ
        if !state.store.claim_deadline(&session_id, due_at).await? {
            debug!("Deadline for session {} already claimed", session_id);
            continue;
        }

        match game_service::handle_deadline(state, &session_id, due_at).await {
            Ok(true) => handled += 1,
            Ok(false) => {}
            Err(GameError::NotFound(_)) => {
                debug!("Session {} disappeared before its deadline", session_id);
            }
            Err(e) => {
                warn!(
                    "Failed to advance session {} at deadline {}: {}",
                    session_id, due_at, e
                );
                if let Err(e) = state.store.restore_deadline(&session_id, due_at).await {
                    warn!(
                        "Failed to restore deadline {} for session {}: {}",
                        due_at, session_id, e
                    );
                }
            }
        }
    }
    Ok(handled)
}

/// 最終操作から一定時間経ったセッションを終了する
pub async fn sweep_idle(state: &AppState) -> Result<usize, GameError> {
    let now = state.clock.now();
    let idle_timeout = Duration::from_std(state.config.idle_timeout)
        .unwrap_or_else(|_| Duration::hours(2));
    let mut ended = 0;

    for session_id in state.store.session_ids().await? {
        let Some(versioned) = state.store.load(&session_id).await? else {
            continue;
        };
        if now - versioned.value.state.last_activity < idle_timeout {
            continue;
        }
        info!("Session {} idle since {}", session_id, versioned.value.state.last_activity);
        match game_service::end_if_idle(state, &session_id, idle_timeout).await {
            Ok(true) => ended += 1,
            Ok(false) => {}
            Err(GameError::NotFound(_)) => {}
            Err(e) => warn!("Failed to end idle session {}: {}", session_id, e),
        }
    }
    Ok(ended)
}

/// 期限と放置の走査を定期的に行うタスクを起動する
pub fn spawn(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut deadline_tick = tokio::time::interval(state.config.sweep_interval);
        let mut idle_tick = tokio::time::interval(state.config.idle_sweep_interval);
        info!(
            "Deadline sweeper started (every {:?}, idle check every {:?})",
            state.config.sweep_interval, state.config.idle_sweep_interval
        );

        loop {
            tokio::select! {
                _ = deadline_tick.tick() => {
                    if let Err(e) = sweep_once(&state).await {
                        error!("Deadline sweep failed: {}", e);
                    }
                }
                _ = idle_tick.tick() => {
                    if let Err(e) = sweep_idle(&state).await {
                        error!("Idle sweep failed: {}", e);
                    }
                }
            }
        }
    })
}
