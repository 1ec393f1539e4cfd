use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{GameError, ValidationError};
use crate::models::game::Game;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("version conflict: expected {expected}, found {found}")]
    Conflict { expected: u64, found: u64 },
    #[error("session not found")]
    NotFound,
    #[error("session already exists")]
    AlreadyExists,
    /// 別のセッションに参加中のプレイヤーを含めて保存しようとした
    #[error("player {0} already belongs to another session")]
    PlayerTaken(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// 読み込んだ値と、その時点のバージョン
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// セッションの永続化。保存のたびにプレイヤー索引と期限索引も同時に更新する
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 新規作成。同じ ID が既にあれば AlreadyExists
    async fn insert(&self, game: &Game) -> Result<u64, StoreError>;

    async fn load(&self, session_id: &str) -> Result<Option<Versioned<Game>>, StoreError>;

    /// バージョンが一致する場合だけ書き込み、新しいバージョンを返す
    async fn save(&self, game: &Game, expected_version: u64) -> Result<u64, StoreError>;

    /// レコード・プレイヤー索引・期限をまとめて削除する
    async fn delete(&self, session_id: &str) -> Result<bool, StoreError>;

    async fn session_for_player(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    /// 期限切れのエントリを古い順に返す
    async fn due_deadlines(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError>;

    /// エントリが存在し期限が一致すれば削除して true。同じエントリを取れるのは一人だけ
    async fn claim_deadline(
        &self,
        session_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// 処理に失敗した期限を戻す。既に新しいエントリがあれば何もしない
    async fn restore_deadline(
        &self,
        session_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn session_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// 読み込み → 変更 → バージョン付き保存を、競合時は上限回数まで繰り返す
pub async fn update_with_retry<T, F>(
    store: &dyn SessionStore,
    session_id: &str,
    max_attempts: u32,
    mut mutate: F,
) -> Result<(Game, T), GameError>
where
    F: FnMut(&mut Game) -> Result<T, GameError> + Send,
    T: Send,
{
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        let Versioned { value, version } = store
            .load(session_id)
            .await?
            .ok_or_else(|| GameError::NotFound(session_id.to_string()))?;

        let mut game = value;
        let output = mutate(&mut game)?;

        match store.save(&game, version).await {
            Ok(_) => return Ok((game, output)),
            Err(StoreError::Conflict { expected, found }) => {
                debug!(
                    "Version conflict on session {} (attempt {}/{}, expected {}, found {})",
                    session_id, attempt, attempts, expected, found
                );
            }
            Err(StoreError::NotFound) => return Err(GameError::NotFound(session_id.to_string())),
            Err(StoreError::PlayerTaken(user_id)) => {
                debug!("Player {} is already in another session than {}", user_id, session_id);
                return Err(ValidationError::InAnotherGame.into());
            }
            Err(e) => return Err(e.into()),
        }
    }

    warn!(
        "Giving up on session {} after {} conflicting attempts",
        session_id, attempts
    );
    Err(GameError::Conflict { attempts })
}

struct StoredSession {
    game: Game,
    version: u64,
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, StoredSession>,
    players: HashMap<String, String>,
    deadlines: BTreeSet<(DateTime<Utc>, String)>,
    deadline_by_session: HashMap<String, DateTime<Utc>>,
}

impl MemoryInner {
    /// 参加者が他のセッションに属していないか
    fn check_players(&self, game: &Game) -> Result<(), StoreError> {
        for player in &game.players {
            match self.players.get(&player.user_id) {
                Some(sid) if sid != &game.session_id => {
                    return Err(StoreError::PlayerTaken(player.user_id.clone()))
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn sync_indexes(&mut self, game: &Game) {
        let session_id = &game.session_id;
        self.players.retain(|user_id, sid| {
            sid != session_id || game.players.iter().any(|p| &p.user_id == user_id)
        });
        for player in &game.players {
            self.players
                .insert(player.user_id.clone(), session_id.clone());
        }

        self.remove_deadline(session_id);
        if let Some(due_at) = game.state.deadline {
            self.deadlines.insert((due_at, session_id.clone()));
            self.deadline_by_session.insert(session_id.clone(), due_at);
        }
    }

    fn remove_deadline(&mut self, session_id: &str) -> Option<DateTime<Utc>> {
        let due_at = self.deadline_by_session.remove(session_id)?;
        self.deadlines.remove(&(due_at, session_id.to_string()));
        Some(due_at)
    }
}

/// プロセス内ストア。単一プロセスで動かす場合とテストで使う
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<MemoryInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, game: &Game) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&game.session_id) {
            return Err(StoreError::AlreadyExists);
        }
        inner.check_players(game)?;
        inner.sessions.insert(
            game.session_id.clone(),
            StoredSession {
                game: game.clone(),
                version: 1,
            },
        );
        inner.sync_indexes(game);
        Ok(1)
    }

    async fn load(&self, session_id: &str) -> Result<Option<Versioned<Game>>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(session_id).map(|stored| Versioned {
            value: stored.game.clone(),
            version: stored.version,
        }))
    }

    async fn save(&self, game: &Game, expected_version: u64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .sessions
            .get_mut(&game.session_id)
            .ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                found: stored.version,
            });
        }
        inner.check_players(game)?;
        let stored = inner
            .sessions
            .get_mut(&game.session_id)
            .ok_or(StoreError::NotFound)?;
        stored.game = game.clone();
        stored.version += 1;
        let version = stored.version;
        inner.sync_indexes(game);
        Ok(version)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let existed = inner.sessions.remove(session_id).is_some();
        inner.players.retain(|_, sid| sid != session_id);
        inner.remove_deadline(session_id);
        Ok(existed)
    }

    async fn session_for_player(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.players.get(user_id).cloned())
    }

    async fn due_deadlines(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .deadlines
            .iter()
            .take_while(|(due_at, _)| *due_at <= now)
            .take(limit)
            .map(|(due_at, session_id)| (session_id.clone(), *due_at))
            .collect())
    }

    async fn claim_deadline(
        &self,
        session_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.deadline_by_session.get(session_id) != Some(&due_at) {
            return Ok(false);
        }
        Ok(inner.remove_deadline(session_id).is_some())
    }

    async fn restore_deadline(
        &self,
        session_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.sessions.contains_key(session_id)
            || inner.deadline_by_session.contains_key(session_id)
        {
            return Ok(());
        }
        inner.deadlines.insert((due_at, session_id.to_string()));
        inner
            .deadline_by_session
            .insert(session_id.to_string(), due_at);
        Ok(())
    }

    async fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<String> = inner.sessions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rule::TiePolicy;
    use chrono::Duration;
    use std::sync::Arc;

    fn game(session_id: &str, now: DateTime<Utc>) -> Game {
        Game::new(
            session_id.to_string(),
            "host".to_string(),
            "Host".to_string(),
            None,
            TiePolicy::NoElimination,
            now,
        )
    }

    #[tokio::test]
    async fn test_save_rejects_stale_version() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let mut g = game("s1", now);
        assert_eq!(store.insert(&g).await.unwrap(), 1);
        assert_eq!(store.insert(&g).await, Err(StoreError::AlreadyExists));

        g.add_player("p2", "P2").unwrap();
        assert_eq!(store.save(&g, 1).await.unwrap(), 2);
        assert_eq!(
            store.save(&g, 1).await,
            Err(StoreError::Conflict {
                expected: 1,
                found: 2
            })
        );

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.value.players.len(), 2);
    }

    #[tokio::test]
    async fn test_player_index_follows_saves_and_delete() {
        let store = MemorySessionStore::new();
        let mut g = game("s1", Utc::now());
        g.add_player("p2", "P2").unwrap();
        store.insert(&g).await.unwrap();
        assert_eq!(
            store.session_for_player("p2").await.unwrap().as_deref(),
            Some("s1")
        );

        g.remove_player("p2");
        store.save(&g, 1).await.unwrap();
        assert_eq!(store.session_for_player("p2").await.unwrap(), None);
        assert_eq!(
            store.session_for_player("host").await.unwrap().as_deref(),
            Some("s1")
        );

        assert!(store.delete("s1").await.unwrap());
        assert_eq!(store.session_for_player("host").await.unwrap(), None);
        assert!(store.load("s1").await.unwrap().is_none());
        assert!(!store.delete("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_deadline_claimed_once() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let mut early = game("early", now);
        early.state.deadline = Some(now - Duration::seconds(5));
        let mut late = game("late", now);
        late.players[0].user_id = "other-host".to_string();
        late.state.host_id = "other-host".to_string();
        late.state.deadline = Some(now + Duration::seconds(30));
        store.insert(&early).await.unwrap();
        store.insert(&late).await.unwrap();

        let due = store.due_deadlines(now, 10).await.unwrap();
        assert_eq!(due, vec![("early".to_string(), now - Duration::seconds(5))]);

        let due_at = due[0].1;
        assert!(store.claim_deadline("early", due_at).await.unwrap());
        assert!(!store.claim_deadline("early", due_at).await.unwrap());
        assert!(store.due_deadlines(now, 10).await.unwrap().is_empty());

        // 失敗時に戻した期限は再び見つかる
        store.restore_deadline("early", due_at).await.unwrap();
        assert_eq!(store.due_deadlines(now, 10).await.unwrap().len(), 1);

        // 期限を外して保存すると索引からも消える
        late.state.deadline = None;
        store.save(&late, 1).await.unwrap();
        assert!(store
            .due_deadlines(now + Duration::hours(1), 10)
            .await
            .unwrap()
            .iter()
            .all(|(id, _)| id != "late"));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_single_winner() {
        let store = Arc::new(MemorySessionStore::new());
        let now = Utc::now();
        let mut g = game("s1", now);
        g.state.deadline = Some(now);
        store.insert(&g).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_deadline("s1", now).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_update_with_retry_applies_mutation() {
        let store = MemorySessionStore::new();
        store.insert(&game("s1", Utc::now())).await.unwrap();

        let (updated, slot) = update_with_retry(&store, "s1", 3, |g| {
            g.add_player("p2", "P2").map_err(GameError::from)
        })
        .await
        .unwrap();
        assert_eq!(slot.to_string(), "02");
        assert_eq!(updated.players.len(), 2);
        assert_eq!(store.load("s1").await.unwrap().unwrap().version, 2);

        // 検証エラーでは書き込まない
        let result = update_with_retry(&store, "s1", 3, |g| {
            g.add_player("p2", "P2").map_err(GameError::from)
        })
        .await;
        assert!(matches!(
            result,
            Err(GameError::Validation(ValidationError::AlreadyJoined))
        ));
        assert_eq!(store.load("s1").await.unwrap().unwrap().version, 2);

        let missing = update_with_retry(&store, "nope", 3, |_| Ok(())).await;
        assert!(matches!(missing, Err(GameError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_player_cannot_be_saved_into_two_sessions() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let mut first = game("s1", now);
        first.add_player("p2", "P2").unwrap();
        store.insert(&first).await.unwrap();

        // 同じホストのまま別セッションは作れない
        assert_eq!(
            store.insert(&game("s2", now)).await,
            Err(StoreError::PlayerTaken("host".to_string()))
        );

        let mut second = game("s2", now);
        second.players[0].user_id = "h2".to_string();
        second.state.host_id = "h2".to_string();
        store.insert(&second).await.unwrap();

        second.add_player("p2", "P2").unwrap();
        assert_eq!(
            store.save(&second, 1).await,
            Err(StoreError::PlayerTaken("p2".to_string()))
        );
        assert_eq!(store.load("s2").await.unwrap().unwrap().version, 1);
        assert_eq!(
            store.session_for_player("p2").await.unwrap().as_deref(),
            Some("s1")
        );

        // 再試行の仕組みからは参加済みエラーとして返る
        let result = update_with_retry(&store, "s2", 3, |g| {
            g.add_player("p2", "P2").map_err(GameError::from)
        })
        .await;
        assert!(matches!(
            result,
            Err(GameError::Validation(ValidationError::InAnotherGame))
        ));
    }

    /// 保存の直前に別の書き込みが割り込むストア
    struct InterferingStore {
        inner: MemorySessionStore,
        interfere: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl SessionStore for InterferingStore {
        async fn insert(&self, game: &Game) -> Result<u64, StoreError> {
            self.inner.insert(game).await
        }
        async fn load(&self, session_id: &str) -> Result<Option<Versioned<Game>>, StoreError> {
            self.inner.load(session_id).await
        }
        async fn save(&self, game: &Game, expected_version: u64) -> Result<u64, StoreError> {
            use std::sync::atomic::Ordering;
            if self.interfere.load(Ordering::SeqCst) > 0 {
                self.interfere.fetch_sub(1, Ordering::SeqCst);
                let current = self.inner.load(&game.session_id).await?.ok_or(StoreError::NotFound)?;
                self.inner.save(&current.value, current.version).await?;
            }
            self.inner.save(game, expected_version).await
        }
        async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
            self.inner.delete(session_id).await
        }
        async fn session_for_player(&self, user_id: &str) -> Result<Option<String>, StoreError> {
            self.inner.session_for_player(user_id).await
        }
        async fn due_deadlines(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
            self.inner.due_deadlines(now, limit).await
        }
        async fn claim_deadline(&self, session_id: &str, due_at: DateTime<Utc>) -> Result<bool, StoreError> {
            self.inner.claim_deadline(session_id, due_at).await
        }
        async fn restore_deadline(&self, session_id: &str, due_at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.restore_deadline(session_id, due_at).await
        }
        async fn session_ids(&self) -> Result<Vec<String>, StoreError> {
            self.inner.session_ids().await
        }
    }

    #[tokio::test]
    async fn test_update_with_retry_retries_then_gives_up() {
        let store = InterferingStore {
            inner: MemorySessionStore::new(),
            interfere: std::sync::atomic::AtomicU32::new(2),
        };
        store.insert(&game("s1", Utc::now())).await.unwrap();

        let mut calls = 0;
        update_with_retry(&store, "s1", 3, |g| {
            calls += 1;
            g.add_player("p2", "P2").map_err(GameError::from)
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);

        store
            .interfere
            .store(5, std::sync::atomic::Ordering::SeqCst);
        let result = update_with_retry(&store, "s1", 2, |g| {
            g.add_player("p3", "P3").map_err(GameError::from)
        })
        .await;
        assert!(matches!(result, Err(GameError::Conflict { attempts: 2 })));
        let stored = store.load("s1").await.unwrap().unwrap().value;
        assert!(stored.player("p3").is_none());
    }
}
