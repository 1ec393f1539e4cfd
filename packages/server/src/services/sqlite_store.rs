use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use crate::models::game::Game;
use crate::services::session_store::{SessionStore, StoreError, Versioned};

/// SQLite に保存するストア。複数プロセスで同じデータベースを共有できる
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::Serialization(format!("invalid timestamp: {}", millis)))
}

impl SqliteSessionStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS game_sessions (
                session_id TEXT PRIMARY KEY,
                players TEXT NOT NULL,
                roles TEXT NOT NULL,
                state TEXT NOT NULL,
                potions TEXT NOT NULL,
                event_log TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS player_sessions (
                user_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_deadlines (
                session_id TEXT PRIMARY KEY,
                due_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_session_deadlines_due_at ON session_deadlines (due_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// URL から接続する。`sqlite::memory:` は接続ごとに別データベースになるので接続数を 1 に絞る
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("Connected session store to {}", database_url);
        Self::new(pool).await
    }

    async fn sync_indexes(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        game: &Game,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM player_sessions WHERE session_id = ?")
            .bind(&game.session_id)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;
        // 主キーが他セッションの行と衝突したら、トランザクションごと破棄される
        for player in &game.players {
            let result = sqlx::query(
                "INSERT INTO player_sessions (user_id, session_id) VALUES (?, ?)
                 ON CONFLICT(user_id) DO NOTHING",
            )
            .bind(&player.user_id)
            .bind(&game.session_id)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::PlayerTaken(player.user_id.clone()));
            }
        }

        match game.state.deadline {
            Some(due_at) => {
                sqlx::query(
                    "INSERT INTO session_deadlines (session_id, due_at) VALUES (?, ?)
                     ON CONFLICT(session_id) DO UPDATE SET due_at = excluded.due_at",
                )
                .bind(&game.session_id)
                .bind(to_millis(due_at))
                .execute(&mut **tx)
                .await
                .map_err(backend)?;
            }
            None => {
                sqlx::query("DELETE FROM session_deadlines WHERE session_id = ?")
                    .bind(&game.session_id)
                    .execute(&mut **tx)
                    .await
                    .map_err(backend)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, game: &Game) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO game_sessions
                (session_id, players, roles, state, potions, event_log, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&game.session_id)
        .bind(to_json(&game.players)?)
        .bind(to_json(&game.roles)?)
        .bind(to_json(&game.state)?)
        .bind(to_json(&game.potions)?)
        .bind(to_json(&game.event_log)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Self::sync_indexes(&mut tx, game).await?;
        tx.commit().await.map_err(backend)?;
        Ok(1)
    }

    async fn load(&self, session_id: &str) -> Result<Option<Versioned<Game>>, StoreError> {
        let row = sqlx::query(
            "SELECT players, roles, state, potions, event_log, version
             FROM game_sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let game = Game {
            session_id: session_id.to_string(),
            players: from_json(row.get::<String, _>("players").as_str())?,
            roles: from_json(row.get::<String, _>("roles").as_str())?,
            state: from_json(row.get::<String, _>("state").as_str())?,
            potions: from_json(row.get::<String, _>("potions").as_str())?,
            event_log: from_json(row.get::<String, _>("event_log").as_str())?,
        };
        let version: i64 = row.get("version");
        Ok(Some(Versioned {
            value: game,
            version: version as u64,
        }))
    }

    async fn save(&self, game: &Game, expected_version: u64) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let result = sqlx::query(
            r#"
            UPDATE game_sessions
            SET players = ?, roles = ?, state = ?, potions = ?, event_log = ?,
                version = version + 1, updated_at = ?
            WHERE session_id = ? AND version = ?
            "#,
        )
        .bind(to_json(&game.players)?)
        .bind(to_json(&game.roles)?)
        .bind(to_json(&game.state)?)
        .bind(to_json(&game.potions)?)
        .bind(to_json(&game.event_log)?)
        .bind(Utc::now().to_rfc3339())
        .bind(&game.session_id)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            let found: Option<i64> =
                sqlx::query_scalar("SELECT version FROM game_sessions WHERE session_id = ?")
                    .bind(&game.session_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend)?;
            return Err(match found {
                Some(found) => StoreError::Conflict {
                    expected: expected_version,
                    found: found as u64,
                },
                None => StoreError::NotFound,
            });
        }

        Self::sync_indexes(&mut tx, game).await?;
        tx.commit().await.map_err(backend)?;
        Ok(expected_version + 1)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let result = sqlx::query("DELETE FROM game_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM player_sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM session_deadlines WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn session_for_player(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT session_id FROM player_sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn due_deadlines(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let rows = sqlx::query(
            "SELECT session_id, due_at FROM session_deadlines
             WHERE due_at <= ? ORDER BY due_at, session_id LIMIT ?",
        )
        .bind(to_millis(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let session_id: String = row.get("session_id");
                let due_at = from_millis(row.get("due_at"))?;
                Ok((session_id, due_at))
            })
            .collect()
    }

    async fn claim_deadline(
        &self,
        session_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM session_deadlines WHERE session_id = ? AND due_at = ?")
                .bind(session_id)
                .bind(to_millis(due_at))
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn restore_deadline(
        &self,
        session_id: &str,
        due_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR IGNORE INTO session_deadlines (session_id, due_at)
             SELECT ?, ? WHERE EXISTS (SELECT 1 FROM game_sessions WHERE session_id = ?)",
        )
        .bind(session_id)
        .bind(to_millis(due_at))
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn session_ids(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar("SELECT session_id FROM game_sessions ORDER BY session_id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }
}
