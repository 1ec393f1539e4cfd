use std::sync::Arc;
use tracing::info;

use crate::models::config::GameConfig;
use crate::services::notifier::{ChannelNotifier, Notifier};
use crate::services::role_behavior::RoleRegistry;
use crate::services::session_store::{MemorySessionStore, SessionStore};
use crate::services::sqlite_store::SqliteSessionStore;
use crate::utils::clock::{Clock, RandomSource, SystemClock, SystemRandom};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub notifier: Arc<dyn Notifier>,
    /// WebSocket 接続が購読するチャネル
    pub channels: ChannelNotifier,
    pub registry: Arc<RoleRegistry>,
    pub config: Arc<GameConfig>,
    pub clock: Arc<dyn Clock>,
    pub rng: Arc<dyn RandomSource>,
}

impl AppState {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }

    /// 設定に応じてストアを選ぶ。データベース URL があれば SQLite を使う
    pub async fn from_config(config: GameConfig) -> Result<Self, sqlx::Error> {
        let builder = match &config.database_url {
            Some(url) => {
                let store = SqliteSessionStore::connect(url).await?;
                Self::builder().store(Arc::new(store))
            }
            None => {
                info!("WEREWOLF_DATABASE_URL not set, keeping sessions in memory");
                Self::builder()
            }
        };
        Ok(builder.config(config).build())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct AppStateBuilder {
    store: Option<Arc<dyn SessionStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    registry: Option<RoleRegistry>,
    config: Option<GameConfig>,
    clock: Option<Arc<dyn Clock>>,
    rng: Option<Arc<dyn RandomSource>>,
}

impl AppStateBuilder {
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn registry(mut self, registry: RoleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: GameConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn random(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn build(self) -> AppState {
        let channels = ChannelNotifier::new();
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(channels.clone()));
        AppState {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
            notifier,
            channels,
            registry: Arc::new(self.registry.unwrap_or_else(RoleRegistry::standard)),
            config: Arc::new(self.config.unwrap_or_default()),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            rng: self.rng.unwrap_or_else(|| Arc::new(SystemRandom)),
        }
    }
}
