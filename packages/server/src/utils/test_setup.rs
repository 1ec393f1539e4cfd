use chrono::{DateTime, Duration, TimeZone, Utc};
use dotenvy::dotenv;
use std::sync::{Arc, Mutex, Once};

use crate::models::{
    config::GameConfig,
    game::{Game, GamePhase},
    role::Role,
    rule::TiePolicy,
};
use crate::services::notifier::RecordingNotifier;
use crate::services::role_behavior::RoleRegistry;
use crate::services::session_store::MemorySessionStore;
use crate::state::AppState;
use crate::utils::clock::{Clock, RandomSource};

static INIT: Once = Once::new();

pub fn setup_test_env() {
    INIT.call_once(|| {
        dotenv().ok();
        // テストでは常にメモリストアを使う
        if std::env::var("WEREWOLF_DATABASE_URL").is_ok() {
            std::env::remove_var("WEREWOLF_DATABASE_URL");
        }
    });
}

/// 手動で進める時計
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, duration: std::time::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::from_std(duration).unwrap();
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// 決まった結果を返す乱数源。配役は `role_order` の順に並べ替える
#[derive(Debug, Default, Clone)]
pub struct ScriptedRandom {
    pub pick: usize,
    pub role_order: Vec<Role>,
}

impl ScriptedRandom {
    pub fn picking(pick: usize) -> Self {
        Self {
            pick,
            role_order: Vec::new(),
        }
    }

    pub fn with_role_order(role_order: Vec<Role>) -> Self {
        Self { pick: 0, role_order }
    }
}

impl RandomSource for ScriptedRandom {
    fn pick_index(&self, len: usize) -> usize {
        self.pick.min(len.saturating_sub(1))
    }

    fn shuffle_roles(&self, roles: &mut [Role]) {
        let mut pool: Vec<Role> = roles.to_vec();
        let mut ordered = Vec::with_capacity(roles.len());
        for role in &self.role_order {
            if let Some(index) = pool.iter().position(|r| r == role) {
                ordered.push(pool.remove(index));
            }
        }
        ordered.extend(pool);
        roles.copy_from_slice(&ordered);
    }
}

/// テスト用の部品一式
pub struct TestHarness {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_harness(random: ScriptedRandom) -> TestHarness {
    test_harness_with_config(GameConfig::default(), random)
}

pub fn test_harness_with_config(config: GameConfig, random: ScriptedRandom) -> TestHarness {
    setup_test_env();
    let clock = Arc::new(ManualClock::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let state = AppState::builder()
        .config(config)
        .store(Arc::new(MemorySessionStore::new()))
        .notifier(notifier.clone())
        .clock(clock.clone())
        .random(Arc::new(random))
        .registry(RoleRegistry::standard())
        .build();
    TestHarness {
        state,
        clock,
        notifier,
    }
}

/// 役職を割り当て済みの進行中ゲーム。プレイヤーは u1, u2, ... で席番号は 01, 02, ...
pub fn game_with_roles(roles: &[Role]) -> Game {
    let mut game = Game::new(
        "test-session".to_string(),
        "u1".to_string(),
        "P1".to_string(),
        None,
        TiePolicy::NoElimination,
        Utc::now(),
    );
    for i in 2..=roles.len() {
        game.add_player(&format!("u{}", i), &format!("P{}", i))
            .unwrap();
    }
    for (player, role) in game.players.iter_mut().zip(roles) {
        player.role = Some(*role);
    }
    game.roles = RoleRegistry::standard().name_table(roles.iter().copied());
    game.state.phase = GamePhase::NightWolves;
    game.state.day = 1;
    game
}
