use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use super::rule::TiePolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    // 各フェーズの制限時間
    pub night_duration: Duration,
    pub witch_duration: Duration,
    pub speech_duration: Duration,
    pub vote_duration: Duration,
    pub ability_duration: Duration,
    // 期限切れフェーズを探す間隔
    pub sweep_interval: Duration,
    pub idle_timeout: Duration,
    pub idle_sweep_interval: Duration,
    /// バージョン競合時の最大試行回数
    pub save_retries: u32,
    pub tie_policy: TiePolicy,
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub admin_ids: Vec<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            night_duration: Duration::from_secs(40),
            witch_duration: Duration::from_secs(30),
            speech_duration: Duration::from_secs(45),
            vote_duration: Duration::from_secs(60),
            ability_duration: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(1000),
            idle_timeout: Duration::from_secs(2 * 60 * 60),
            idle_sweep_interval: Duration::from_secs(5 * 60),
            save_retries: 5,
            tie_policy: TiePolicy::NoElimination,
            database_url: None,
            bind_addr: "127.0.0.1:8080".to_string(),
            admin_ids: Vec::new(),
        }
    }
}

impl GameConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let night_duration = seconds_var("WEREWOLF_NIGHT_SECONDS", defaults.night_duration);
        let witch_duration = seconds_var("WEREWOLF_WITCH_SECONDS", defaults.witch_duration);
        let speech_duration = seconds_var("WEREWOLF_SPEECH_SECONDS", defaults.speech_duration);
        let vote_duration = seconds_var("WEREWOLF_VOTE_SECONDS", defaults.vote_duration);
        let ability_duration = seconds_var("WEREWOLF_ABILITY_SECONDS", defaults.ability_duration);
        let sweep_interval = parsed_var::<u64>("WEREWOLF_SWEEP_INTERVAL_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.sweep_interval);
        let idle_timeout = seconds_var("WEREWOLF_IDLE_TIMEOUT_SECONDS", defaults.idle_timeout);
        let idle_sweep_interval =
            seconds_var("WEREWOLF_IDLE_SWEEP_SECONDS", defaults.idle_sweep_interval);
        let save_retries = parsed_var::<u32>("WEREWOLF_SAVE_RETRIES")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.save_retries);
        let tie_policy = parsed_var::<TiePolicy>("WEREWOLF_TIE_POLICY").unwrap_or(defaults.tie_policy);
        let database_url = env::var("WEREWOLF_DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let bind_addr = env::var("WEREWOLF_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let admin_ids = env::var("WEREWOLF_ADMIN_IDS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            night_duration,
            witch_duration,
            speech_duration,
            vote_duration,
            ability_duration,
            sweep_interval,
            idle_timeout,
            idle_sweep_interval,
            save_retries,
            tie_policy,
            database_url,
            bind_addr,
            admin_ids,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_ids.iter().any(|id| id == user_id)
    }
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid value for {}: {:?}, using default", name, raw);
            None
        }
    }
}

fn seconds_var(name: &str, default: Duration) -> Duration {
    parsed_var::<u64>(name)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}
