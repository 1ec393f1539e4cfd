use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use super::command::{AbilityKind, NightActionKind};
use super::event::{DeathCause, EventKind, EventLog, EventPhase};
use super::player::{next_free_slot, Player, Slot};
use super::role::{Role, Team};
use super::rule::{check_winner, Ruleset, TiePolicy, DEFAULT_PRESET};
use crate::error::{GameError, ValidationError};
use crate::utils::clock::RandomSource;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Waiting,         // 参加者募集中
    Starting,        // 配役中
    NightWolves,     // 夜: 人狼・占い師・騎士
    NightWitch,      // 夜: 魔女
    HunterShooting,  // ハンターの銃撃
    WolfKingClawing, // 狼王の道連れ
    IdiotReveal,     // 愚者の正体公開
    DaySpeak,        // 昼: 順番に発言
    DayVote,         // 昼: 投票
    Ended,           // ゲーム終了
}

impl GamePhase {
    pub fn is_night(&self) -> bool {
        matches!(self, GamePhase::NightWolves | GamePhase::NightWitch)
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GamePhase::Waiting => "参加者募集中",
            GamePhase::Starting => "ゲーム準備中",
            GamePhase::NightWolves => "夜（人狼の行動）",
            GamePhase::NightWitch => "夜（魔女の行動）",
            GamePhase::HunterShooting => "ハンターの銃撃",
            GamePhase::WolfKingClawing => "狼王の道連れ",
            GamePhase::IdiotReveal => "愚者の正体公開",
            GamePhase::DaySpeak => "昼（発言）",
            GamePhase::DayVote => "昼（投票）",
            GamePhase::Ended => "ゲーム終了",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightAction {
    pub role: Role,
    pub kind: NightActionKind,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ballot {
    Abstain,
    Target(String),
}

/// 能力フェーズがすべて終わった後に再開する場所
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Resume {
    #[default]
    Day,
    Night,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAbility {
    pub kind: AbilityKind,
    pub actor: String,
    pub cause: DeathCause,
}

impl PendingAbility {
    pub fn phase(&self) -> GamePhase {
        match self.kind {
            AbilityKind::Shoot => GamePhase::HunterShooting,
            AbilityKind::Claw => GamePhase::WolfKingClawing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Potion {
    Save,
    Poison,
}

impl Potion {
    pub fn label(&self) -> &'static str {
        match self {
            Potion::Save => "救命薬",
            Potion::Poison => "毒薬",
        }
    }
}

/// 魔女の薬。使用済みフラグは true から false にしか変化しない
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Potions {
    pub save: bool,
    pub poison: bool,
}

impl Default for Potions {
    fn default() -> Self {
        Potions {
            save: true,
            poison: true,
        }
    }
}

impl Potions {
    pub fn is_available(&self, potion: Potion) -> bool {
        match potion {
            Potion::Save => self.save,
            Potion::Poison => self.poison,
        }
    }

    pub fn ensure_available(&self, potion: Potion) -> Result<(), ValidationError> {
        if self.is_available(potion) {
            Ok(())
        } else {
            Err(ValidationError::PotionUsed(potion.label()))
        }
    }

    pub fn consume(&mut self, potion: Potion) {
        match potion {
            Potion::Save => self.save = false,
            Potion::Poison => self.poison = false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub phase: GamePhase,
    pub day: u32,
    pub host_id: String,
    pub preset: String,
    pub ruleset: Ruleset,
    pub tie_policy: TiePolicy,
    /// 行動者の user_id をキーにした今夜の行動
    pub night_actions: BTreeMap<String, NightAction>,
    /// 魔女フェーズ開始時に確定した襲撃対象
    pub wolf_target: Option<String>,
    pub last_protected: Option<String>,
    pub votes: BTreeMap<String, Ballot>,
    pub runoff_candidates: Option<Vec<String>>,
    pub pending_abilities: VecDeque<PendingAbility>,
    pub ability_resume: Resume,
    pub speaking_order: Vec<String>,
    pub current_speaker: usize,
    pub deadline: Option<DateTime<Utc>>,
    pub winner: Option<Team>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl GameState {
    pub fn new(host_id: String, preset: String, tie_policy: TiePolicy, now: DateTime<Utc>) -> Self {
        GameState {
            phase: GamePhase::Waiting,
            day: 0,
            host_id,
            preset,
            ruleset: Ruleset::default(),
            tie_policy,
            night_actions: BTreeMap::new(),
            wolf_target: None,
            last_protected: None,
            votes: BTreeMap::new(),
            runoff_candidates: None,
            pending_abilities: VecDeque::new(),
            ability_resume: Resume::Day,
            speaking_order: Vec::new(),
            current_speaker: 0,
            deadline: None,
            winner: None,
            created_at: now,
            last_activity: now,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Game {
    pub session_id: String,
    pub players: Vec<Player>,
    /// このセッションで使う役職の表示名
    pub roles: BTreeMap<Role, String>,
    pub state: GameState,
    pub potions: Potions,
    pub event_log: EventLog,
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Game {{ session_id: {}, players: {}, phase: {:?}, day: {}, deadline: {:?} }}",
            self.session_id,
            self.players.len(),
            self.state.phase,
            self.state.day,
            self.state.deadline
        )
    }
}

impl Game {
    pub fn new(
        session_id: String,
        host_id: String,
        host_nickname: String,
        preset: Option<String>,
        tie_policy: TiePolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let host = Player::new(host_id.clone(), host_nickname, Slot::FIRST);
        Game {
            session_id,
            players: vec![host],
            roles: BTreeMap::new(),
            state: GameState::new(
                host_id,
                preset.unwrap_or_else(|| DEFAULT_PRESET.to_string()),
                tie_policy,
                now,
            ),
            potions: Potions::default(),
            event_log: EventLog::new(),
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.state.phase
    }

    pub fn ensure_phase(&self, allowed: &[GamePhase]) -> Result<(), ValidationError> {
        if allowed.contains(&self.state.phase) {
            Ok(())
        } else {
            Err(ValidationError::WrongPhase)
        }
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.state.host_id == user_id
    }

    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn player_mut(&mut self, user_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn player_by_slot(&self, slot: Slot) -> Option<&Player> {
        self.players.iter().find(|p| p.slot == slot)
    }

    /// 参加していて生存しているプレイヤーを返す
    pub fn living_actor(&self, user_id: &str) -> Result<&Player, ValidationError> {
        let player = self.player(user_id).ok_or(ValidationError::NotInGame)?;
        if !player.is_alive {
            return Err(ValidationError::DeadActor);
        }
        Ok(player)
    }

    /// 対象の席番号が生存プレイヤーを指しているか確認する
    pub fn living_target(&self, slot: Slot) -> Result<&Player, ValidationError> {
        self.player_by_slot(slot)
            .filter(|p| p.is_alive)
            .ok_or(ValidationError::InvalidTarget(slot))
    }

    pub fn alive_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_alive)
    }

    pub fn label(&self, user_id: &str) -> String {
        self.player(user_id)
            .map(|p| p.info())
            .unwrap_or_else(|| user_id.to_string())
    }

    pub fn role_name(&self, role: Role) -> String {
        self.roles
            .get(&role)
            .cloned()
            .unwrap_or_else(|| role.to_string())
    }

    pub fn add_player(&mut self, user_id: &str, nickname: &str) -> Result<Slot, ValidationError> {
        self.ensure_phase(&[GamePhase::Waiting, GamePhase::Starting])
            .map_err(|_| ValidationError::NotJoinable)?;
        if self.player(user_id).is_some() {
            return Err(ValidationError::AlreadyJoined);
        }
        let slot = next_free_slot(&self.players).ok_or(ValidationError::NoFreeSlot)?;
        self.players
            .push(Player::new(user_id.to_string(), nickname.to_string(), slot));
        self.players.sort_by_key(|p| p.slot);
        Ok(slot)
    }

    pub fn remove_player(&mut self, user_id: &str) -> Option<Player> {
        let index = self.players.iter().position(|p| p.user_id == user_id)?;
        Some(self.players.remove(index))
    }

    /// 配役をシャッフルして割り当てる。人数が合わない場合は何も変更しない
    pub fn assign_roles(
        &mut self,
        distribution: &BTreeMap<Role, usize>,
        rng: &dyn RandomSource,
    ) -> Result<(), GameError> {
        let mut roles: Vec<Role> = distribution
            .iter()
            .flat_map(|(role, count)| std::iter::repeat(*role).take(*count))
            .collect();
        if roles.len() != self.players.len() {
            return Err(GameError::Integrity(format!(
                "役職数({})とプレイヤー数({})が一致しません",
                roles.len(),
                self.players.len()
            )));
        }

        rng.shuffle_roles(&mut roles);
        for (player, role) in self.players.iter_mut().zip(roles) {
            player.role = Some(role);
            player.is_alive = true;
            player.tags.clear();
        }
        Ok(())
    }

    pub fn record_event(
        &mut self,
        kind: EventKind,
        actor: Option<&str>,
        target: Option<&str>,
    ) {
        let phase = match self.state.phase {
            phase if phase.is_night() => EventPhase::Night,
            // 夜の死亡で開いた能力は、その夜の出来事として残す
            GamePhase::HunterShooting | GamePhase::WolfKingClawing
                if self.state.ability_resume == Resume::Day =>
            {
                EventPhase::Night
            }
            _ => EventPhase::Day,
        };
        self.event_log
            .record(self.state.day, phase, kind, actor, target);
    }

    /// プレイヤーを死亡させる。既に死亡していれば false
    pub fn kill(&mut self, user_id: &str) -> bool {
        match self.player_mut(user_id) {
            Some(player) if player.is_alive => {
                player.is_alive = false;
                true
            }
            _ => false,
        }
    }

    pub fn current_speaker(&self) -> Option<&Player> {
        self.state
            .speaking_order
            .get(self.state.current_speaker)
            .and_then(|id| self.player(id))
    }

    pub fn winner(&self) -> Option<Team> {
        check_winner(&self.players, self.state.ruleset)
    }

    pub fn eligible_voter_count(&self) -> usize {
        self.players.iter().filter(|p| p.can_vote()).count()
    }

    pub fn alive_wolves(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_alive && p.is_wolf())
    }

    pub fn alive_with_role(&self, role: Role) -> Option<&Player> {
        self.players.iter().find(|p| p.is_alive && p.has_role(role))
    }

    pub fn summary(&self, now: DateTime<Utc>) -> GameSummary {
        GameSummary {
            session_id: self.session_id.clone(),
            phase: self.state.phase,
            day: self.state.day,
            host: self.label(&self.state.host_id),
            preset: self.state.preset.clone(),
            players: self
                .players
                .iter()
                .map(|p| PlayerSummary {
                    slot: p.slot.to_string(),
                    nickname: p.nickname.clone(),
                    is_alive: p.is_alive,
                })
                .collect(),
            current_speaker: if self.state.phase == GamePhase::DaySpeak {
                self.current_speaker().map(|p| p.info())
            } else {
                None
            },
            remaining_seconds: self
                .state
                .deadline
                .map(|d| (d - now).num_seconds().max(0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub slot: String,
    pub nickname: String,
    pub is_alive: bool,
}

/// 状況確認コマンドの応答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub session_id: String,
    pub phase: GamePhase,
    pub day: u32,
    pub host: String,
    pub preset: String,
    pub players: Vec<PlayerSummary>,
    pub current_speaker: Option<String>,
    pub remaining_seconds: Option<i64>,
}

impl fmt::Display for GameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "状態: {}", self.phase)?;
        if self.day > 0 {
            writeln!(f, "{}日目", self.day)?;
        }
        writeln!(f, "ホスト: {}", self.host)?;
        let alive: Vec<String> = self
            .players
            .iter()
            .filter(|p| p.is_alive)
            .map(|p| format!("{}番 {}", p.slot, p.nickname))
            .collect();
        writeln!(f, "生存者({}人): {}", alive.len(), alive.join(", "))?;
        if let Some(speaker) = &self.current_speaker {
            writeln!(f, "発言中: {}", speaker)?;
        }
        if let Some(seconds) = self.remaining_seconds {
            write!(f, "残り時間: {}秒", seconds)?;
        }
        Ok(())
    }
}
