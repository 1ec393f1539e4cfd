use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::player::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NightActionKind {
    Kill,    // 人狼の襲撃
    Check,   // 占い
    Protect, // 護衛
    Save,    // 救命薬
    Poison,  // 毒薬
}

impl fmt::Display for NightActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NightActionKind::Kill => write!(f, "襲撃"),
            NightActionKind::Check => write!(f, "占い"),
            NightActionKind::Protect => write!(f, "護衛"),
            NightActionKind::Save => write!(f, "救命"),
            NightActionKind::Poison => write!(f, "毒殺"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityKind {
    Shoot,
    Claw,
}

impl fmt::Display for AbilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbilityKind::Shoot => write!(f, "銃撃"),
            AbilityKind::Claw => write!(f, "道連れ"),
        }
    }
}

/// 昼の投票。"00" または "0" は棄権
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Abstain,
    Target(Slot),
}

impl FromStr for VoteChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" | "00" => Ok(VoteChoice::Abstain),
            other => other.parse::<Slot>().map(VoteChoice::Target),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGameRequest {
    /// チャットグループなどの識別子。省略時は新しく採番する
    #[serde(default)]
    pub session_id: Option<String>,
    pub owner_id: String,
    pub nickname: String,
    #[serde(default)]
    pub preset: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinGameRequest {
    pub player_id: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerRequest {
    pub player_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NightActionRequest {
    pub player_id: String,
    pub role: String,
    pub kind: NightActionKind,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoteRequest {
    pub voter_id: String,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbilityRequest {
    pub player_id: String,
    pub kind: AbilityKind,
    /// 省略すると能力を放棄する
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextRequest {
    pub player_id: String,
    #[serde(default)]
    pub text: String,
}
